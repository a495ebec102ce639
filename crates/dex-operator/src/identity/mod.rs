//! Management of OAuth2 client registrations on the identity provider.
//!
//! The reconcilers only depend on the [`IdentityProvider`] trait. The production implementation
//! talks to the Dex gRPC API, see [`dex`].
use async_trait::async_trait;
use snafu::Snafu;

use crate::crd::v1::Client;

pub mod dex;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("client {id:?} already exists"))]
    AlreadyExists { id: String },

    #[snafu(display("client {id:?} not found"))]
    NotFound { id: String },

    #[snafu(display("{operation} for client {id:?} failed with {code:?}: {message}"))]
    Rpc {
        operation: &'static str,
        id: String,
        code: tonic::Code,
        message: String,
    },

    #[snafu(display("{operation} for client {id:?} returned no client"))]
    EmptyResponse { operation: &'static str, id: String },
}

/// Everything the identity provider needs to register a client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientRegistration {
    pub id: String,
    pub name: String,
    pub secret: String,
    pub redirect_uris: Vec<String>,
    pub trusted_peers: Vec<String>,
    pub public: bool,
    pub logo_url: Option<String>,
}

impl ClientRegistration {
    /// Builds the registration of `client`, using its resource name as the client ID.
    pub fn from_client(client: &Client) -> Self {
        ClientRegistration {
            id: client.client_id().to_owned(),
            name: client.spec.name.clone(),
            secret: client.spec.secret.clone(),
            redirect_uris: client.spec.redirect_uris.clone(),
            trusted_peers: client.spec.trusted_peers.clone(),
            public: client.spec.public,
            logo_url: client.spec.logo_url.clone(),
        }
    }
}

/// The mutable part of a registration. The ID and the secret cannot be changed once registered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientUpdate {
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub trusted_peers: Vec<String>,
    pub public: bool,
    pub logo_url: Option<String>,
}

impl ClientUpdate {
    pub fn from_client(client: &Client) -> Self {
        ClientUpdate {
            name: client.spec.name.clone(),
            redirect_uris: client.spec.redirect_uris.clone(),
            trusted_peers: client.spec.trusted_peers.clone(),
            public: client.spec.public,
            logo_url: client.spec.logo_url.clone(),
        }
    }
}

/// An identity provider holding OAuth2 client registrations.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Registers a new client, failing with [`Error::AlreadyExists`] if the ID is taken.
    ///
    /// Returns the registration as stored by the identity provider.
    async fn create(&self, registration: &ClientRegistration) -> Result<ClientRegistration>;

    /// Updates an existing registration, failing with [`Error::NotFound`] if there is none.
    async fn update(&self, id: &str, update: &ClientUpdate) -> Result<()>;

    /// Removes a registration, failing with [`Error::NotFound`] if there is none.
    async fn delete(&self, id: &str) -> Result<()>;

    async fn get(&self, id: &str) -> Result<ClientRegistration>;
}
