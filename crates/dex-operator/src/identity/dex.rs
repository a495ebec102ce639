//! [`IdentityProvider`] backed by the Dex gRPC API.
//!
//! Only the client management calls of the `api.Dex` service are used, so the messages are
//! declared here instead of being generated from the full `api.proto`.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use http::uri::PathAndQuery;
use snafu::{ResultExt, Snafu};
use tonic::{
    client::Grpc,
    codec::ProstCodec,
    transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity},
};
use tracing::{debug, info};

use super::{ClientRegistration, ClientUpdate, IdentityProvider, Result};

#[derive(Debug, Snafu)]
pub enum ConnectError {
    #[snafu(display("failed to read {what} from {path:?}"))]
    ReadPem {
        source: std::io::Error,
        what: &'static str,
        path: PathBuf,
    },

    #[snafu(display("invalid Dex gRPC endpoint {endpoint:?}"))]
    InvalidEndpoint {
        source: tonic::transport::Error,
        endpoint: String,
    },

    #[snafu(display("failed to configure TLS for Dex gRPC endpoint {endpoint:?}"))]
    ConfigureTls {
        source: tonic::transport::Error,
        endpoint: String,
    },
}

/// Connection settings of the Dex gRPC API.
#[derive(clap::Args, Clone, Debug, PartialEq, Eq)]
pub struct DexOptions {
    /// Host and port of the Dex gRPC API.
    #[arg(long = "dex-grpc", env = "DEX_GRPC", default_value = "dex:35000")]
    pub host_and_port: String,

    /// CA certificate used to verify the Dex gRPC server.
    #[arg(long = "dex-grpc-ca", env = "DEX_GRPC_CA", default_value = "/etc/dex/tls/ca.crt")]
    pub ca: PathBuf,

    /// Client certificate presented to the Dex gRPC server.
    #[arg(
        long = "dex-grpc-cert",
        env = "DEX_GRPC_CERT",
        default_value = "/etc/dex/tls/tls.crt"
    )]
    pub cert: PathBuf,

    /// Private key of the client certificate.
    #[arg(long = "dex-grpc-key", env = "DEX_GRPC_KEY", default_value = "/etc/dex/tls/tls.key")]
    pub key: PathBuf,

    /// Connect over plain text, ignoring all certificate options.
    #[arg(long = "dex-grpc-insecure", env = "DEX_GRPC_INSECURE")]
    pub insecure: bool,
}

/// A client of the `api.Dex` gRPC service.
///
/// The connection is established lazily on the first call, and re-established transparently
/// if it breaks.
#[derive(Clone, Debug)]
pub struct DexClient {
    inner: Grpc<Channel>,
}

impl DexClient {
    /// Creates a client for the configured endpoint, using mutual TLS unless
    /// [`DexOptions::insecure`] is set.
    pub async fn connect(options: &DexOptions) -> Result<Self, ConnectError> {
        let channel = if options.insecure {
            let endpoint = format!("http://{}", options.host_and_port);
            Endpoint::from_shared(endpoint.clone())
                .context(InvalidEndpointSnafu { endpoint })?
                .connect_lazy()
        } else {
            let endpoint = format!("https://{}", options.host_and_port);
            let tls = ClientTlsConfig::new()
                .ca_certificate(Certificate::from_pem(
                    read_pem("CA certificate", &options.ca).await?,
                ))
                .identity(Identity::from_pem(
                    read_pem("client certificate", &options.cert).await?,
                    read_pem("client key", &options.key).await?,
                ));

            Endpoint::from_shared(endpoint.clone())
                .context(InvalidEndpointSnafu {
                    endpoint: endpoint.clone(),
                })?
                .tls_config(tls)
                .context(ConfigureTlsSnafu { endpoint })?
                .connect_lazy()
        };

        info!(
            endpoint = %options.host_and_port,
            insecure = options.insecure,
            "configured Dex gRPC client"
        );
        Ok(Self::new(channel))
    }

    pub fn new(channel: Channel) -> Self {
        DexClient {
            inner: Grpc::new(channel),
        }
    }

    async fn unary<Req, Resp>(
        &self,
        method: &'static str,
        request: Req,
    ) -> std::result::Result<Resp, tonic::Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.inner.clone();
        grpc.ready()
            .await
            .map_err(|err| tonic::Status::unavailable(format!("Dex is not ready: {err}")))?;

        let path = PathAndQuery::from_static(method);
        let response = grpc
            .unary(
                tonic::Request::new(request),
                path,
                ProstCodec::<Req, Resp>::default(),
            )
            .await?;
        Ok(response.into_inner())
    }
}

async fn read_pem(what: &'static str, path: &Path) -> Result<Vec<u8>, ConnectError> {
    tokio::fs::read(path)
        .await
        .context(ReadPemSnafu { what, path })
}

fn rpc_error(operation: &'static str, id: &str, status: tonic::Status) -> super::Error {
    super::Error::Rpc {
        operation,
        id: id.to_owned(),
        code: status.code(),
        message: status.message().to_owned(),
    }
}

#[async_trait]
impl IdentityProvider for DexClient {
    async fn create(&self, registration: &ClientRegistration) -> Result<ClientRegistration> {
        let request = CreateClientReq {
            client: Some(registration.into()),
        };
        let response: CreateClientResp = self
            .unary("/api.Dex/CreateClient", request)
            .await
            .map_err(|status| rpc_error("CreateClient", &registration.id, status))?;

        if response.already_exists {
            return super::AlreadyExistsSnafu {
                id: &registration.id,
            }
            .fail();
        }
        debug!(client.id = %registration.id, "created Dex client");
        Ok(response
            .client
            .map(Into::into)
            .unwrap_or_else(|| registration.clone()))
    }

    async fn update(&self, id: &str, update: &ClientUpdate) -> Result<()> {
        // `public` is not part of the update call, Dex keeps the value it was created with.
        let request = UpdateClientReq {
            id: id.to_owned(),
            redirect_uris: update.redirect_uris.clone(),
            trusted_peers: update.trusted_peers.clone(),
            name: update.name.clone(),
            logo_url: update.logo_url.clone().unwrap_or_default(),
        };
        let response: UpdateClientResp = self
            .unary("/api.Dex/UpdateClient", request)
            .await
            .map_err(|status| rpc_error("UpdateClient", id, status))?;

        if response.not_found {
            return super::NotFoundSnafu { id }.fail();
        }
        debug!(client.id = id, "updated Dex client");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let request = DeleteClientReq { id: id.to_owned() };
        let response: DeleteClientResp = self
            .unary("/api.Dex/DeleteClient", request)
            .await
            .map_err(|status| rpc_error("DeleteClient", id, status))?;

        if response.not_found {
            return super::NotFoundSnafu { id }.fail();
        }
        debug!(client.id = id, "deleted Dex client");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ClientRegistration> {
        let request = GetClientReq { id: id.to_owned() };
        let response: GetClientResp = self
            .unary("/api.Dex/GetClient", request)
            .await
            .map_err(|status| match status.code() {
                tonic::Code::NotFound => super::Error::NotFound { id: id.to_owned() },
                _ => rpc_error("GetClient", id, status),
            })?;

        response.client.map(Into::into).ok_or_else(|| {
            super::EmptyResponseSnafu {
                operation: "GetClient",
                id,
            }
            .build()
        })
    }
}

/// A client registration as exchanged with Dex.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DexClientMessage {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub secret: String,
    #[prost(string, repeated, tag = "3")]
    pub redirect_uris: Vec<String>,
    #[prost(string, repeated, tag = "4")]
    pub trusted_peers: Vec<String>,
    #[prost(bool, tag = "5")]
    pub public: bool,
    #[prost(string, tag = "6")]
    pub name: String,
    #[prost(string, tag = "7")]
    pub logo_url: String,
}

impl From<&ClientRegistration> for DexClientMessage {
    fn from(registration: &ClientRegistration) -> Self {
        DexClientMessage {
            id: registration.id.clone(),
            secret: registration.secret.clone(),
            redirect_uris: registration.redirect_uris.clone(),
            trusted_peers: registration.trusted_peers.clone(),
            public: registration.public,
            name: registration.name.clone(),
            logo_url: registration.logo_url.clone().unwrap_or_default(),
        }
    }
}

impl From<DexClientMessage> for ClientRegistration {
    fn from(message: DexClientMessage) -> Self {
        ClientRegistration {
            id: message.id,
            name: message.name,
            secret: message.secret,
            redirect_uris: message.redirect_uris,
            trusted_peers: message.trusted_peers,
            public: message.public,
            logo_url: Some(message.logo_url).filter(|url| !url.is_empty()),
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateClientReq {
    #[prost(message, optional, tag = "1")]
    pub client: Option<DexClientMessage>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateClientResp {
    #[prost(bool, tag = "1")]
    pub already_exists: bool,
    #[prost(message, optional, tag = "2")]
    pub client: Option<DexClientMessage>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateClientReq {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, repeated, tag = "2")]
    pub redirect_uris: Vec<String>,
    #[prost(string, repeated, tag = "3")]
    pub trusted_peers: Vec<String>,
    #[prost(string, tag = "4")]
    pub name: String,
    #[prost(string, tag = "5")]
    pub logo_url: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateClientResp {
    #[prost(bool, tag = "1")]
    pub not_found: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeleteClientReq {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeleteClientResp {
    #[prost(bool, tag = "1")]
    pub not_found: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetClientReq {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetClientResp {
    #[prost(message, optional, tag = "1")]
    pub client: Option<DexClientMessage>,
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;

    #[test]
    fn create_request_matches_dex_wire_format() {
        let registration = ClientRegistration {
            id: "acme".to_owned(),
            secret: "s3".to_owned(),
            ..ClientRegistration::default()
        };
        let request = CreateClientReq {
            client: Some((&registration).into()),
        };

        // field 1 (client, length delimited) wrapping field 1 (id) and field 2 (secret)
        assert_eq!(
            request.encode_to_vec(),
            [0x0a, 0x0a, 0x0a, 0x04, b'a', b'c', b'm', b'e', 0x12, 0x02, b's', b'3']
        );
    }

    #[test]
    fn empty_logo_url_is_absent() {
        let registration: ClientRegistration = DexClientMessage {
            id: "acme".to_owned(),
            ..DexClientMessage::default()
        }
        .into();

        assert_eq!(registration.logo_url, None);
    }

    #[tokio::test]
    async fn missing_certificates_are_reported() {
        let directory = tempfile::tempdir().expect("temporary directory must be created");
        let options = DexOptions {
            host_and_port: "dex:35000".to_owned(),
            ca: directory.path().join("ca.crt"),
            cert: directory.path().join("tls.crt"),
            key: directory.path().join("tls.key"),
            insecure: false,
        };

        let error = DexClient::connect(&options)
            .await
            .expect_err("connecting without certificates must fail");
        assert!(matches!(
            error,
            ConnectError::ReadPem {
                what: "CA certificate",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn insecure_connection_is_lazy() {
        let options = DexOptions {
            host_and_port: "dex.invalid:35000".to_owned(),
            ca: PathBuf::new(),
            cert: PathBuf::new(),
            key: PathBuf::new(),
            insecure: true,
        };

        DexClient::connect(&options)
            .await
            .expect("lazy connection must not touch the network");
    }
}
