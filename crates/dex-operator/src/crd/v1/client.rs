use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// An OAuth2/OIDC client registered with the identity provider.
///
/// The name of the resource is used verbatim as the client ID on the identity provider side.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[kube(
    group = "dex.betssongroup.com",
    version = "v1",
    kind = "Client",
    namespaced,
    status = "ClientStatus",
    shortname = "dexclient",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Message","type":"string","jsonPath":".status.message"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClientSpec {
    /// The display name of the client.
    #[schemars(length(min = 4))]
    #[serde(default)]
    pub name: String,

    /// The shared OIDC secret.
    #[schemars(length(min = 2))]
    #[serde(default)]
    pub secret: String,

    /// Marks the client as public.
    #[serde(default)]
    pub public: bool,

    /// URIs the identity provider may redirect to after authentication.
    #[serde(default, rename = "redirectURIs")]
    pub redirect_uris: Vec<String>,

    /// IDs of clients which may issue tokens on behalf of this client.
    #[serde(default)]
    pub trusted_peers: Vec<String>,

    /// URL of the logo shown on the consent page.
    #[serde(default, rename = "logoURL", skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ClientPhase>,

    /// The last error reported by the identity provider, empty if the last attempt succeeded.
    // Always serialized, status updates are merge patches and an omitted field would never clear.
    #[serde(default)]
    pub message: String,
}

/// Lifecycle phase of a [`Client`].
#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, Hash, JsonSchema, PartialEq, Serialize,
)]
pub enum ClientPhase {
    #[serde(rename = "CREATING")]
    #[strum(serialize = "CREATING")]
    Creating,

    #[serde(rename = "ACTIVE")]
    #[strum(serialize = "ACTIVE")]
    Active,

    /// The client exists, but the last update of its registration failed.
    #[serde(rename = "ACTIVE (degraded)")]
    #[strum(serialize = "ACTIVE (degraded)")]
    ActiveDegraded,

    /// The registration could not be created. No further attempts are made.
    #[serde(rename = "FAILED")]
    #[strum(serialize = "FAILED")]
    Failed,

    #[serde(rename = "DELETING")]
    #[strum(serialize = "DELETING")]
    Deleting,
}

impl Client {
    /// The client ID used on the identity provider.
    pub fn client_id(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// The current phase, a missing phase is treated as [`ClientPhase::Creating`].
    pub fn phase(&self) -> ClientPhase {
        self.status
            .as_ref()
            .and_then(|status| status.state)
            .unwrap_or(ClientPhase::Creating)
    }
}
