use k8s_openapi::api::core::v1::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Enables OIDC authentication on an existing ALB [`Ingress`] using a [`Client`] registered with
/// the identity provider.
///
/// The operator creates a credentials secret for the referenced client and adds the ALB
/// authentication annotations to the referenced ingress. The ingress itself is never created or
/// deleted, removing the `ALBAuth` only removes the annotations it added.
///
/// [`Ingress`]: k8s_openapi::api::networking::v1::Ingress
/// [`Client`]: super::Client
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[kube(
    group = "dex.betssongroup.com",
    version = "v1",
    kind = "ALBAuth",
    root = "AlbAuth",
    namespaced,
    status = "AlbAuthStatus",
    printcolumn = r#"{"name":"Client","type":"string","jsonPath":".spec.client"}"#,
    printcolumn = r#"{"name":"Ingress","type":"string","jsonPath":".spec.ingress"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AlbAuthSpec {
    /// Name of the `Client` in the same namespace.
    pub client: String,

    /// Name of the ALB ingress in the same namespace.
    pub ingress: String,

    /// Issuer URL of the identity provider, e.g. `https://dex.example.com`.
    pub issuer: String,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbAuthStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<AlbAuthPhase>,

    /// The credentials secret created for the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<ObjectReference>,

    /// The ingress carrying the authentication annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<ObjectReference>,
}

/// Lifecycle phase of an [`AlbAuth`].
#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, Hash, JsonSchema, PartialEq, Serialize,
)]
pub enum AlbAuthPhase {
    #[serde(rename = "creating")]
    #[strum(serialize = "creating")]
    Creating,

    #[serde(rename = "active")]
    #[strum(serialize = "active")]
    Active,

    #[serde(rename = "active (degraded)")]
    #[strum(serialize = "active (degraded)")]
    ActiveDegraded,

    #[serde(rename = "failed")]
    #[strum(serialize = "failed")]
    Failed,

    #[serde(rename = "deleting")]
    #[strum(serialize = "deleting")]
    Deleting,

    /// The referenced client does not exist (yet).
    #[serde(rename = "notfound")]
    #[strum(serialize = "notfound")]
    NotFound,
}

impl AlbAuth {
    pub fn phase(&self) -> Option<AlbAuthPhase> {
        self.status.as_ref().and_then(|status| status.state)
    }
}
