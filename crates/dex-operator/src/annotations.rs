//! Non-destructive merging of annotation sets.
//!
//! The operator shares the annotation map of an ingress with its owner and other controllers, so
//! it may only ever add or remove the exact key/value pairs it is responsible for. Everything
//! else in the map is left untouched. See [`merge_annotations`].
//!
//! See <https://kubernetes.io/docs/concepts/overview/working-with-objects/annotations/>
//! for more information on Kubernetes annotations.
use std::collections::BTreeMap;

/// Whether a set of annotations should be added to or removed from an existing map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeMode {
    /// Sets every needed key/value pair the map does not already contain.
    Apply,

    /// Removes every needed key/value pair the map contains with exactly the needed value.
    Retract,
}

/// Computes the annotations an object should carry given its `current` annotations and the
/// `needed` set.
///
/// In [`MergeMode::Apply`] a needed key with a different value is overwritten. In
/// [`MergeMode::Retract`] a needed key with a different value is kept, as it was not written by
/// us. Keys outside the needed set are preserved in both modes.
///
/// Both modes are idempotent, and retracting a set after applying it restores the original map as
/// long as the original did not carry any of the needed keys.
pub fn merge_annotations(
    current: &BTreeMap<String, String>,
    needed: &BTreeMap<String, String>,
    mode: MergeMode,
) -> BTreeMap<String, String> {
    let mut merged = current.clone();

    for (key, value) in needed {
        let present = contains_pair(&merged, key, value);
        match mode {
            MergeMode::Apply if !present => {
                merged.insert(key.clone(), value.clone());
            }
            MergeMode::Retract if present => {
                merged.remove(key);
            }
            _ => {}
        }
    }

    merged
}

/// Returns `true` if `annotations` contains `key` with exactly `value`.
pub fn contains_pair(annotations: &BTreeMap<String, String>, key: &str, value: &str) -> bool {
    annotations.get(key).is_some_and(|current| current == value)
}

/// Well-known annotations used by other tools or standard conventions.
pub mod well_known {
    /// Annotations understood by the AWS Load Balancer Controller.
    ///
    /// See <https://kubernetes-sigs.github.io/aws-load-balancer-controller/latest/guide/ingress/annotations/#authentication>.
    pub mod alb {
        use std::collections::BTreeMap;

        use serde::Serialize;

        use super::super::contains_pair;

        /// The legacy ingress class annotation.
        pub const INGRESS_CLASS: &str = "kubernetes.io/ingress.class";

        /// The ingress class handled by the AWS Load Balancer Controller.
        pub const INGRESS_CLASS_ALB: &str = "alb";

        pub const AUTH_TYPE: &str = "alb.ingress.kubernetes.io/auth-type";
        pub const AUTH_TYPE_OIDC: &str = "oidc";

        pub const AUTH_ON_UNAUTHENTICATED_REQUEST: &str =
            "alb.ingress.kubernetes.io/auth-on-unauthenticated-request";
        pub const AUTH_ON_UNAUTHENTICATED_REQUEST_AUTHENTICATE: &str = "authenticate";

        pub const AUTH_IDP_OIDC: &str = "alb.ingress.kubernetes.io/auth-idp-oidc";

        /// The identity provider descriptor stored in the [`AUTH_IDP_OIDC`] annotation.
        ///
        /// Field order matters: the serialized form is compared verbatim when the annotation is
        /// removed again.
        #[derive(Clone, Debug, PartialEq, Eq, Serialize)]
        #[serde(rename_all = "PascalCase")]
        pub struct IdpOidc {
            pub issuer: String,
            pub authorization_endpoint: String,
            pub token_endpoint: String,
            pub user_info_endpoint: String,
            pub secret_name: String,
        }

        impl IdpOidc {
            /// Derives the endpoints by appending the Dex endpoint paths to `issuer`.
            pub fn new(issuer: &str, secret_name: &str) -> Self {
                Self {
                    issuer: issuer.to_owned(),
                    authorization_endpoint: format!("{issuer}/auth"),
                    token_endpoint: format!("{issuer}/token"),
                    user_info_endpoint: format!("{issuer}/userinfo"),
                    secret_name: secret_name.to_owned(),
                }
            }
        }

        /// Returns `true` if the annotations mark the ingress as handled by the AWS Load
        /// Balancer Controller.
        pub fn is_alb_ingress(annotations: &BTreeMap<String, String>) -> bool {
            contains_pair(annotations, INGRESS_CLASS, INGRESS_CLASS_ALB)
        }

        /// Constructs the annotations enabling OIDC authentication against `idp`.
        pub fn oidc_authentication(
            idp: &IdpOidc,
        ) -> Result<BTreeMap<String, String>, serde_json::Error> {
            let idp = serde_json::to_string(idp)?;

            Ok(BTreeMap::from([
                (AUTH_TYPE.to_owned(), AUTH_TYPE_OIDC.to_owned()),
                (
                    AUTH_ON_UNAUTHENTICATED_REQUEST.to_owned(),
                    AUTH_ON_UNAUTHENTICATED_REQUEST_AUTHENTICATE.to_owned(),
                ),
                (AUTH_IDP_OIDC.to_owned(), idp),
            ]))
        }
    }
}
