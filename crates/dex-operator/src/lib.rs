//! Kubernetes operator managing OAuth2/OIDC clients in [Dex](https://dexidp.io) and wiring them
//! into the AWS ALB ingress controller's native OIDC authentication.
//!
//! Two resource kinds are reconciled:
//!
//! - [`crd::v1::Client`] registers a client with the identity provider and keeps the registration
//!   converged, see [`controller::client`].
//! - [`crd::v1::AlbAuth`] derives a credentials [`Secret`] from a `Client` and annotates an
//!   existing [`Ingress`] so that the load balancer authenticates against the identity provider,
//!   see [`controller::albauth`].
//!
//! [`Secret`]: k8s_openapi::api::core::v1::Secret
//! [`Ingress`]: k8s_openapi::api::networking::v1::Ingress

pub mod annotations;
pub mod cli;
pub mod controller;
pub mod crd;
pub mod events;
pub mod finalizer;
pub mod health;
pub mod identity;
pub mod leader;
pub mod logging;
pub mod metrics;
pub mod namespace;
pub mod store;

#[cfg(test)]
pub(crate) mod test_utils;

// External re-exports
pub use k8s_openapi;
pub use kube;
