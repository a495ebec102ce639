//! Scope of the objects the controllers watch, set through `--watch-namespace`.
use std::{convert::Infallible, str::FromStr};

use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Resource};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum WatchNamespace {
    /// Clients and `ALBAuth` objects in every namespace.
    #[default]
    All,
    One(String),
}

impl FromStr for WatchNamespace {
    type Err = Infallible;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(match input.trim() {
            "" => WatchNamespace::All,
            namespace => WatchNamespace::One(namespace.to_owned()),
        })
    }
}

impl WatchNamespace {
    /// The single watched namespace, [`None`] when watching all of them.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            WatchNamespace::All => None,
            WatchNamespace::One(namespace) => Some(namespace),
        }
    }

    /// An API restricted to the watched namespace.
    pub fn get_api<K>(&self, client: &kube::Client) -> Api<K>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        match self.namespace() {
            None => Api::all(client.clone()),
            Some(namespace) => Api::namespaced(client.clone(), namespace),
        }
    }
}
