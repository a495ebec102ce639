//! Access to the Kubernetes objects the reconcilers read and write.
//!
//! The reconcilers only talk to the API server through [`ResourceStore`], which keeps them
//! testable without a cluster. [`KubeStore`] is the implementation backed by a
//! [`kube::Client`].
//!
//! Every write is optimistic: the `resourceVersion` of the passed object must match the stored
//! one or the write fails with [`Error::Conflict`]. Callers must therefore continue with the
//! object returned by a write, never with the one they passed in.
use std::fmt::Debug;

use async_trait::async_trait;
use kube::{
    Api, Resource, ResourceExt,
    api::{DynamicObject, Patch, PatchParams, PostParams},
    core::NamespaceResourceScope,
    runtime::reflector::ObjectRef,
};
use serde::{Serialize, de::DeserializeOwned};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{instrument, trace};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to get {object}"))]
    GetObject {
        source: kube::Error,
        object: ObjectRef<DynamicObject>,
    },

    #[snafu(display("failed to create {object}"))]
    CreateObject {
        source: kube::Error,
        object: ObjectRef<DynamicObject>,
    },

    #[snafu(display("failed to update {object}"))]
    UpdateObject {
        source: kube::Error,
        object: ObjectRef<DynamicObject>,
    },

    #[snafu(display("failed to update status of {object}"))]
    UpdateStatus {
        source: kube::Error,
        object: ObjectRef<DynamicObject>,
    },

    #[snafu(display("{object} was modified concurrently"))]
    Conflict { object: ObjectRef<DynamicObject> },

    #[snafu(display("{object} already exists"))]
    AlreadyExists { object: ObjectRef<DynamicObject> },

    #[snafu(display("{object} does not exist"))]
    ObjectMissing { object: ObjectRef<DynamicObject> },

    #[snafu(display("failed to serialize status of {object}"))]
    SerializeStatus {
        source: serde_json::Error,
        object: ObjectRef<DynamicObject>,
    },

    #[snafu(display("object is missing key {key:?}"))]
    MissingObjectKey { key: &'static str },
}

/// Objects which can be read and written through a [`ResourceStore`].
///
/// All objects handled by the operator live in a namespace.
pub trait StoredResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredResource for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static
{
}

/// Read and write access to namespaced Kubernetes objects.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Retrieves the object with the given identity, [`None`] if it does not exist.
    async fn get<K: StoredResource>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Creates a new object.
    ///
    /// Fails with [`Error::AlreadyExists`] if an object with the same identity exists.
    async fn create<K: StoredResource>(&self, object: &K) -> Result<K>;

    /// Replaces the metadata and spec of an existing object. The status is left untouched.
    ///
    /// Removing the last finalizer from an object which is pending deletion lets the object go
    /// away.
    async fn update<K: StoredResource>(&self, object: &K) -> Result<K>;

    /// Replaces the status of an existing object.
    async fn update_status<K, S>(&self, object: &K, status: &S) -> Result<K>
    where
        K: StoredResource,
        S: Serialize + Send + Sync;
}

/// Returns the type erased reference of `object`, used in error messages.
pub(crate) fn object_ref<K: StoredResource>(object: &K) -> ObjectRef<DynamicObject> {
    ObjectRef::from_obj(object).erase()
}

fn named_ref<K: StoredResource>(namespace: &str, name: &str) -> ObjectRef<DynamicObject> {
    ObjectRef::<K>::new(name).within(namespace).erase()
}

fn is_conflict(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(ae) if ae.code == 409)
}

/// A [`ResourceStore`] talking to the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
    post_params: PostParams,
    patch_params: PatchParams,
}

impl KubeStore {
    pub fn new(client: kube::Client, field_manager: Option<String>) -> Self {
        KubeStore {
            client,
            post_params: PostParams {
                field_manager: field_manager.clone(),
                ..PostParams::default()
            },
            patch_params: PatchParams {
                field_manager,
                ..PatchParams::default()
            },
        }
    }

    /// Returns a [`kube::Client`] that can be freely used.
    /// It does not need to be cloned before first use.
    pub fn as_kube_client(&self) -> kube::Client {
        self.client.clone()
    }

    fn api<K: StoredResource>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn api_for<K: StoredResource>(&self, object: &K) -> Result<(Api<K>, String)> {
        let namespace = object
            .meta()
            .namespace
            .as_deref()
            .context(MissingObjectKeySnafu {
                key: "metadata/namespace",
            })?;
        let name = object
            .meta()
            .name
            .clone()
            .context(MissingObjectKeySnafu {
                key: "metadata/name",
            })?;
        Ok((self.api(namespace), name))
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    #[instrument(skip(self))]
    async fn get<K: StoredResource>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .with_context(|_| GetObjectSnafu {
                object: named_ref::<K>(namespace, name),
            })
    }

    async fn create<K: StoredResource>(&self, object: &K) -> Result<K> {
        let (api, _) = self.api_for(object)?;
        trace!(object = %object_ref(object), "creating object");

        match api.create(&self.post_params, object).await {
            Ok(created) => Ok(created),
            Err(error) if is_conflict(&error) => AlreadyExistsSnafu {
                object: object_ref(object),
            }
            .fail(),
            Err(error) => Err(error).context(CreateObjectSnafu {
                object: object_ref(object),
            }),
        }
    }

    async fn update<K: StoredResource>(&self, object: &K) -> Result<K> {
        let (api, name) = self.api_for(object)?;
        trace!(object = %object_ref(object), "replacing object");

        match api.replace(&name, &self.post_params, object).await {
            Ok(updated) => Ok(updated),
            Err(error) if is_conflict(&error) => ConflictSnafu {
                object: object_ref(object),
            }
            .fail(),
            Err(kube::Error::Api(ae)) if ae.code == 404 => ObjectMissingSnafu {
                object: object_ref(object),
            }
            .fail(),
            Err(error) => Err(error).context(UpdateObjectSnafu {
                object: object_ref(object),
            }),
        }
    }

    async fn update_status<K, S>(&self, object: &K, status: &S) -> Result<K>
    where
        K: StoredResource,
        S: Serialize + Send + Sync,
    {
        let (api, name) = self.api_for(object)?;
        let status = serde_json::to_value(status).with_context(|_| SerializeStatusSnafu {
            object: object_ref(object),
        })?;

        // The resourceVersion turns the merge patch into a conditional write.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": object.resource_version() },
            "status": status,
        });
        trace!(object = %object_ref(object), "patching status");

        match api
            .patch_status(&name, &self.patch_params, &Patch::Merge(&patch))
            .await
        {
            Ok(updated) => Ok(updated),
            Err(error) if is_conflict(&error) => ConflictSnafu {
                object: object_ref(object),
            }
            .fail(),
            Err(error) => Err(error).context(UpdateStatusSnafu {
                object: object_ref(object),
            }),
        }
    }
}
