//! Helpers to guard objects with a finalizer, so that cleanup runs before the API server lets
//! the object go.
use kube::{Resource, ResourceExt};
use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::store::{self, ResourceStore, StoredResource};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to add finalizer {finalizer:?}"))]
    AddFinalizer {
        source: store::Error,
        finalizer: String,
    },

    #[snafu(display("failed to remove finalizer {finalizer:?}"))]
    RemoveFinalizer {
        source: store::Error,
        finalizer: String,
    },
}

/// Checks whether our own finalizer is in the list of finalizers for the provided object.
pub fn has_finalizer<K>(resource: &K, finalizer: &str) -> bool
where
    K: Resource,
{
    resource.finalizers().iter().any(|f| f == finalizer)
}

/// Checks whether the provided object has a deletion timestamp set.
/// If that is the case the object is in the process of being deleted pending the handling of all finalizers.
pub fn has_deletion_stamp<K>(resource: &K) -> bool
where
    K: Resource,
{
    resource.meta().deletion_timestamp.is_some()
}

/// Adds the passed finalizer to the list of finalizers for the resource and updates the resource.
///
/// Returns the updated resource, or a clone of the passed one if the finalizer was already present.
pub async fn add_finalizer<S, K>(store: &S, resource: &K, finalizer: &str) -> Result<K>
where
    S: ResourceStore,
    K: StoredResource,
{
    if has_finalizer(resource, finalizer) {
        return Ok(resource.clone());
    }

    let mut resource = resource.clone();
    resource.finalizers_mut().push(finalizer.to_owned());
    store
        .update(&resource)
        .await
        .context(AddFinalizerSnafu { finalizer })
}

/// Removes the passed finalizer from the resource.
///
/// Once no finalizers are left on a resource pending deletion, the API server removes it. The
/// returned object is the last state seen before that happened.
pub async fn remove_finalizer<S, K>(store: &S, resource: &K, finalizer: &str) -> Result<K>
where
    S: ResourceStore,
    K: StoredResource,
{
    if !has_finalizer(resource, finalizer) {
        return Ok(resource.clone());
    }

    let mut resource = resource.clone();
    resource.finalizers_mut().retain(|f| f != finalizer);
    store
        .update(&resource)
        .await
        .context(RemoveFinalizerSnafu { finalizer })
}

/// What a reconciler has to do with an object after [`finalize`] has run.
#[derive(Debug)]
pub enum FinalizerState<K> {
    /// The object is live and carries the finalizer. Converge it towards its desired state.
    Active(K),

    /// The object is pending deletion and still carries the finalizer. Release everything it
    /// owns, then call [`remove_finalizer`].
    Cleanup(K),

    /// The object is pending deletion and the finalizer is gone, nothing is left to do.
    Released,
}

/// Makes sure a live object carries `finalizer` and tells the caller which path to take.
pub async fn finalize<S, K>(store: &S, resource: K, finalizer: &str) -> Result<FinalizerState<K>>
where
    S: ResourceStore,
    K: StoredResource,
{
    match (has_deletion_stamp(&resource), has_finalizer(&resource, finalizer)) {
        (false, true) => Ok(FinalizerState::Active(resource)),
        (false, false) => {
            debug!(finalizer, "adding finalizer");
            let resource = add_finalizer(store, &resource, finalizer).await?;
            Ok(FinalizerState::Active(resource))
        }
        (true, true) => Ok(FinalizerState::Cleanup(resource)),
        (true, false) => Ok(FinalizerState::Released),
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    use super::*;
    use crate::test_utils::InMemoryStore;

    const FINALIZER: &str = "example.com/cleanup";

    fn config_map() -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("acme".to_owned()),
                namespace: Some("default".to_owned()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        }
    }

    #[tokio::test]
    async fn add_finalizer_is_idempotent() {
        let store = InMemoryStore::default();
        let created = store.create(&config_map()).await.expect("create must succeed");

        let once = add_finalizer(&store, &created, FINALIZER)
            .await
            .expect("adding must succeed");
        let twice = add_finalizer(&store, &once, FINALIZER)
            .await
            .expect("adding again must succeed");

        assert_eq!(twice.finalizers(), [FINALIZER.to_owned()]);
        assert_eq!(once.resource_version(), twice.resource_version());
    }

    #[tokio::test]
    async fn finalize_walks_through_the_lifecycle() {
        let store = InMemoryStore::default();
        let created = store.create(&config_map()).await.expect("create must succeed");

        let FinalizerState::Active(active) = finalize(&store, created, FINALIZER)
            .await
            .expect("finalize must succeed")
        else {
            panic!("live object must be active");
        };
        assert!(has_finalizer(&active, FINALIZER));

        store.request_deletion::<ConfigMap>("default", "acme");
        let pending: ConfigMap = store
            .get("default", "acme")
            .await
            .expect("get must succeed")
            .expect("object must still exist");

        let FinalizerState::Cleanup(pending) = finalize(&store, pending, FINALIZER)
            .await
            .expect("finalize must succeed")
        else {
            panic!("object pending deletion must be cleaned up");
        };

        remove_finalizer(&store, &pending, FINALIZER)
            .await
            .expect("removing must succeed");
        let gone: Option<ConfigMap> = store.get("default", "acme").await.expect("get must succeed");
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn stale_object_is_rejected() {
        let store = InMemoryStore::default();
        let created = store.create(&config_map()).await.expect("create must succeed");

        add_finalizer(&store, &created, FINALIZER)
            .await
            .expect("adding must succeed");
        let error = add_finalizer(&store, &created, "example.com/other")
            .await
            .expect_err("stale write must fail");

        assert!(matches!(
            error,
            Error::AddFinalizer {
                source: store::Error::Conflict { .. },
                ..
            }
        ));
    }
}
