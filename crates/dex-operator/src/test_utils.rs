//! In-memory stand-ins for the cluster, the identity provider and the event sink.
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType};
use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    events::EventPublisher,
    identity::{self, ClientRegistration, ClientUpdate, IdentityProvider},
    metrics::ClientMetrics,
    store::{self, ResourceStore, StoredResource, object_ref},
};

type ObjectKey = (String, String, String, String);

fn key_for<K: StoredResource>(namespace: &str, name: &str) -> ObjectKey {
    (
        K::api_version(&()).into_owned(),
        K::kind(&()).into_owned(),
        namespace.to_owned(),
        name.to_owned(),
    )
}

fn key_of<K: StoredResource>(object: &K) -> ObjectKey {
    let meta = object.meta();
    key_for::<K>(
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default(),
    )
}

fn resource_version(value: &Value) -> Option<&str> {
    value.pointer("/metadata/resourceVersion").and_then(Value::as_str)
}

fn has_finalizers(value: &Value) -> bool {
    value
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_some_and(|finalizers| !finalizers.is_empty())
}

/// A [`ResourceStore`] keeping objects in memory, mimicking the API server semantics the
/// reconcilers rely on: optimistic concurrency, separate status writes and finalizer handling.
///
/// Clones share the same objects.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    objects: Arc<Mutex<BTreeMap<ObjectKey, Value>>>,
    revision: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
    racing: Arc<Mutex<BTreeSet<ObjectKey>>>,
}

impl InMemoryStore {
    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<ObjectKey, Value>> {
        self.objects.lock().expect("store lock must not be poisoned")
    }

    /// Creates `object`, panicking if that is not possible.
    pub async fn insert<K: StoredResource>(&self, object: K) -> K {
        self.create(&object).await.expect("seeding the store must succeed")
    }

    /// Returns the stored object, panicking if it does not exist.
    pub async fn fetch<K: StoredResource>(&self, namespace: &str, name: &str) -> K {
        self.get(namespace, name)
            .await
            .expect("get must succeed")
            .expect("object must exist")
    }

    /// Number of successful create, update and status writes so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Marks the object as deleted, the same way the API server does when a delete request comes
    /// in. Objects without finalizers are removed immediately.
    pub fn request_deletion<K: StoredResource>(&self, namespace: &str, name: &str) {
        let key = key_for::<K>(namespace, name);
        let mut objects = self.objects();
        let Some(value) = objects.get_mut(&key) else {
            return;
        };

        if has_finalizers(value) {
            value["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
            value["metadata"]["resourceVersion"] = json!(self.next_revision());
        } else {
            objects.remove(&key);
        }
    }

    /// Lets another writer modify the object right after its next read, so that a write based on
    /// that read fails with a conflict.
    pub fn race_next_get<K: StoredResource>(&self, namespace: &str, name: &str) {
        self.racing
            .lock()
            .expect("lock must not be poisoned")
            .insert(key_for::<K>(namespace, name));
    }

    /// Replaces the status directly, bypassing all checks.
    pub fn set_status<K: StoredResource, S: Serialize>(&self, namespace: &str, name: &str, status: S) {
        let mut objects = self.objects();
        let value = objects
            .get_mut(&key_for::<K>(namespace, name))
            .expect("object must exist");
        value["status"] = serde_json::to_value(status).expect("status must serialize");
        value["metadata"]["resourceVersion"] = json!(self.next_revision());
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get<K: StoredResource>(&self, namespace: &str, name: &str) -> store::Result<Option<K>> {
        let key = key_for::<K>(namespace, name);
        let mut objects = self.objects();
        let found = objects
            .get(&key)
            .map(|value| serde_json::from_value(value.clone()).expect("stored object must deserialize"));

        let raced = self.racing.lock().expect("lock must not be poisoned").remove(&key);
        if let Some(value) = objects.get_mut(&key).filter(|_| raced) {
            value["metadata"]["resourceVersion"] = json!(self.next_revision());
        }

        Ok(found)
    }

    async fn create<K: StoredResource>(&self, object: &K) -> store::Result<K> {
        let key = key_of(object);
        let mut objects = self.objects();
        if objects.contains_key(&key) {
            return Err(store::Error::AlreadyExists {
                object: object_ref(object),
            });
        }

        let mut value = serde_json::to_value(object).expect("object must serialize");
        value["metadata"]["resourceVersion"] = json!(self.next_revision());
        value["metadata"]["uid"] = json!(format!("uid-{}-{}", key.1.to_lowercase(), key.3));
        objects.insert(key, value.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(serde_json::from_value(value).expect("stored object must deserialize"))
    }

    async fn update<K: StoredResource>(&self, object: &K) -> store::Result<K> {
        let key = key_of(object);
        let mut objects = self.objects();
        let Some(stored) = objects.get(&key) else {
            return Err(store::Error::ObjectMissing {
                object: object_ref(object),
            });
        };
        if resource_version(stored) != object.meta().resource_version.as_deref() {
            return Err(store::Error::Conflict {
                object: object_ref(object),
            });
        }

        let mut value = serde_json::to_value(object).expect("object must serialize");
        match stored.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Some(map) = value.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        value["metadata"]["resourceVersion"] = json!(self.next_revision());
        self.writes.fetch_add(1, Ordering::SeqCst);

        let pending_deletion = value.pointer("/metadata/deletionTimestamp").is_some();
        if pending_deletion && !has_finalizers(&value) {
            objects.remove(&key);
        } else {
            objects.insert(key, value.clone());
        }

        Ok(serde_json::from_value(value).expect("stored object must deserialize"))
    }

    async fn update_status<K, S>(&self, object: &K, status: &S) -> store::Result<K>
    where
        K: StoredResource,
        S: Serialize + Send + Sync,
    {
        let key = key_of(object);
        let mut objects = self.objects();
        let Some(stored) = objects.get_mut(&key) else {
            return Err(store::Error::ObjectMissing {
                object: object_ref(object),
            });
        };
        if resource_version(stored) != object.meta().resource_version.as_deref() {
            return Err(store::Error::Conflict {
                object: object_ref(object),
            });
        }

        stored["status"] = serde_json::to_value(status).expect("status must serialize");
        stored["metadata"]["resourceVersion"] = json!(self.next_revision());
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(serde_json::from_value(stored.clone()).expect("stored object must deserialize"))
    }
}

/// A call received by the [`FakeIdentityProvider`].
#[derive(Clone, Debug, PartialEq)]
pub enum IdentityCall {
    Create(ClientRegistration),
    Update(String, ClientUpdate),
    Delete(String),
    Get(String),
}

/// An [`IdentityProvider`] recording all calls, failing every call while [`Self::fail_with`]
/// is set.
#[derive(Debug, Default)]
pub struct FakeIdentityProvider {
    calls: Mutex<Vec<IdentityCall>>,
    clients: Mutex<BTreeMap<String, ClientRegistration>>,
    failure: Mutex<Option<String>>,
}

impl FakeIdentityProvider {
    pub fn calls(&self) -> Vec<IdentityCall> {
        self.calls.lock().expect("lock must not be poisoned").clone()
    }

    pub fn registered(&self, id: &str) -> Option<ClientRegistration> {
        self.clients
            .lock()
            .expect("lock must not be poisoned")
            .get(id)
            .cloned()
    }

    /// Makes all further calls fail as unavailable with `message`.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().expect("lock must not be poisoned") = Some(message.to_owned());
    }

    pub fn recover(&self) {
        *self.failure.lock().expect("lock must not be poisoned") = None;
    }

    fn record(&self, operation: &'static str, id: &str, call: IdentityCall) -> identity::Result<()> {
        self.calls.lock().expect("lock must not be poisoned").push(call);

        match self.failure.lock().expect("lock must not be poisoned").clone() {
            Some(message) => Err(identity::Error::Rpc {
                operation,
                id: id.to_owned(),
                code: tonic::Code::Unavailable,
                message,
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn create(&self, registration: &ClientRegistration) -> identity::Result<ClientRegistration> {
        self.record(
            "CreateClient",
            &registration.id,
            IdentityCall::Create(registration.clone()),
        )?;

        let mut clients = self.clients.lock().expect("lock must not be poisoned");
        if clients.contains_key(&registration.id) {
            return Err(identity::Error::AlreadyExists {
                id: registration.id.clone(),
            });
        }
        clients.insert(registration.id.clone(), registration.clone());
        Ok(registration.clone())
    }

    async fn update(&self, id: &str, update: &ClientUpdate) -> identity::Result<()> {
        self.record("UpdateClient", id, IdentityCall::Update(id.to_owned(), update.clone()))?;

        let mut clients = self.clients.lock().expect("lock must not be poisoned");
        let Some(client) = clients.get_mut(id) else {
            return Err(identity::Error::NotFound { id: id.to_owned() });
        };
        client.redirect_uris = update.redirect_uris.clone();
        client.trusted_peers = update.trusted_peers.clone();
        client.name = update.name.clone();
        client.logo_url = update.logo_url.clone();
        Ok(())
    }

    async fn delete(&self, id: &str) -> identity::Result<()> {
        self.record("DeleteClient", id, IdentityCall::Delete(id.to_owned()))?;

        match self.clients.lock().expect("lock must not be poisoned").remove(id) {
            Some(_) => Ok(()),
            None => Err(identity::Error::NotFound { id: id.to_owned() }),
        }
    }

    async fn get(&self, id: &str) -> identity::Result<ClientRegistration> {
        self.record("GetClient", id, IdentityCall::Get(id.to_owned()))?;

        self.registered(id)
            .ok_or_else(|| identity::Error::NotFound { id: id.to_owned() })
    }
}

/// An event captured by the [`RecordingEventPublisher`].
pub struct RecordedEvent {
    pub object: ObjectReference,
    pub event: Event,
}

// `Event` implements neither `Clone` nor `Debug`, so these are written out field by field.
impl Clone for RecordedEvent {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone(),
            event: Event {
                type_: self.event.type_,
                reason: self.event.reason.clone(),
                note: self.event.note.clone(),
                action: self.event.action.clone(),
                secondary: self.event.secondary.clone(),
            },
        }
    }
}

impl std::fmt::Debug for RecordedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordedEvent")
            .field("object", &self.object)
            .field("type_", &self.event.type_)
            .field("reason", &self.event.reason)
            .field("note", &self.event.note)
            .field("action", &self.event.action)
            .field("secondary", &self.event.secondary)
            .finish()
    }
}

impl RecordedEvent {
    pub fn is_warning(&self) -> bool {
        matches!(self.event.type_, EventType::Warning)
    }
}

#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().expect("lock must not be poisoned").clone()
    }

    /// The reasons of all recorded events in publishing order.
    pub fn reasons(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|recorded| recorded.event.reason)
            .collect()
    }
}

impl EventPublisher for RecordingEventPublisher {
    fn publish(&self, object: ObjectReference, event: Event) {
        self.events
            .lock()
            .expect("lock must not be poisoned")
            .push(RecordedEvent { object, event });
    }
}

#[derive(Debug, Default)]
pub struct CountingMetrics {
    created: AtomicU64,
    failed: AtomicU64,
}

impl CountingMetrics {
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

impl ClientMetrics for CountingMetrics {
    fn client_created(&self) {
        self.created.fetch_add(1, Ordering::SeqCst);
    }

    fn client_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}
