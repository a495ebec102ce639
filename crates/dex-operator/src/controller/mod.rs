//! The two controllers of the operator and the wiring that feeds them.
//!
//! Both reconcilers are plain async functions over a context holding their collaborators, which
//! keeps them independent of `kube::runtime` and testable against in-memory fakes. The
//! `run_*` functions hook them up to a [`Controller`].
use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    ResourceExt,
    runtime::{Controller, controller::Action, reflector::ObjectRef, watcher},
};

use crate::{
    cli::APP_NAME,
    crd::v1::{AlbAuth, Client},
    events::EventPublisher,
    identity::IdentityProvider,
    logging::controller::report_controller_reconciled,
    metrics::ClientMetrics,
    namespace::WatchNamespace,
    store::KubeStore,
};

pub mod albauth;
pub mod client;

pub const CLIENT_CONTROLLER_NAME: &str = "client";
pub const ALBAUTH_CONTROLLER_NAME: &str = "albauth";

/// Label put on every object created by the operator.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Delay before an object is reconciled again after a failed attempt.
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Collaborators of the [`Client`] reconciler.
pub struct ClientContext<S> {
    pub store: S,
    pub provider: Arc<dyn IdentityProvider>,
    pub events: Arc<dyn EventPublisher>,
    pub metrics: Arc<dyn ClientMetrics>,
    pub resync_interval: Duration,
}

/// Collaborators of the [`AlbAuth`] reconciler.
pub struct AlbAuthContext<S> {
    pub store: S,
    pub events: Arc<dyn EventPublisher>,
    pub resync_interval: Duration,
}

fn error_policy<K, E, C>(_obj: Arc<K>, _error: &E, _ctx: Arc<C>) -> Action {
    Action::requeue(ERROR_REQUEUE)
}

/// Runs the [`Client`] controller until the process receives a shutdown signal.
pub async fn run_client_controller(
    client: kube::Client,
    watch_namespace: &WatchNamespace,
    ctx: ClientContext<KubeStore>,
) {
    let events = ctx.events.clone();

    Controller::new(
        watch_namespace.get_api::<Client>(&client),
        watcher::Config::default(),
    )
    .shutdown_on_signal()
    .run(client::reconcile::<KubeStore>, error_policy, Arc::new(ctx))
    .for_each(|result| {
        report_controller_reconciled(events.as_ref(), CLIENT_CONTROLLER_NAME, &result);
        futures::future::ready(())
    })
    .await;
}

/// Runs the [`AlbAuth`] controller until the process receives a shutdown signal.
///
/// Besides the `ALBAuth` objects themselves, the controller watches the secrets it created and
/// the clients referenced by `ALBAuth` objects.
pub async fn run_albauth_controller(
    client: kube::Client,
    watch_namespace: &WatchNamespace,
    ctx: AlbAuthContext<KubeStore>,
) {
    let events = ctx.events.clone();

    let controller = Controller::new(
        watch_namespace.get_api::<AlbAuth>(&client),
        watcher::Config::default(),
    );
    let albauth_store = controller.store();

    controller
        .owns(
            watch_namespace.get_api::<Secret>(&client),
            watcher::Config::default().labels(&format!("{MANAGED_BY_LABEL}={APP_NAME}")),
        )
        .watches(
            watch_namespace.get_api::<Client>(&client),
            watcher::Config::default(),
            move |client| albauths_referencing(albauth_store.state(), &client),
        )
        .shutdown_on_signal()
        .run(albauth::reconcile::<KubeStore>, error_policy, Arc::new(ctx))
        .for_each(|result| {
            report_controller_reconciled(events.as_ref(), ALBAUTH_CONTROLLER_NAME, &result);
            futures::future::ready(())
        })
        .await;
}

/// Finds the [`AlbAuth`] objects referencing `client`.
fn albauths_referencing(
    albauths: impl IntoIterator<Item = Arc<AlbAuth>>,
    client: &Client,
) -> Vec<ObjectRef<AlbAuth>> {
    albauths
        .into_iter()
        .filter(|albauth| {
            albauth.namespace() == client.namespace() && albauth.spec.client == client.name_any()
        })
        .map(|albauth| ObjectRef::from_obj(albauth.as_ref()))
        .collect()
}
