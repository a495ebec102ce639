//! Reconciles [`Client`] objects with their registration on the identity provider.
//!
//! | Phase              | Action                     | Success  | Failure              |
//! |--------------------|----------------------------|----------|----------------------|
//! | `CREATING`         | register the client        | `ACTIVE` | `FAILED`             |
//! | `ACTIVE`           | update the registration    | `ACTIVE` | `ACTIVE (degraded)`  |
//! | `ACTIVE (degraded)`| update the registration    | `ACTIVE` | `ACTIVE (degraded)`  |
//! | `FAILED`           | nothing                    |          |                      |
//!
//! Deleting a `Client` removes the registration before the finalizer is released, unless the
//! client never got registered.
use std::sync::Arc;

use kube::{Resource, ResourceExt, runtime::controller::Action};
use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{debug, info, instrument, warn};

use super::ClientContext;
use crate::{
    crd::v1::{Client, ClientPhase, ClientStatus},
    events,
    finalizer::{self, FinalizerState},
    identity::{self, ClientRegistration, ClientUpdate},
    logging::{controller::ReconcilerError, k8s_events::error_chain},
    store::{self, ResourceStore},
};

pub const FINALIZER: &str = "client.dex.finalizers.betssongroup.com";

const CLIENT_CREATION: &str = "ClientCreation";
const CLIENT_UPDATE: &str = "ClientUpdate";
const CLIENT_DELETION: &str = "ClientDeletion";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to apply finalizer"))]
    Finalizer { source: finalizer::Error },

    #[snafu(display("failed to update status"))]
    UpdateStatus { source: store::Error },

    #[snafu(display("failed to delete client {id:?} from the identity provider"))]
    DeleteRegistration { source: identity::Error, id: String },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

#[instrument(skip(client, ctx), fields(client.name = %client.name_any()))]
pub async fn reconcile<S>(client: Arc<Client>, ctx: Arc<ClientContext<S>>) -> Result<Action>
where
    S: ResourceStore,
{
    let client = Arc::unwrap_or_clone(client);

    match finalizer::finalize(&ctx.store, client, FINALIZER)
        .await
        .context(FinalizerSnafu)?
    {
        FinalizerState::Active(client) => apply(client, &ctx).await,
        FinalizerState::Cleanup(client) => cleanup(client, &ctx).await,
        FinalizerState::Released => Ok(Action::await_change()),
    }
}

/// Outcome of a call to the identity provider, reported once the resulting status is stored.
enum Outcome {
    Created,
    CreateFailed(String),
    Updated,
    Unchanged,
}

async fn apply<S>(client: Client, ctx: &ClientContext<S>) -> Result<Action>
where
    S: ResourceStore,
{
    let id = client.client_id();
    let current = client.status.clone().unwrap_or_default();

    let (status, outcome) = match client.phase() {
        ClientPhase::Creating => {
            info!("creating client");
            match ctx
                .provider
                .create(&ClientRegistration::from_client(&client))
                .await
            {
                Ok(registration) => {
                    info!(client.id = %registration.id, "client created");
                    (
                        phase_status(ClientPhase::Active, String::new()),
                        Outcome::Created,
                    )
                }
                Err(error) => {
                    let message = error_chain(&error);
                    warn!(error = &error as &dyn std::error::Error, "client create failed");
                    (
                        phase_status(ClientPhase::Failed, message.clone()),
                        Outcome::CreateFailed(message),
                    )
                }
            }
        }
        ClientPhase::Active | ClientPhase::ActiveDegraded => {
            debug!("updating client");
            match ctx
                .provider
                .update(id, &ClientUpdate::from_client(&client))
                .await
            {
                Ok(()) => (
                    phase_status(ClientPhase::Active, String::new()),
                    Outcome::Updated,
                ),
                Err(error) => {
                    warn!(error = &error as &dyn std::error::Error, "client update failed");
                    (
                        phase_status(ClientPhase::ActiveDegraded, error_chain(&error)),
                        Outcome::Unchanged,
                    )
                }
            }
        }
        ClientPhase::Failed => {
            debug!("client failed to register before, not retrying");
            (current.clone(), Outcome::Unchanged)
        }
        ClientPhase::Deleting => {
            warn!("client is marked as deleting, but no deletion was requested");
            return Ok(Action::await_change());
        }
    };

    // An unset phase still has to be persisted.
    if status != current || client.status.is_none() {
        ctx.store
            .update_status(&client, &status)
            .await
            .context(UpdateStatusSnafu)?;
    }

    let object = client.object_ref(&());
    match outcome {
        Outcome::Created => {
            ctx.events
                .publish(object, events::normal(CLIENT_CREATION, format!("client {id}")));
            ctx.metrics.client_created();
        }
        Outcome::CreateFailed(message) => {
            ctx.events.publish(
                object,
                events::warning(CLIENT_CREATION, format!("client {id}: {message}")),
            );
            ctx.metrics.client_failed();
        }
        Outcome::Updated => ctx
            .events
            .publish(object, events::normal(CLIENT_UPDATE, format!("client {id}"))),
        Outcome::Unchanged => {}
    }

    Ok(Action::requeue(ctx.resync_interval))
}

async fn cleanup<S>(client: Client, ctx: &ClientContext<S>) -> Result<Action>
where
    S: ResourceStore,
{
    let client = match client.phase() {
        ClientPhase::Failed | ClientPhase::Deleting => client,
        _ => {
            let status = ClientStatus {
                state: Some(ClientPhase::Deleting),
                ..client.status.clone().unwrap_or_default()
            };
            ctx.store
                .update_status(&client, &status)
                .await
                .context(UpdateStatusSnafu)?
        }
    };
    ctx.events.publish(
        client.object_ref(&()),
        events::normal(CLIENT_DELETION, format!("client {}", client.client_id())),
    );

    let client = if client.phase() == ClientPhase::Failed {
        debug!("client was never registered, nothing to delete");
        client
    } else {
        delete_registration(client, ctx).await?
    };

    finalizer::remove_finalizer(&ctx.store, &client, FINALIZER)
        .await
        .context(FinalizerSnafu)?;
    Ok(Action::await_change())
}

/// Removes the registration of `client`, recording a failure in its status.
async fn delete_registration<S>(client: Client, ctx: &ClientContext<S>) -> Result<Client>
where
    S: ResourceStore,
{
    let id = client.client_id();
    info!("deleting client");
    match ctx.provider.delete(id).await {
        Ok(()) => Ok(client),
        Err(identity::Error::NotFound { .. }) => {
            info!("client is already gone from the identity provider");
            Ok(client)
        }
        Err(error) => {
            let message = error_chain(&error);
            warn!(error = &error as &dyn std::error::Error, "client delete failed");
            ctx.store
                .update_status(&client, &phase_status(ClientPhase::Deleting, message.clone()))
                .await
                .context(UpdateStatusSnafu)?;
            ctx.events.publish(
                client.object_ref(&()),
                events::warning(CLIENT_DELETION, format!("client {id}: {message}")),
            );

            Err(error).context(DeleteRegistrationSnafu { id })
        }
    }
}

fn phase_status(phase: ClientPhase, message: String) -> ClientStatus {
    ClientStatus {
        state: Some(phase),
        message,
    }
}
