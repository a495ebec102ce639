//! Reconciles [`AlbAuth`] objects.
//!
//! An active `ALBAuth` owns a secret holding the credentials of its [`Client`], and has added the
//! OIDC authentication annotations to the referenced ingress. Once active it is left alone until
//! it gets deleted, at which point exactly the annotations it added are removed again. The secret
//! is garbage collected through its owner reference.
use std::{collections::BTreeMap, sync::Arc};

use k8s_openapi::api::{
    core::v1::{ObjectReference, Secret},
    networking::v1::Ingress,
};
use kube::{
    Resource, ResourceExt,
    api::ObjectMeta,
    runtime::{controller::Action, reflector::ObjectRef},
};
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{debug, info, instrument};

use super::{AlbAuthContext, MANAGED_BY_LABEL};
use crate::{
    annotations::{MergeMode, merge_annotations, well_known::alb},
    cli::APP_NAME,
    crd::v1::{AlbAuth, AlbAuthPhase, AlbAuthStatus, Client},
    finalizer::{self, FinalizerState},
    logging::controller::ReconcilerError,
    store::{self, ResourceStore},
};

pub const FINALIZER: &str = "albauth.dex.finalizers.betssongroup.com";

/// Key of the client ID in the credentials secret.
pub const CLIENT_ID_KEY: &str = "clientId";

/// Key of the client secret in the credentials secret.
pub const CLIENT_SECRET_KEY: &str = "clientSecret";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("object has no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to apply finalizer"))]
    Finalizer { source: finalizer::Error },

    #[snafu(display("failed to get client {client}"))]
    GetClient {
        source: store::Error,
        client: ObjectRef<Client>,
    },

    #[snafu(display("failed to get secret {secret}"))]
    GetSecret {
        source: store::Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("failed to create secret {secret}"))]
    CreateSecret {
        source: store::Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("object has no uid to be referenced as owner"))]
    NoOwnerReference,

    #[snafu(display("failed to get ingress {ingress}"))]
    GetIngress {
        source: store::Error,
        ingress: ObjectRef<Ingress>,
    },

    #[snafu(display("ingress {ingress} does not exist"))]
    IngressNotFound { ingress: ObjectRef<Ingress> },

    #[snafu(display("failed to serialize the identity provider annotation"))]
    SerializeIdpAnnotation { source: serde_json::Error },

    #[snafu(display("failed to update annotations of ingress {ingress}"))]
    UpdateIngress {
        source: store::Error,
        ingress: ObjectRef<Ingress>,
    },

    #[snafu(display("failed to update status"))]
    UpdateStatus { source: store::Error },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<kube::core::DynamicObject>> {
        match self {
            Error::GetClient { client, .. } => Some(client.clone().erase()),
            Error::GetSecret { secret, .. } | Error::CreateSecret { secret, .. } => {
                Some(secret.clone().erase())
            }
            Error::GetIngress { ingress, .. }
            | Error::IngressNotFound { ingress }
            | Error::UpdateIngress { ingress, .. } => Some(ingress.clone().erase()),
            Error::ObjectHasNoNamespace
            | Error::Finalizer { .. }
            | Error::NoOwnerReference
            | Error::SerializeIdpAnnotation { .. }
            | Error::UpdateStatus { .. } => None,
        }
    }
}

/// Name of the credentials secret created for the client named `client`.
pub fn secret_name(client: &str) -> String {
    format!("alb-secret-{client}")
}

#[instrument(skip(albauth, ctx), fields(albauth.name = %albauth.name_any()))]
pub async fn reconcile<S>(albauth: Arc<AlbAuth>, ctx: Arc<AlbAuthContext<S>>) -> Result<Action>
where
    S: ResourceStore,
{
    let albauth = Arc::unwrap_or_clone(albauth);

    match finalizer::finalize(&ctx.store, albauth, FINALIZER)
        .await
        .context(FinalizerSnafu)?
    {
        FinalizerState::Active(albauth) => apply(albauth, &ctx).await,
        FinalizerState::Cleanup(albauth) => cleanup(albauth, &ctx).await,
        FinalizerState::Released => Ok(Action::await_change()),
    }
}

async fn apply<S>(albauth: AlbAuth, ctx: &AlbAuthContext<S>) -> Result<Action>
where
    S: ResourceStore,
{
    if albauth.phase() == Some(AlbAuthPhase::Active) {
        debug!("already active, nothing to do");
        return Ok(Action::await_change());
    }

    let namespace = albauth.namespace().context(ObjectHasNoNamespaceSnafu)?;
    let client_name = &albauth.spec.client;
    let status = albauth.status.clone().unwrap_or_default();

    let client: Option<Client> = ctx
        .store
        .get(&namespace, client_name)
        .await
        .with_context(|_| GetClientSnafu {
            client: ObjectRef::new(client_name).within(&namespace),
        })?;
    let Some(client) = client else {
        info!(client.name = %client_name, "client not found");
        persist_status(
            ctx,
            &albauth,
            AlbAuthStatus {
                state: Some(AlbAuthPhase::NotFound),
                ..status
            },
        )
        .await?;
        return Ok(Action::requeue(ctx.resync_interval));
    };

    let secret = ensure_secret(ctx, &albauth, &client, &namespace).await?;
    let ingress = converge_ingress(ctx, &albauth, &namespace, MergeMode::Apply).await?;

    persist_status(
        ctx,
        &albauth,
        AlbAuthStatus {
            state: Some(AlbAuthPhase::Active),
            secret: Some(reference(&secret)),
            ingress: ingress.as_ref().map(reference),
        },
    )
    .await?;
    info!("authentication enabled");

    Ok(Action::requeue(ctx.resync_interval))
}

async fn cleanup<S>(albauth: AlbAuth, ctx: &AlbAuthContext<S>) -> Result<Action>
where
    S: ResourceStore,
{
    let namespace = albauth.namespace().context(ObjectHasNoNamespaceSnafu)?;

    let albauth = if albauth.phase() == Some(AlbAuthPhase::Deleting) {
        albauth
    } else {
        let status = AlbAuthStatus {
            state: Some(AlbAuthPhase::Deleting),
            ..albauth.status.clone().unwrap_or_default()
        };
        ctx.store
            .update_status(&albauth, &status)
            .await
            .context(UpdateStatusSnafu)?
    };

    converge_ingress(ctx, &albauth, &namespace, MergeMode::Retract).await?;

    finalizer::remove_finalizer(&ctx.store, &albauth, FINALIZER)
        .await
        .context(FinalizerSnafu)?;
    info!("authentication removed");

    Ok(Action::await_change())
}

async fn persist_status<S>(
    ctx: &AlbAuthContext<S>,
    albauth: &AlbAuth,
    status: AlbAuthStatus,
) -> Result<()>
where
    S: ResourceStore,
{
    if albauth.status.as_ref() != Some(&status) {
        ctx.store
            .update_status(albauth, &status)
            .await
            .context(UpdateStatusSnafu)?;
    }
    Ok(())
}

/// Returns the credentials secret of the client, creating it if it does not exist yet.
///
/// An existing secret is never updated.
async fn ensure_secret<S>(
    ctx: &AlbAuthContext<S>,
    albauth: &AlbAuth,
    client: &Client,
    namespace: &str,
) -> Result<Secret>
where
    S: ResourceStore,
{
    let name = secret_name(client.client_id());
    let secret_ref = ObjectRef::<Secret>::new(&name).within(namespace);

    let existing: Option<Secret> = ctx
        .store
        .get(namespace, &name)
        .await
        .with_context(|_| GetSecretSnafu {
            secret: secret_ref.clone(),
        })?;
    if let Some(secret) = existing {
        return Ok(secret);
    }

    let owner = albauth
        .controller_owner_ref(&())
        .context(NoOwnerReferenceSnafu)?;
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_owned()),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_owned(),
                APP_NAME.to_owned(),
            )])),
            owner_references: Some(vec![owner]),
            ..ObjectMeta::default()
        },
        string_data: Some(BTreeMap::from([
            (CLIENT_ID_KEY.to_owned(), client.client_id().to_owned()),
            (CLIENT_SECRET_KEY.to_owned(), client.spec.secret.clone()),
        ])),
        ..Secret::default()
    };

    let secret = ctx
        .store
        .create(&secret)
        .await
        .context(CreateSecretSnafu { secret: secret_ref })?;
    info!(secret.name = %secret.name_any(), "created credentials secret");
    Ok(secret)
}

/// Applies or retracts the authentication annotations on the referenced ingress.
///
/// Returns the ingress if it is handled by the AWS Load Balancer Controller. Ingresses handled by
/// other controllers are never touched. A missing ingress is an error when applying, and means
/// there is nothing left to retract otherwise.
async fn converge_ingress<S>(
    ctx: &AlbAuthContext<S>,
    albauth: &AlbAuth,
    namespace: &str,
    mode: MergeMode,
) -> Result<Option<Ingress>>
where
    S: ResourceStore,
{
    let ingress_ref = ObjectRef::<Ingress>::new(&albauth.spec.ingress).within(namespace);

    let ingress: Option<Ingress> = ctx
        .store
        .get(namespace, &albauth.spec.ingress)
        .await
        .with_context(|_| GetIngressSnafu {
            ingress: ingress_ref.clone(),
        })?;
    let Some(mut ingress) = ingress else {
        return match mode {
            MergeMode::Apply => IngressNotFoundSnafu {
                ingress: ingress_ref,
            }
            .fail(),
            MergeMode::Retract => {
                debug!(ingress.name = %albauth.spec.ingress, "ingress is gone, nothing to retract");
                Ok(None)
            }
        };
    };

    if !alb::is_alb_ingress(ingress.annotations()) {
        info!(
            ingress.name = %albauth.spec.ingress,
            "ingress is not handled by the AWS Load Balancer Controller, skipping"
        );
        return Ok(None);
    }

    let idp = alb::IdpOidc::new(&albauth.spec.issuer, &secret_name(&albauth.spec.client));
    let needed = alb::oidc_authentication(&idp).context(SerializeIdpAnnotationSnafu)?;
    let merged = merge_annotations(ingress.annotations(), &needed, mode);

    if &merged == ingress.annotations() {
        debug!(?mode, "ingress annotations are up to date");
        return Ok(Some(ingress));
    }

    *ingress.annotations_mut() = merged;
    let ingress = ctx
        .store
        .update(&ingress)
        .await
        .context(UpdateIngressSnafu {
            ingress: ingress_ref,
        })?;
    debug!(?mode, "updated ingress annotations");
    Ok(Some(ingress))
}

/// A reference to `object` suitable for the status, without the parts changing on every write.
fn reference<K>(object: &K) -> ObjectReference
where
    K: Resource<DynamicType = ()>,
{
    ObjectReference {
        resource_version: None,
        ..object.object_ref(&())
    }
}
