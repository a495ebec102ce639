//! Leader election on a `coordination.k8s.io/v1` [`Lease`].
//!
//! Only the replica holding the lease runs the controllers. The holder renews the lease
//! periodically, other replicas take it over once it has not been renewed for the lease duration.
use std::time::Duration;

use k8s_openapi::{
    api::coordination::v1::{Lease, LeaseSpec},
    apimachinery::pkg::apis::meta::v1::MicroTime,
    jiff::{SignedDuration, Timestamp},
};
use kube::api::ObjectMeta;
use snafu::{ResultExt, Snafu};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    cli::APP_NAME,
    namespace::WatchNamespace,
    store::{self, ResourceStore},
};

/// Name of the lease, shared by all replicas of the operator.
pub const LEASE_NAME: &str = "02d43561.betssongroup.com";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read lease {namespace}/{LEASE_NAME}"))]
    ReadLease {
        source: store::Error,
        namespace: String,
    },

    #[snafu(display("failed to write lease {namespace}/{LEASE_NAME}"))]
    WriteLease {
        source: store::Error,
        namespace: String,
    },

    #[snafu(display("lost the lease, it was last renewed {since:?} ago"))]
    LeaseLost { since: Duration },
}

#[derive(clap::Args, Clone, Debug, PartialEq, Eq)]
pub struct LeaderElectionOptions {
    /// Only reconcile while holding the leader election lease.
    ///
    /// Required when running more than one replica.
    #[arg(long = "enable-leader-election", env = "ENABLE_LEADER_ELECTION")]
    pub enabled: bool,

    /// Namespace of the lease. Defaults to the watched namespace, or `default` when watching all
    /// namespaces.
    #[arg(long = "leader-election-namespace", env = "POD_NAMESPACE")]
    pub namespace: Option<String>,

    /// Identity of this replica in the lease. Defaults to the host name.
    #[arg(long = "leader-election-id", env = "POD_NAME")]
    pub identity: Option<String>,

    /// Time after which a lease that was not renewed can be taken over.
    #[arg(
        long = "leader-election-lease-duration",
        env = "LEADER_ELECTION_LEASE_DURATION",
        default_value = "15s"
    )]
    pub lease_duration: humantime::Duration,
}

impl LeaderElectionOptions {
    pub fn namespace(&self, watch_namespace: &WatchNamespace) -> String {
        self.namespace
            .clone()
            .or_else(|| watch_namespace.namespace().map(ToOwned::to_owned))
            .unwrap_or_else(|| "default".to_owned())
    }

    pub fn identity(&self) -> String {
        self.identity
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| format!("{APP_NAME}-{}", std::process::id()))
    }
}

/// What a replica may do with a lease in its current state.
#[derive(Debug, PartialEq, Eq)]
enum Claim {
    Renew,
    TakeOver,
    Wait,
}

fn claim(spec: Option<&LeaseSpec>, identity: &str, now: Timestamp) -> Claim {
    let Some(spec) = spec else {
        return Claim::TakeOver;
    };
    match spec.holder_identity.as_deref() {
        Some(holder) if holder == identity => return Claim::Renew,
        None | Some("") => return Claim::TakeOver,
        Some(_) => {}
    }

    let Some(renewed) = spec.renew_time.as_ref().or(spec.acquire_time.as_ref()) else {
        return Claim::TakeOver;
    };
    let duration = SignedDuration::from_secs(i64::from(spec.lease_duration_seconds.unwrap_or(0)));
    if now.duration_since(renewed.0) >= duration {
        Claim::TakeOver
    } else {
        Claim::Wait
    }
}

pub struct LeaderElector<S> {
    store: S,
    namespace: String,
    identity: String,
    lease_duration: Duration,
}

impl<S> LeaderElector<S>
where
    S: ResourceStore,
{
    pub fn new(store: S, namespace: String, identity: String, lease_duration: Duration) -> Self {
        LeaderElector {
            store,
            namespace,
            identity,
            lease_duration,
        }
    }

    /// Time within which the holder must renew the lease before it steps down.
    fn renew_deadline(&self) -> Duration {
        self.lease_duration * 2 / 3
    }

    fn retry_period(&self) -> Duration {
        self.lease_duration / 7
    }

    fn spec(&self, now: Timestamp, acquire_time: MicroTime, transitions: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(
                i32::try_from(self.lease_duration.as_secs()).unwrap_or(i32::MAX),
            ),
            acquire_time: Some(acquire_time),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(transitions),
            ..LeaseSpec::default()
        }
    }

    /// Makes a single attempt to acquire or renew the lease at `now`.
    ///
    /// Returns `true` if this replica holds the lease afterwards. Losing a race against another
    /// replica is not an error.
    pub async fn try_acquire(&self, now: Timestamp) -> Result<bool> {
        let lease: Option<Lease> = self
            .store
            .get(&self.namespace, LEASE_NAME)
            .await
            .with_context(|_| ReadLeaseSnafu {
                namespace: self.namespace.clone(),
            })?;

        let written = match lease {
            None => {
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(LEASE_NAME.to_owned()),
                        namespace: Some(self.namespace.clone()),
                        ..ObjectMeta::default()
                    },
                    spec: Some(self.spec(now, MicroTime(now), 0)),
                };
                self.store.create(&lease).await
            }
            Some(mut lease) => {
                let current = lease.spec.take();
                let spec = match claim(current.as_ref(), &self.identity, now) {
                    Claim::Wait => return Ok(false),
                    Claim::Renew => {
                        let current = current.unwrap_or_default();
                        self.spec(
                            now,
                            current.acquire_time.unwrap_or(MicroTime(now)),
                            current.lease_transitions.unwrap_or(0),
                        )
                    }
                    Claim::TakeOver => {
                        let transitions = current
                            .and_then(|spec| spec.lease_transitions)
                            .unwrap_or(0);
                        info!(identity = %self.identity, "taking over lease");
                        self.spec(now, MicroTime(now), transitions.saturating_add(1))
                    }
                };
                lease.spec = Some(spec);
                self.store.update(&lease).await
            }
        };

        match written {
            Ok(_) => Ok(true),
            Err(store::Error::Conflict { .. } | store::Error::AlreadyExists { .. }) => {
                debug!("another replica wrote the lease first");
                Ok(false)
            }
            Err(error) => Err(error).context(WriteLeaseSnafu {
                namespace: self.namespace.clone(),
            }),
        }
    }

    /// Waits until this replica holds the lease.
    pub async fn acquire(&self) -> Result<()> {
        info!(identity = %self.identity, namespace = %self.namespace, "waiting for leadership");
        loop {
            if self.try_acquire(Timestamp::now()).await? {
                info!(identity = %self.identity, "acquired leadership");
                return Ok(());
            }
            tokio::time::sleep(self.retry_period()).await;
        }
    }

    /// Keeps renewing the lease, returning once it could not be renewed within the renew
    /// deadline.
    pub async fn hold(&self) -> Error {
        let mut last_renewal = Instant::now();
        loop {
            tokio::time::sleep(self.retry_period()).await;

            match self.try_acquire(Timestamp::now()).await {
                Ok(true) => last_renewal = Instant::now(),
                Ok(false) => debug!("lease renewal did not go through"),
                Err(error) => warn!(
                    error = &error as &dyn std::error::Error,
                    "failed to renew lease"
                ),
            }

            let since = last_renewal.elapsed();
            if since >= self.renew_deadline() {
                return Error::LeaseLost { since };
            }
        }
    }
}
