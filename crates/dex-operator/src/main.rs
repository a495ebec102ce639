use std::sync::Arc;

use clap::Parser;
use dex_operator::{
    cli::{APP_NAME, Command, LOG_ENV, Opts, RunArguments},
    controller::{
        self, ALBAUTH_CONTROLLER_NAME, AlbAuthContext, CLIENT_CONTROLLER_NAME, ClientContext,
    },
    crd::{
        CustomResourceExt,
        v1::{AlbAuth, Client},
    },
    events::KubeEventPublisher,
    health,
    identity::dex::{self, DexClient},
    leader::{self, LeaderElector},
    logging::{self, initialize_logging},
    metrics::{self, OpenTelemetryClientMetrics},
    store::KubeStore,
};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to print CRDs"))]
    PrintCrds { source: dex_operator::crd::Error },

    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to configure the Dex client"))]
    ConnectDex { source: dex::ConnectError },

    #[snafu(display("failed to create Kubernetes client"))]
    CreateKubeClient { source: kube::Error },

    #[snafu(display("failed to set up metrics export"))]
    InitializeMetrics { source: metrics::Error },

    #[snafu(display("leader election failed"))]
    LeaderElection { source: leader::Error },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();

    match opts.cmd {
        Command::Crd => {
            Client::print_yaml_schema().context(PrintCrdsSnafu)?;
            AlbAuth::print_yaml_schema().context(PrintCrdsSnafu)
        }
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArguments) -> Result<(), Error> {
    initialize_logging(LOG_ENV, APP_NAME, &args.logging).context(InitializeLoggingSnafu)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        watch_namespace = ?args.watch_namespace,
        "starting {APP_NAME}"
    );

    let meter_provider =
        metrics::init_meter_provider(&args.metrics).context(InitializeMetricsSnafu)?;

    let provider = DexClient::connect(&args.dex)
        .await
        .context(ConnectDexSnafu)?;
    let kube_client = kube::Client::try_default()
        .await
        .context(CreateKubeClientSnafu)?;
    let store = KubeStore::new(kube_client, Some(APP_NAME.to_owned()));

    let health_addr = args.health_addr;
    let health = tokio::spawn(async move {
        if let Err(err) = health::serve(health_addr).await {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                "health endpoint stopped"
            );
        }
    });

    let client_ctx = ClientContext {
        store: store.clone(),
        provider: Arc::new(provider),
        events: Arc::new(KubeEventPublisher::new(
            store.as_kube_client(),
            CLIENT_CONTROLLER_NAME,
        )),
        metrics: Arc::new(OpenTelemetryClientMetrics::global(CLIENT_CONTROLLER_NAME)),
        resync_interval: *args.resync_interval,
    };
    let albauth_ctx = AlbAuthContext {
        store: store.clone(),
        events: Arc::new(KubeEventPublisher::new(
            store.as_kube_client(),
            ALBAUTH_CONTROLLER_NAME,
        )),
        resync_interval: *args.resync_interval,
    };

    let controllers = futures::future::join(
        controller::run_client_controller(
            store.as_kube_client(),
            &args.watch_namespace,
            client_ctx,
        ),
        controller::run_albauth_controller(
            store.as_kube_client(),
            &args.watch_namespace,
            albauth_ctx,
        ),
    );

    let result: Result<(), Error> = if args.leader_election.enabled {
        let options = &args.leader_election;
        let elector = LeaderElector::new(
            store.clone(),
            options.namespace(&args.watch_namespace),
            options.identity(),
            *options.lease_duration,
        );
        match elector.acquire().await {
            Ok(()) => tokio::select! {
                _ = controllers => Ok(()),
                error = elector.hold() => Err(error).context(LeaderElectionSnafu),
            },
            Err(error) => Err(error).context(LeaderElectionSnafu),
        }
    } else {
        controllers.await;
        Ok(())
    };

    health.abort();
    if let Some(meter_provider) = meter_provider {
        if let Err(err) = meter_provider.shutdown() {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                "failed to flush metrics"
            );
        }
    }
    tracing::info!("controllers stopped, shutting down");
    result
}
