//! Command line interface of the operator.
//!
//! ```text
//! dex-operator crd                       # print the CRDs
//! dex-operator run --dex-grpc dex:35000  # run the controllers
//! ```
use std::net::SocketAddr;

use clap::{Args, Parser};

use crate::{
    identity::dex::DexOptions, leader::LeaderElectionOptions, logging::LoggingOptions,
    metrics::MetricsOptions, namespace::WatchNamespace,
};

pub const APP_NAME: &str = "dex-operator";

/// Environment variable holding the log filter directives, e.g. `dex_operator=debug`.
pub const LOG_ENV: &str = "DEX_OPERATOR_LOG";

#[derive(Debug, Parser)]
#[command(name = "Dex Operator", author, version, about)]
pub struct Opts {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, PartialEq, Eq, Parser)]
pub enum Command {
    /// Print CRD objects.
    Crd,

    /// Run the operator.
    Run(RunArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(long_about = "")]
pub struct RunArguments {
    /// Provides a specific namespace to watch (instead of watching all namespaces)
    #[arg(long, env, default_value = "")]
    pub watch_namespace: WatchNamespace,

    /// Interval after which every object is reconciled again, even without changes.
    #[arg(long, env, default_value = "10m")]
    pub resync_interval: humantime::Duration,

    /// Address the health endpoints bind to.
    #[arg(long, env, default_value = "0.0.0.0:9440")]
    pub health_addr: SocketAddr,

    // All flattened sub structs are placed at the end to keep the help headings correct.
    #[command(flatten)]
    pub dex: DexOptions,

    #[command(flatten)]
    pub leader_election: LeaderElectionOptions,

    #[command(flatten)]
    pub logging: LoggingOptions,

    #[command(flatten)]
    pub metrics: MetricsOptions,
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert()
    }

    #[test]
    fn run_uses_defaults() {
        let opts = Opts::try_parse_from(["dex-operator", "run"]).expect("defaults must parse");
        let Command::Run(args) = opts.cmd else {
            panic!("expected the run command");
        };

        assert_eq!(args.watch_namespace, WatchNamespace::All);
        assert_eq!(*args.resync_interval, Duration::from_secs(600));
        assert_eq!(args.health_addr, "0.0.0.0:9440".parse().expect("valid address"));
        assert_eq!(args.dex.host_and_port, "dex:35000");
        assert_eq!(args.dex.ca, PathBuf::from("/etc/dex/tls/ca.crt"));
        assert!(!args.dex.insecure);
        assert!(!args.leader_election.enabled);
        assert_eq!(*args.leader_election.lease_duration, Duration::from_secs(15));
        assert_eq!(args.metrics.endpoint, None);
        assert_eq!(*args.metrics.export_interval, Duration::from_secs(30));
    }

    #[test]
    fn run_accepts_overrides() {
        let opts = Opts::try_parse_from([
            "dex-operator",
            "run",
            "--watch-namespace",
            "auth",
            "--resync-interval",
            "30s",
            "--dex-grpc",
            "dex.auth:5557",
            "--dex-grpc-insecure",
            "--enable-leader-election",
            "--leader-election-namespace",
            "ops",
            "--metrics-endpoint",
            "http://otel-collector:4317",
        ])
        .expect("arguments must parse");
        let Command::Run(args) = opts.cmd else {
            panic!("expected the run command");
        };

        assert_eq!(args.watch_namespace, WatchNamespace::One("auth".to_owned()));
        assert_eq!(*args.resync_interval, Duration::from_secs(30));
        assert_eq!(args.dex.host_and_port, "dex.auth:5557");
        assert!(args.dex.insecure);
        assert!(args.leader_election.enabled);
        assert_eq!(args.leader_election.namespace.as_deref(), Some("ops"));
        assert_eq!(
            args.metrics.endpoint.as_deref(),
            Some("http://otel-collector:4317")
        );
    }

    #[test]
    fn crd_takes_no_arguments() {
        let opts = Opts::try_parse_from(["dex-operator", "crd"]).expect("crd must parse");
        assert_eq!(opts.cmd, Command::Crd);
    }
}
