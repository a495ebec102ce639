use std::path::PathBuf;

use snafu::{ResultExt, Snafu};
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    layer::{Layered, SubscriberExt},
    util::{SubscriberInitExt, TryInitError},
};

pub mod controller;
pub mod k8s_events;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to initialize rolling file appender in {directory:?}"))]
    InitRollingFileAppender {
        source: InitError,
        directory: PathBuf,
    },

    #[snafu(display("failed to install the global tracing subscriber"))]
    InitSubscriber { source: TryInitError },
}

/// Logging options of the operator.
#[derive(clap::Args, Clone, Debug, Default, PartialEq, Eq)]
pub struct LoggingOptions {
    /// Emit console logs as JSON instead of plain text.
    #[arg(long, env = "DEX_OPERATOR_LOG_JSON")]
    pub console_log_json: bool,

    /// Also write JSON logs to rotated files in this directory.
    #[arg(long, env = "DEX_OPERATOR_LOG_DIRECTORY")]
    pub log_directory: Option<PathBuf>,
}

type ConsoleLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// Initializes `tracing` logging with options from the environment variable
/// given in the `env` parameter.
///
/// We force users to provide a variable name so it can be different per deployment.
/// We encourage it to be the operator name plus `_LOG`, e.g. `DEX_OPERATOR_LOG`.
/// If the variable is not set, the maximum log level is set to INFO.
///
/// Log output can be copied to rotated files by setting [`LoggingOptions::log_directory`].
pub fn initialize_logging(env: &str, app_name: &str, options: &LoggingOptions) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(env)
        .from_env_lossy();

    let console: ConsoleLayer = if options.console_log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let file = match &options.log_directory {
        Some(directory) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::HOURLY)
                .filename_prefix(app_name)
                .filename_suffix("tracing-rs.json")
                .max_log_files(6)
                .build(directory)
                .context(InitRollingFileAppenderSnafu { directory })?;

            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(appender),
            )
        }
        None => None,
    };

    Registry::default()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .context(InitSubscriberSnafu)?;

    // need to delay logging until after tracing is initialized
    match &options.log_directory {
        Some(dir) => tracing::info!(directory = %dir.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }

    Ok(())
}
