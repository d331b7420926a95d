//! Process-wide tracing setup.
//!
//! Pool events carry an `event` field (`pool_started`, `connection_failed`,
//! ...) next to `destination`, `slot` and `incarnation`. JSON output flattens
//! them into each line; compact output is meant for a terminal.

use std::fmt;
use std::str::FromStr;
use tracing_subscriber::{EnvFilter, fmt as subscriber};

const DEFAULT_DIRECTIVES: &str = "info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}' (expected json or compact)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Compact => "compact",
        })
    }
}

/// Install the global subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Logs go to stderr so results printed on stdout stay machine-readable.
/// With `TOKIO_CONSOLE` set, tokio-console's subscriber is installed instead.
pub fn init_logging(format: LogFormat) {
    if std::env::var_os("TOKIO_CONSOLE").is_some() {
        console_subscriber::init();
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let builder = subscriber()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().flatten_event(true).init(),
        LogFormat::Compact => builder.compact().with_target(false).init(),
    }
}
