//! Structured logging setup with tracing.
//!
//! Everything goes to stderr so that token counts and paths printed by the
//! CLI on stdout stay machine-readable.

use std::fmt;

use bark_core::{BarkError, BarkResult, LoggingConfig};
use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

/// Logging format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Text,
    /// One JSON object per event, span fields flattened in.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = BarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(BarkError::config(format!("unknown log format: {s}"))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

/// `RUST_LOG` when set, else `level`. Either must be a valid directive list
/// such as `bark_generation=debug,info`.
pub fn build_filter(level: &str) -> BarkResult<EnvFilter> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| level.to_string());
    EnvFilter::try_new(&directives)
        .map_err(|e| BarkError::config(format!("invalid log filter '{directives}': {e}")))
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE);
    match format {
        LogFormat::Text => layer.compact().boxed(),
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .boxed(),
    }
}

/// Install the global subscriber.
///
/// Fails on a bad filter, or when a subscriber is already installed.
pub fn init_logging(level: &str, format: LogFormat) -> BarkResult<()> {
    tracing_subscriber::registry()
        .with(build_filter(level)?)
        .with(output_layer(format))
        .try_init()
        .map_err(|e| BarkError::config(format!("logging already initialised: {e}")))
}

/// [`init_logging`] with the level and format of a config file.
pub fn init_logging_from_config(config: &LoggingConfig) -> BarkResult<()> {
    init_logging(&config.level, config.format.parse()?)
}
