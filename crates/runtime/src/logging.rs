//! Structured logging driven by the `logging` section of [`RuntimeConfig`].
//!
//! [`RuntimeConfig`]: tts_core::RuntimeConfig

use tracing::debug;
use tracing_subscriber::{EnvFilter, Layer, fmt::format::FmtSpan, prelude::*};
use tts_core::{LoggingConfig, TtsError, TtsResult};

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event, with thread ids.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}")),
        }
    }
}

/// Build the level filter. `RUST_LOG` overrides the configured level.
fn env_filter(level: &str) -> TtsResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| TtsError::config(format!("invalid log level '{level}': {e}"))),
    }
}

/// Install the global subscriber described by `config`.
///
/// Events go to stderr so stdout stays free for command output. Span close
/// events carry timings for the model's instrumented passes. Only the first
/// successful call installs a subscriber; later calls are no-ops.
///
/// # Example
/// ```ignore
/// use tts_core::LoggingConfig;
/// runtime::logging::init_logging(&LoggingConfig {
///     level: "acoustic_model=debug,info".into(),
///     format: "json".into(),
/// })?;
/// ```
pub fn init_logging(config: &LoggingConfig) -> TtsResult<()> {
    let format: LogFormat = config.format.parse().map_err(TtsError::config)?;
    let filter = env_filter(&config.level)?;

    let layer = match format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
    };

    if tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_err()
    {
        debug!("global subscriber already installed");
    }
    Ok(())
}
