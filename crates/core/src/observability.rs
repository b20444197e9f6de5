//! Structured logging setup shared by SummitHub binaries

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, for local development
    Pretty,
    /// One JSON object per line, for log shippers
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name attached to every span root
    pub service_name: String,
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl LogConfig {
    pub fn new(service_name: impl Into<String>, level: impl Into<String>, format: LogFormat) -> Self {
        Self {
            service_name: service_name.into(),
            level: level.into(),
            format,
        }
    }

    /// Filter used when `RUST_LOG` is not set, e.g. `summithub_tracking=info,actix_web=info`
    fn default_directive(&self) -> String {
        let crate_name = self.service_name.replace('-', "_");
        format!(
            "{crate_name}={level},summithub_core={level},actix_web=info",
            level = self.level
        )
    }
}

/// Install the global tracing subscriber
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?,
    }

    tracing::info!(service = %config.service_name, "Logging initialised");
    Ok(())
}
