use std::io;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize the global tracing subscriber from configuration.
///
/// `RUST_LOG` overrides the configured level when set. Output goes to
/// stdout, or to `file_path` when one is configured.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let log_level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let writer: fmt::writer::BoxMakeWriter = match &config.file_path {
        Some(file_path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;
            fmt::writer::BoxMakeWriter::new(Arc::new(file))
        }
        None => fmt::writer::BoxMakeWriter::new(io::stdout),
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.format.as_str() == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(writer))
            .init();
    } else {
        registry
            .with(fmt::layer().pretty().with_target(true).with_writer(writer))
            .init();
    }

    Ok(())
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(parse_log_level("trace").is_ok());
        assert!(parse_log_level("debug").is_ok());
        assert!(parse_log_level("info").is_ok());
        assert!(parse_log_level("warn").is_ok());
        assert!(parse_log_level("error").is_ok());
        assert!(parse_log_level("verbose").is_err());
    }
}
