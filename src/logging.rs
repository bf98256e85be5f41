// src/logging.rs

//! Logging setup for `trainflow` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `TRAINFLOW_LOG` environment variable, as an `EnvFilter` directive
//!    (e.g. "info", "trainflow::engine=debug")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that `validate` and `run` output on stdout
//! stays machine readable.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "TRAINFLOW_LOG";

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = resolve_filter(cli_level, std::env::var(LOG_ENV).ok().as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))?;

    Ok(())
}

fn resolve_filter(cli_level: Option<LogLevel>, env_value: Option<&str>) -> EnvFilter {
    if let Some(lvl) = cli_level {
        return EnvFilter::new(level_from_log_level(lvl).as_str());
    }
    env_value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
    match lvl {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_level_wins_over_env() {
        let filter = resolve_filter(Some(LogLevel::Warn), Some("trace"));
        assert!(filter.to_string().eq_ignore_ascii_case("warn"));
    }

    #[test]
    fn env_directive_is_used_when_valid() {
        let filter = resolve_filter(None, Some("trainflow=debug"));
        assert!(filter.to_string().eq_ignore_ascii_case("trainflow=debug"));
    }

    #[test]
    fn falls_back_to_info() {
        assert!(resolve_filter(None, None).to_string().eq_ignore_ascii_case("info"));
        assert!(resolve_filter(None, Some("  ")).to_string().eq_ignore_ascii_case("info"));
    }
}
