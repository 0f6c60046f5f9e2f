//! Logging setup
//!
//! The library only emits `tracing` events; hosts call [`init_logger`] once
//! at startup to get them on stdout.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global subscriber
///
/// # Arguments
/// * `level` - Default filter (e.g., "info", "printer_bridge=debug"); `RUST_LOG` wins when set
/// * `json_format` - JSON lines for production, human-readable for development
///
/// Fails if a global subscriber is already installed.
pub fn init_logger(level: &str, json_format: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let registry = tracing_subscriber::registry().with(env_filter);

    if json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_thread_ids(true),
            )
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .try_init()?;
    }

    tracing::info!(level, json_format, "Logger initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Whichever call wins, the other must report the existing subscriber
        let first = init_logger("debug", false);
        let second = init_logger("debug", true);
        assert!(first.is_err() || second.is_err());
    }
}
