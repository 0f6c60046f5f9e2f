//! Bridge configuration
//!
//! Every value has a default matching the supported printer class and can be
//! overridden from the environment:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | PRINTER_JOB_TIMEOUT_MS | 20000 | Completion deadline per attempt |
//! | PRINTER_MAX_ATTEMPTS | 2 | Attempts per job |
//! | PRINTER_RETRY_DELAY_MS | 1500 | Back-off between attempts |
//! | PRINTER_RETRY_ON_CONNECTION_FAILED | true | Retry link failures |
//! | PRINTER_RETRY_ON_DEVICE_ERROR | false | Retry printer-reported faults |
//! | PRINTER_TRAILING_FEEDS | 3 | Feeds after a text job |
//! | PRINTER_QR_MAX_BYTES | 2900 | Hard QR payload ceiling |
//! | PRINTER_QR_WARN_BYTES | 1000 | QR payload soft threshold |
//! | PRINTER_RFCOMM_DEVICE | (auto) | Fixed RFCOMM tty path |
//! | PRINTER_DISCOVERY_TIMEOUT_MS | 30000 | Device scan duration |
//! | PRINTER_PAIRING_TIMEOUT_MS | 30000 | Pairing deadline |

use serde::Deserialize;
use std::time::Duration;

/// Which transport failures feed the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// `ConnectionFailed` events are retried
    pub retry_on_connection_failed: bool,
    /// Printer-reported `Error` events are retried
    pub retry_on_device_error: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_on_connection_failed: true,
            retry_on_device_error: false,
        }
    }
}

/// Job executor settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub job_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub retry: RetryPolicy,
}

impl ExecutorConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            job_timeout_ms: 20_000,
            max_attempts: 2,
            retry_delay_ms: 1_500,
            retry: RetryPolicy::default(),
        }
    }
}

/// Command encoder settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// CR LF buffers after a text job (clears the cutter)
    pub trailing_feeds: u8,
    /// CR LF buffers after a QR job
    pub qr_trailing_feeds: u8,
    pub qr_max_bytes: usize,
    pub qr_warn_bytes: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            trailing_feeds: 3,
            qr_trailing_feeds: 2,
            qr_max_bytes: 2900,
            qr_warn_bytes: 1000,
        }
    }
}

/// RFCOMM transport settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Fixed tty path; when unset the device bound to the printer's MAC is looked up
    pub device_path: Option<String>,
    pub chunk_size: usize,
    pub chunk_delay_ms: u64,
    pub open_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            device_path: None,
            chunk_size: 512,
            chunk_delay_ms: 2,
            open_timeout_ms: 5_000,
        }
    }
}

/// Discovery and pairing settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub discovery_timeout_ms: u64,
    pub pairing_timeout_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: 30_000,
            pairing_timeout_ms: 30_000,
            command_timeout_ms: 5_000,
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub executor: ExecutorConfig,
    pub encoder: EncoderConfig,
    pub transport: TransportConfig,
    pub discovery: DiscoveryConfig,
}

impl BridgeConfig {
    /// Load configuration from environment variables
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any `PRINTER_*` key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            executor: ExecutorConfig {
                job_timeout_ms: parse_or(
                    lookup("PRINTER_JOB_TIMEOUT_MS"),
                    d.executor.job_timeout_ms,
                ),
                max_attempts: parse_or(lookup("PRINTER_MAX_ATTEMPTS"), d.executor.max_attempts)
                    .max(1),
                retry_delay_ms: parse_or(
                    lookup("PRINTER_RETRY_DELAY_MS"),
                    d.executor.retry_delay_ms,
                ),
                retry: RetryPolicy {
                    retry_on_connection_failed: parse_or(
                        lookup("PRINTER_RETRY_ON_CONNECTION_FAILED"),
                        d.executor.retry.retry_on_connection_failed,
                    ),
                    retry_on_device_error: parse_or(
                        lookup("PRINTER_RETRY_ON_DEVICE_ERROR"),
                        d.executor.retry.retry_on_device_error,
                    ),
                },
            },
            encoder: EncoderConfig {
                trailing_feeds: parse_or(lookup("PRINTER_TRAILING_FEEDS"), d.encoder.trailing_feeds),
                qr_trailing_feeds: d.encoder.qr_trailing_feeds,
                qr_max_bytes: parse_or(lookup("PRINTER_QR_MAX_BYTES"), d.encoder.qr_max_bytes),
                qr_warn_bytes: parse_or(lookup("PRINTER_QR_WARN_BYTES"), d.encoder.qr_warn_bytes),
            },
            transport: TransportConfig {
                device_path: lookup("PRINTER_RFCOMM_DEVICE").filter(|p| !p.trim().is_empty()),
                ..d.transport
            },
            discovery: DiscoveryConfig {
                discovery_timeout_ms: parse_or(
                    lookup("PRINTER_DISCOVERY_TIMEOUT_MS"),
                    d.discovery.discovery_timeout_ms,
                ),
                pairing_timeout_ms: parse_or(
                    lookup("PRINTER_PAIRING_TIMEOUT_MS"),
                    d.discovery.pairing_timeout_ms,
                ),
                ..d.discovery
            },
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.executor.job_timeout(), Duration::from_secs(20));
        assert_eq!(config.executor.max_attempts, 2);
        assert_eq!(config.executor.retry_delay(), Duration::from_millis(1500));
        assert!(config.executor.retry.retry_on_connection_failed);
        assert!(!config.executor.retry.retry_on_device_error);
        assert_eq!(config.encoder.trailing_feeds, 3);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"executor": {"max_attempts": 3}}"#).unwrap();
        assert_eq!(config.executor.max_attempts, 3);
        assert_eq!(config.executor.job_timeout_ms, 20_000);
        assert_eq!(config.encoder.qr_max_bytes, 2900);
    }

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key: &str| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_lookup_overrides_defaults() {
        let config = BridgeConfig::from_lookup(lookup(&[
            ("PRINTER_JOB_TIMEOUT_MS", "5000"),
            ("PRINTER_MAX_ATTEMPTS", "4"),
            ("PRINTER_RETRY_ON_CONNECTION_FAILED", "false"),
            ("PRINTER_RETRY_ON_DEVICE_ERROR", "true"),
            ("PRINTER_QR_MAX_BYTES", " 1200 "),
            ("PRINTER_RFCOMM_DEVICE", "/dev/rfcomm3"),
        ]));
        assert_eq!(config.executor.job_timeout(), Duration::from_secs(5));
        assert_eq!(config.executor.max_attempts, 4);
        assert!(!config.executor.retry.retry_on_connection_failed);
        assert!(config.executor.retry.retry_on_device_error);
        assert_eq!(config.encoder.qr_max_bytes, 1200);
        assert_eq!(config.transport.device_path.as_deref(), Some("/dev/rfcomm3"));
        // Untouched values keep their defaults
        assert_eq!(config.executor.retry_delay_ms, 1_500);
        assert_eq!(config.transport.chunk_size, 512);
    }

    #[test]
    fn test_lookup_garbage_keeps_defaults() {
        let config = BridgeConfig::from_lookup(lookup(&[
            ("PRINTER_JOB_TIMEOUT_MS", "soon"),
            ("PRINTER_RETRY_ON_DEVICE_ERROR", "yes please"),
            ("PRINTER_TRAILING_FEEDS", "300"),
            ("PRINTER_RFCOMM_DEVICE", "  "),
        ]));
        assert_eq!(config.executor.job_timeout_ms, 20_000);
        assert!(!config.executor.retry.retry_on_device_error);
        // Out of range for u8
        assert_eq!(config.encoder.trailing_feeds, 3);
        assert!(config.transport.device_path.is_none());
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let config = BridgeConfig::from_lookup(lookup(&[("PRINTER_MAX_ATTEMPTS", "0")]));
        assert_eq!(config.executor.max_attempts, 1);
    }
}
