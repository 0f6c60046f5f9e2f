//! Device discovery and pairing
//!
//! The connection manager never calls into discovery while holding its own
//! lock, and implementations only ever take their own state lock, so the two
//! cannot deadlock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::DiscoveryConfig;
use crate::error::{PrintError, PrintResult};
use crate::transport::is_valid_mac;

/// Bluetooth bond state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BondState {
    Bonded,
    None,
}

/// One device as reported to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub name: String,
    pub device_id: String,
    pub is_paired: bool,
    pub bond_state: BondState,
}

impl DeviceInfo {
    fn new(name: &str, device_id: &str, is_paired: bool) -> Self {
        Self {
            name: if name.trim().is_empty() {
                "Unknown Device".to_string()
            } else {
                name.to_string()
            },
            device_id: device_id.to_uppercase(),
            is_paired,
            bond_state: if is_paired {
                BondState::Bonded
            } else {
                BondState::None
            },
        }
    }
}

/// Device listing with its count
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceList {
    pub devices: Vec<DeviceInfo>,
    pub count: usize,
}

impl From<Vec<DeviceInfo>> for DeviceList {
    fn from(devices: Vec<DeviceInfo>) -> Self {
        Self {
            count: devices.len(),
            devices,
        }
    }
}

/// Result of a pairing attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairOutcome {
    pub success: bool,
    pub message: String,
}

/// Discovery/pairing collaborator
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Adapter present and powered
    async fn ensure_ready(&self) -> PrintResult<()>;

    /// Devices already bonded with this host
    async fn list_bonded(&self) -> PrintResult<Vec<DeviceInfo>>;

    /// Bonded devices followed by unpaired devices seen during a scan.
    ///
    /// Best-effort: may return fewer devices than are in range.
    async fn discover(&self, timeout: Duration) -> PrintResult<Vec<DeviceInfo>>;

    /// Pair with a device, bounded by the implementation's own timeout
    async fn pair(&self, address: &str) -> PrintResult<PairOutcome>;

    async fn device_info(&self, address: &str) -> PrintResult<DeviceInfo>;

    /// Bonded device whose name matches, ignoring case
    async fn find_bonded_by_name(&self, name: &str) -> PrintResult<Option<DeviceInfo>> {
        let bonded = self.list_bonded().await?;
        Ok(bonded
            .into_iter()
            .find(|d| d.name.eq_ignore_ascii_case(name)))
    }
}

/// Discovery backed by BlueZ's `bluetoothctl`
#[derive(Debug)]
pub struct BluetoothctlDiscovery {
    config: DiscoveryConfig,
    /// Scans and pairing take it exclusively, queries share it
    lock: RwLock<()>,
    discovering: AtomicBool,
}

impl BluetoothctlDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            lock: RwLock::new(()),
            discovering: AtomicBool::new(false),
        }
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.config.command_timeout_ms)
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> PrintResult<String> {
        debug!(?args, "Running bluetoothctl");
        let output = tokio::time::timeout(
            timeout,
            Command::new("bluetoothctl")
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| PrintError::Timeout(format!("bluetoothctl {} timed out", args.join(" "))))?
        .map_err(|e| PrintError::Discovery(format!("Failed to run bluetoothctl: {}", e)))?;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn bonded_unlocked(&self) -> PrintResult<Vec<DeviceInfo>> {
        let out = self.run(&["devices", "Paired"], self.command_timeout()).await?;
        Ok(parse_devices(&out, true))
    }
}

impl Default for BluetoothctlDiscovery {
    fn default() -> Self {
        Self::new(DiscoveryConfig::default())
    }
}

#[async_trait]
impl Discovery for BluetoothctlDiscovery {
    async fn ensure_ready(&self) -> PrintResult<()> {
        let _guard = self.lock.read().await;
        let out = self.run(&["show"], self.command_timeout()).await?;
        match parse_powered(&out) {
            None => Err(PrintError::Discovery(
                "Bluetooth is not supported on this device.".to_string(),
            )),
            Some(false) => Err(PrintError::Discovery(
                "Bluetooth is disabled. Please enable it.".to_string(),
            )),
            Some(true) => Ok(()),
        }
    }

    async fn list_bonded(&self) -> PrintResult<Vec<DeviceInfo>> {
        let _guard = self.lock.read().await;
        let devices = self.bonded_unlocked().await?;
        debug!(count = devices.len(), "Listed paired devices");
        Ok(devices)
    }

    #[instrument(skip(self))]
    async fn discover(&self, timeout: Duration) -> PrintResult<Vec<DeviceInfo>> {
        if self
            .discovering
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PrintError::Discovery(
                "Discovery is already in progress.".to_string(),
            ));
        }
        let _reset = ResetOnDrop(&self.discovering);
        let _guard = self.lock.write().await;

        let secs = timeout.as_secs().max(1).to_string();
        // Scan errors still leave whatever the adapter cached
        if let Err(e) = self
            .run(
                &["--timeout", secs.as_str(), "scan", "on"],
                timeout + self.command_timeout(),
            )
            .await
        {
            warn!(error = %e, "Scan did not complete");
        }

        let bonded = self.bonded_unlocked().await?;
        let all = self.run(&["devices"], self.command_timeout()).await?;
        let mut devices = bonded.clone();
        for device in parse_devices(&all, false) {
            if !bonded.iter().any(|b| b.device_id == device.device_id) {
                devices.push(device);
            }
        }

        info!(count = devices.len(), "Discovery finished");
        Ok(devices)
    }

    #[instrument(skip(self))]
    async fn pair(&self, address: &str) -> PrintResult<PairOutcome> {
        if !is_valid_mac(address) {
            return Err(PrintError::InvalidRequest(format!(
                "Invalid Bluetooth address: {}",
                address
            )));
        }
        let _guard = self.lock.write().await;

        let info = self.run(&["info", address], self.command_timeout()).await?;
        if parse_info(&info, address).is_some_and(|d| d.is_paired) {
            return Ok(PairOutcome {
                success: true,
                message: "Device is already paired".to_string(),
            });
        }

        let out = self
            .run(
                &["pair", address],
                Duration::from_millis(self.config.pairing_timeout_ms),
            )
            .await
            .map_err(|e| match e {
                PrintError::Timeout(_) => {
                    PrintError::Timeout(format!("Pairing timed out for device: {}", address))
                }
                other => other,
            })?;

        let success = out.contains("Pairing successful") || out.contains("AlreadyExists");
        info!(success, "Pairing finished");
        Ok(PairOutcome {
            success,
            message: if success {
                "Device paired successfully".to_string()
            } else {
                "Pairing failed".to_string()
            },
        })
    }

    async fn device_info(&self, address: &str) -> PrintResult<DeviceInfo> {
        let _guard = self.lock.read().await;
        let out = self.run(&["info", address], self.command_timeout()).await?;
        parse_info(&out, address)
            .ok_or_else(|| PrintError::Discovery(format!("Device not found: {}", address)))
    }
}

struct ResetOnDrop<'a>(&'a AtomicBool);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Parse `Device XX:XX:XX:XX:XX:XX Name` lines
fn parse_devices(output: &str, paired: bool) -> Vec<DeviceInfo> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (mac, name) = rest.split_once(' ').unwrap_or((rest, ""));
            is_valid_mac(mac).then(|| DeviceInfo::new(name.trim(), mac, paired))
        })
        .collect()
}

/// `Powered:` flag of `bluetoothctl show`; `None` without a controller
fn parse_powered(output: &str) -> Option<bool> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Powered:"))
        .map(|v| v.trim() == "yes")
}

/// Parse `bluetoothctl info <MAC>`
fn parse_info(output: &str, address: &str) -> Option<DeviceInfo> {
    if !output.contains("Device ") || output.contains("not available") {
        return None;
    }
    let field = |key: &str| {
        output
            .lines()
            .find_map(|line| line.trim().strip_prefix(key).map(|v| v.trim().to_string()))
    };
    let name = field("Name:").or_else(|| field("Alias:")).unwrap_or_default();
    let paired = field("Paired:").is_some_and(|v| v == "yes");
    let bonded = field("Bonded:").map(|v| v == "yes");

    let mut info = DeviceInfo::new(&name, address, paired);
    if let Some(bonded) = bonded {
        info.bond_state = if bonded || paired {
            BondState::Bonded
        } else {
            BondState::None
        };
    }
    Some(info)
}
