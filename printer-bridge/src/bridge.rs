//! Inbound call surface
//!
//! Each operation either succeeds or fails with a [`PrintError`] whose
//! `Display` is the human-readable message and whose `kind()` is the
//! structured classification.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::BridgeConfig;
use crate::connection::ConnectionManager;
use crate::discovery::{BluetoothctlDiscovery, DeviceInfo, DeviceList, Discovery, PairOutcome};
use crate::error::{PrintError, PrintResult};
use crate::escpos::{self, CutMode, PrintJob};
use crate::executor::JobExecutor;
use crate::transport::{RfcommTransport, Transport};
use crate::types::{ConnectionState, PrinterIdentity};

/// Result of looking a printer up by name among paired devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdLookup {
    pub success: bool,
    pub device_name: String,
    pub device_id: String,
}

/// Printer bridge
pub struct PrinterBridge {
    config: BridgeConfig,
    discovery: Arc<dyn Discovery>,
    connections: Arc<ConnectionManager>,
    executor: JobExecutor,
}

impl PrinterBridge {
    pub fn new(
        config: BridgeConfig,
        transport: Arc<dyn Transport>,
        discovery: Arc<dyn Discovery>,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(transport));
        let executor = JobExecutor::new(Arc::clone(&connections), config.executor.clone());
        Self {
            config,
            discovery,
            connections,
            executor,
        }
    }

    /// Bridge over RFCOMM with `bluetoothctl` discovery
    pub fn bluetooth(config: BridgeConfig) -> Self {
        let transport = Arc::new(RfcommTransport::new(config.transport.clone()));
        let discovery = Arc::new(BluetoothctlDiscovery::new(config.discovery.clone()));
        Self::new(config, transport, discovery)
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn executor(&self) -> &JobExecutor {
        &self.executor
    }

    // === Printing ===

    /// Print newline-joined text
    #[instrument(skip(self, data), fields(lines = data.lines().count()))]
    pub async fn print(&self, device_name: &str, device_id: &str, data: &str) -> PrintResult<()> {
        self.print_with_cancel(device_name, device_id, data, &CancellationToken::new())
            .await
    }

    pub async fn print_with_cancel(
        &self,
        device_name: &str,
        device_id: &str,
        data: &str,
        cancel: &CancellationToken,
    ) -> PrintResult<()> {
        let target = PrinterIdentity::new(device_name, device_id);
        target.validate()?;
        let job = escpos::encode_text(&escpos::split_lines(data), &self.config.encoder);
        self.submit(&job, &target, cancel).await
    }

    /// Print a QR code
    #[instrument(skip(self, qr_data))]
    pub async fn print_qr_code(
        &self,
        device_name: &str,
        device_id: &str,
        qr_data: &str,
    ) -> PrintResult<()> {
        self.print_qr_code_with_cancel(device_name, device_id, qr_data, &CancellationToken::new())
            .await
    }

    pub async fn print_qr_code_with_cancel(
        &self,
        device_name: &str,
        device_id: &str,
        qr_data: &str,
        cancel: &CancellationToken,
    ) -> PrintResult<()> {
        let target = PrinterIdentity::new(device_name, device_id);
        target.validate()?;
        let job = escpos::encode_qr(qr_data, &self.config.encoder)?;
        self.submit(&job, &target, cancel).await
    }

    /// Submit an already encoded job
    pub async fn submit(
        &self,
        job: &PrintJob,
        target: &PrinterIdentity,
        cancel: &CancellationToken,
    ) -> PrintResult<()> {
        if self.executor.is_busy() {
            return Err(PrintError::Busy);
        }
        self.discovery.ensure_ready().await?;
        self.executor.submit_with_cancel(job, target, cancel).await
    }

    // === Maintenance (current printer) ===

    pub async fn feed_paper(&self, lines: u32) -> PrintResult<()> {
        self.feed_paper_with_cancel(lines, &CancellationToken::new())
            .await
    }

    pub async fn feed_paper_with_cancel(
        &self,
        lines: u32,
        cancel: &CancellationToken,
    ) -> PrintResult<()> {
        let job = escpos::encode_feed(lines)?;
        self.submit_to_current(&job, cancel).await
    }

    pub async fn cut_paper(&self, mode: CutMode) -> PrintResult<()> {
        self.cut_paper_with_cancel(mode, &CancellationToken::new())
            .await
    }

    pub async fn cut_paper_with_cancel(
        &self,
        mode: CutMode,
        cancel: &CancellationToken,
    ) -> PrintResult<()> {
        self.submit_to_current(&escpos::encode_cut(mode), cancel)
            .await
    }

    pub async fn open_cash_drawer(&self) -> PrintResult<()> {
        self.open_cash_drawer_with_cancel(&CancellationToken::new())
            .await
    }

    pub async fn open_cash_drawer_with_cancel(&self, cancel: &CancellationToken) -> PrintResult<()> {
        self.submit_to_current(&escpos::encode_cash_drawer(), cancel)
            .await
    }

    async fn submit_to_current(&self, job: &PrintJob, cancel: &CancellationToken) -> PrintResult<()> {
        let target = self.connections.current_identity().await.ok_or_else(|| {
            PrintError::PrinterUnavailable(
                "No printer connected. Please connect to a printer first.".to_string(),
            )
        })?;
        self.submit(job, &target, cancel).await
    }

    // === Connection ===

    pub async fn disconnect_printer(&self, device_id: &str) -> PrintResult<()> {
        require("Device ID", device_id)?;
        if self.connections.disconnect(device_id).await {
            info!(device_id, "Printer disconnected");
        }
        Ok(())
    }

    pub async fn is_connected(&self, device_id: &str) -> bool {
        self.connections.is_connected(device_id).await
    }

    pub async fn connection_history(&self) -> Vec<ConnectionState> {
        self.connections.history().await
    }

    /// Drop the current connection and all connection state
    pub async fn cleanup(&self) {
        self.connections.shutdown().await;
    }

    // === Discovery ===

    pub async fn paired_devices(&self) -> PrintResult<DeviceList> {
        self.discovery.ensure_ready().await?;
        Ok(self.discovery.list_bonded().await?.into())
    }

    pub async fn available_devices(&self) -> PrintResult<DeviceList> {
        self.discovery.ensure_ready().await?;
        let timeout = Duration::from_millis(self.config.discovery.discovery_timeout_ms);
        Ok(self.discovery.discover(timeout).await?.into())
    }

    pub async fn pair_device(&self, device_address: &str) -> PrintResult<PairOutcome> {
        require("Device address", device_address)?;
        self.discovery.ensure_ready().await?;
        self.discovery.pair(device_address).await
    }

    pub async fn device_info(&self, device_address: &str) -> PrintResult<DeviceInfo> {
        require("Device address", device_address)?;
        self.discovery.ensure_ready().await?;
        self.discovery.device_info(device_address).await
    }

    /// Resolve a paired printer's id from its name.
    ///
    /// Lookup failures are reported as `success: false`, not as errors.
    pub async fn device_id_from_paired(&self, printer_name: &str) -> PrintResult<DeviceIdLookup> {
        require("Printer name", printer_name)?;
        let found = match self.discovery.find_bonded_by_name(printer_name).await {
            Ok(found) => found,
            Err(e) => {
                warn!(printer_name, error = %e, "Paired device lookup failed");
                None
            }
        };
        Ok(DeviceIdLookup {
            success: found.is_some(),
            device_name: printer_name.to_string(),
            device_id: found.map(|d| d.device_id).unwrap_or_default(),
        })
    }
}

fn require(field: &str, value: &str) -> PrintResult<()> {
    if value.trim().is_empty() {
        return Err(PrintError::InvalidRequest(format!("{} is required", field)));
    }
    Ok(())
}
