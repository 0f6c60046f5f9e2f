//! # printer-bridge
//!
//! Bluetooth thermal receipt printing: ESC/POS encoding plus a connection
//! lifecycle that reuses one live link across jobs and retries transient
//! link failures.
//!
//! ## Scope
//!
//! This crate handles HOW a request reaches the printer:
//! - ESC/POS command encoding (text in ISO-8859-6, QR codes, paper control)
//! - Connection reuse and switching under a readers-writer lock
//! - Single-flight job execution with timeout, retry and cancellation
//! - Bluetooth RFCOMM transport and `bluetoothctl` discovery (Linux)
//!
//! Permission prompts and the host application's calling convention stay in
//! the host.
//!
//! ## Example
//!
//! ```ignore
//! use printer_bridge::{BridgeConfig, PrinterBridge};
//!
//! let bridge = PrinterBridge::bluetooth(BridgeConfig::from_env());
//! bridge.print("MTP-II", "66:22:33:44:55:66", "مرحبا\nTotal: 12.50").await?;
//! bridge.print_qr_code("MTP-II", "66:22:33:44:55:66", "https://example.com").await?;
//! ```

mod bridge;
mod config;
mod connection;
mod discovery;
mod encoding;
mod error;
mod escpos;
mod executor;
mod logger;
mod types;

pub mod transport;

// Re-exports
pub use bridge::{DeviceIdLookup, PrinterBridge};
pub use config::{
    BridgeConfig, DiscoveryConfig, EncoderConfig, ExecutorConfig, RetryPolicy, TransportConfig,
};
pub use connection::ConnectionManager;
pub use discovery::{BluetoothctlDiscovery, BondState, DeviceInfo, DeviceList, Discovery, PairOutcome};
pub use encoding::{LineEncoding, encode_line};
pub use error::{ErrorKind, ErrorReport, PrintError, PrintResult};
pub use escpos::{
    ARABIC_CODE_TABLE, CutMode, PrintJob, PrintJobBuilder, Printable, QrErrorCorrection,
    QrSettings, encode_cash_drawer, encode_cut, encode_feed, encode_qr, encode_text, split_lines,
};
pub use executor::JobExecutor;
pub use logger::init_logger;
pub use transport::{EventSink, Transport, TransportEvent, TransportHandle};
pub use types::{ConnectionState, PrinterIdentity};

pub use tokio_util::sync::CancellationToken;
