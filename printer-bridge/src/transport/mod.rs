//! Transport layer
//!
//! A transport is an asynchronous connect/send channel to one addressed
//! printer. Sending never blocks on the outcome: progress and completion are
//! reported as [`TransportEvent`]s on the sink registered with the handle.
//!
//! Available transports:
//! - [`rfcomm`]: Bluetooth SPP through a bound `/dev/rfcommN` tty (Linux)

pub mod rfcomm;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::PrintResult;
use crate::escpos::PrintJob;
use crate::types::PrinterIdentity;

pub use rfcomm::{RfcommTransport, is_valid_mac};

/// Everything a transport can report about a send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Link handshake started
    Connecting,
    /// Link could not be established or was lost mid-send
    ConnectionFailed(String),
    /// Device-reported fault
    Error(String),
    /// Informational text from the driver
    Message(String),
    /// Job fully handed to the printer
    Sent,
    /// Link went down
    Disconnected,
}

impl TransportEvent {
    /// Whether this event ends a send
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransportEvent::ConnectionFailed(_) | TransportEvent::Error(_) | TransportEvent::Sent
        )
    }
}

/// Single channel carrying all events of a handle
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// A live connection to one printer
pub trait TransportHandle: Send + Sync + fmt::Debug {
    /// Replace (or clear, with `None`) the event sink
    fn set_event_sink(&self, sink: Option<EventSink>);

    /// Queue a job for transmission, printables in order.
    ///
    /// Returns once the job is accepted; the outcome arrives on the sink.
    fn send(&self, job: &PrintJob) -> PrintResult<()>;

    /// Whether the handle can still carry data
    fn is_live(&self) -> bool;

    /// Release the underlying link
    fn close(&self);
}

/// Factory for handles to the current target printer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Register the printer subsequent `open` calls connect to
    async fn set_target(&self, identity: &PrinterIdentity) -> PrintResult<()>;

    /// Open a fresh handle to the registered target
    async fn open(&self) -> PrintResult<Arc<dyn TransportHandle>>;

    /// Forget the registered target
    async fn release(&self);
}
