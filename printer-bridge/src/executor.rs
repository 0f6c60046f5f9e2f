//! Print job executor
//!
//! Drives a job through the transport: connect, install an event sink, send,
//! then await the first terminal event under a deadline. Link failures are
//! retried after a fixed back-off; everything else is returned to the caller.
//!
//! Only one job runs at a time. A concurrent submit fails fast with
//! [`PrintError::Busy`] instead of queueing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ExecutorConfig;
use crate::connection::ConnectionManager;
use crate::error::{PrintError, PrintResult};
use crate::escpos::PrintJob;
use crate::transport::TransportEvent;
use crate::types::PrinterIdentity;

/// Per-submit retry bookkeeping
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    last_error: Option<PrintError>,
}

/// Clears the in-flight flag on every exit path
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight job executor
pub struct JobExecutor {
    connections: Arc<ConnectionManager>,
    config: ExecutorConfig,
    in_flight: AtomicBool,
}

impl JobExecutor {
    pub fn new(connections: Arc<ConnectionManager>, config: ExecutorConfig) -> Self {
        Self {
            connections,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Whether a job is currently running
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Send `job` to `target`
    pub async fn submit(&self, job: &PrintJob, target: &PrinterIdentity) -> PrintResult<()> {
        self.submit_with_cancel(job, target, &CancellationToken::new())
            .await
    }

    /// Send `job` to `target`, stopping early if `cancel` fires.
    ///
    /// The token is checked while connecting, while awaiting completion and
    /// during back-off.
    #[instrument(skip(self, job, cancel), fields(printer = %target, printables = job.len()))]
    pub async fn submit_with_cancel(
        &self,
        job: &PrintJob,
        target: &PrinterIdentity,
        cancel: &CancellationToken,
    ) -> PrintResult<()> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Rejected: another print operation is in progress");
            return Err(PrintError::Busy);
        }
        let _in_flight = InFlight(&self.in_flight);

        let max_attempts = self.config.max_attempts.max(1);
        let mut retry = RetryState::default();

        while retry.attempt < max_attempts {
            retry.attempt += 1;
            let attempt = retry.attempt;

            let err = match self.attempt(job, target, attempt, cancel).await {
                Ok(()) => {
                    info!(attempt, "Printing successful");
                    self.connections.touch(&target.id).await;
                    return Ok(());
                }
                Err(e) => e,
            };

            if !self.is_retriable(&err) || attempt >= max_attempts {
                error!(attempt, error = %err, "Print job failed");
                return Err(err);
            }

            warn!(
                attempt,
                error = %err,
                delay_ms = self.config.retry_delay_ms,
                "Attempt failed, retrying"
            );
            retry.last_error = Some(err);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PrintError::Cancelled),
                _ = tokio::time::sleep(self.config.retry_delay()) => {}
            }
        }

        Err(retry.last_error.unwrap_or_else(|| {
            PrintError::ConnectionFailed("Print job failed after all retries.".to_string())
        }))
    }

    fn is_retriable(&self, err: &PrintError) -> bool {
        match err {
            PrintError::ConnectionFailed(_) => self.config.retry.retry_on_connection_failed,
            PrintError::Printer(_) => self.config.retry.retry_on_device_error,
            _ => false,
        }
    }

    async fn attempt(
        &self,
        job: &PrintJob,
        target: &PrinterIdentity,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> PrintResult<()> {
        let handle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PrintError::Cancelled),
            handle = self.connections.ensure_connected(target) => handle?,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        handle.set_event_sink(Some(tx));

        if let Err(e) = handle.send(job) {
            handle.set_event_sink(None);
            return Err(e);
        }

        let timeout = self.config.job_timeout();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PrintError::Cancelled),
            result = tokio::time::timeout(timeout, self.await_completion(&mut rx, target, attempt)) => {
                result.unwrap_or_else(|_| {
                    Err(PrintError::Timeout(format!(
                        "Print operation timed out after {} seconds.",
                        timeout.as_secs_f32()
                    )))
                })
            }
        };

        handle.set_event_sink(None);

        // Link state is unknown after an abandoned send
        if matches!(outcome, Err(PrintError::Timeout(_) | PrintError::Cancelled)) {
            self.connections.disconnect(&target.id).await;
        }
        outcome
    }

    async fn await_completion(
        &self,
        rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
        target: &PrinterIdentity,
        attempt: u32,
    ) -> PrintResult<()> {
        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::Connecting => debug!(attempt, "Connecting to printer"),
                TransportEvent::Message(message) => debug!(%message, "Printer message"),
                TransportEvent::Disconnected => {
                    info!("Disconnected from printer");
                    self.connections.mark_disconnected(&target.id).await;
                }
                TransportEvent::ConnectionFailed(message) => {
                    return Err(PrintError::ConnectionFailed(message));
                }
                TransportEvent::Error(message) => {
                    return Err(PrintError::Printer(message));
                }
                TransportEvent::Sent => return Ok(()),
            }
        }
        Err(PrintError::ConnectionFailed(
            "Transport event channel closed before completion".to_string(),
        ))
    }
}
