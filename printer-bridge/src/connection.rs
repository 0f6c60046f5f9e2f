//! Connection lifecycle
//!
//! Owns the currently bound printer and its live transport handle. Handles
//! are reused across jobs; switching printers tears the old link down before
//! the new one is opened, so at most one handle is ever live.
//!
//! Status queries take the read lock. Connect, disconnect and switch take the
//! write lock, so no caller ever observes a half-torn-down connection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{PrintError, PrintResult};
use crate::transport::{Transport, TransportHandle};
use crate::types::{ConnectionState, PrinterIdentity};

struct Current {
    identity: PrinterIdentity,
    handle: Arc<dyn TransportHandle>,
}

#[derive(Default)]
struct Inner {
    current: Option<Current>,
    /// Keyed by printer id; entries other than the current one are history
    states: HashMap<String, ConnectionState>,
}

impl Inner {
    fn reusable(&self, identity: &PrinterIdentity) -> Option<Arc<dyn TransportHandle>> {
        let current = self.current.as_ref()?;
        let connected = self
            .states
            .get(&identity.id)
            .is_some_and(|s| s.connected);
        (current.identity == *identity && connected && current.handle.is_live())
            .then(|| Arc::clone(&current.handle))
    }
}

/// Connection manager
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    inner: RwLock<Inner>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Handle for `identity`, connecting (and switching away) if needed
    #[instrument(skip(self), fields(printer = %identity))]
    pub async fn ensure_connected(
        &self,
        identity: &PrinterIdentity,
    ) -> PrintResult<Arc<dyn TransportHandle>> {
        identity.validate()?;

        if let Some(handle) = self.inner.read().await.reusable(identity) {
            debug!("Already connected to printer");
            return Ok(handle);
        }

        let mut inner = self.inner.write().await;
        // Another caller may have connected while we waited for the lock
        if let Some(handle) = inner.reusable(identity) {
            return Ok(handle);
        }

        if let Some(previous) = inner.current.take() {
            if previous.identity != *identity {
                info!(from = %previous.identity, "Switching printer");
            }
            self.teardown(previous, &mut inner.states).await;
        }

        self.transport
            .set_target(identity)
            .await
            .map_err(into_unavailable)?;
        let handle = self.transport.open().await.map_err(into_unavailable)?;

        inner.current = Some(Current {
            identity: identity.clone(),
            handle: Arc::clone(&handle),
        });
        inner
            .states
            .insert(identity.id.clone(), ConnectionState::connected(identity.clone()));

        info!("Printer connection established");
        Ok(handle)
    }

    /// Tear down the connection to `id` if it is the current one.
    ///
    /// Returns whether anything was disconnected.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.current.take() {
            Some(current) if current.identity.id == id => {
                self.teardown(current, &mut inner.states).await;
                true
            }
            other => {
                inner.current = other;
                warn!("Printer not connected or different device");
                false
            }
        }
    }

    /// Whether `id` is the current printer and its link is up
    pub async fn is_connected(&self, id: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .current
            .as_ref()
            .is_some_and(|c| c.identity.id == id)
            && inner.states.get(id).is_some_and(|s| s.connected)
    }

    /// Record a transport-reported link drop without releasing the handle
    pub async fn mark_disconnected(&self, id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(state) = inner.states.get_mut(id) {
            state.connected = false;
            debug!(printer = %state.identity, "Marked disconnected");
        }
    }

    /// Refresh the last-used timestamp of `id`
    pub async fn touch(&self, id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(state) = inner.states.get_mut(id) {
            state.last_used = Utc::now();
        }
    }

    /// The currently bound printer, if any
    pub async fn current_identity(&self) -> Option<PrinterIdentity> {
        let inner = self.inner.read().await;
        inner.current.as_ref().map(|c| c.identity.clone())
    }

    /// All known connection states, most recently used first
    pub async fn history(&self) -> Vec<ConnectionState> {
        let inner = self.inner.read().await;
        let mut states: Vec<_> = inner.states.values().cloned().collect();
        states.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        states
    }

    /// Disconnect and forget all state
    pub async fn shutdown(&self) {
        let mut inner = self.inner.write().await;
        if let Some(current) = inner.current.take() {
            self.teardown(current, &mut inner.states).await;
        }
        inner.states.clear();
        info!("Connection manager shut down");
    }

    /// Must be called with the write lock held.
    async fn teardown(&self, current: Current, states: &mut HashMap<String, ConnectionState>) {
        // Sink first: nothing may fire against a released handle
        current.handle.set_event_sink(None);
        current.handle.close();
        self.transport.release().await;
        if let Some(state) = states.get_mut(&current.identity.id) {
            state.connected = false;
        }
        info!(printer = %current.identity, "Disconnected from printer");
    }
}

fn into_unavailable(err: PrintError) -> PrintError {
    match err {
        PrintError::PrinterUnavailable(_) | PrintError::InvalidRequest(_) => err,
        other => PrintError::PrinterUnavailable(format!(
            "Failed to setup printer connection: {}",
            other
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escpos::PrintJob;
    use crate::transport::EventSink;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct StubHandle {
        closed: AtomicBool,
        sink_cleared_before_close: AtomicBool,
        sink: Mutex<Option<EventSink>>,
    }

    impl TransportHandle for StubHandle {
        fn set_event_sink(&self, sink: Option<EventSink>) {
            if sink.is_none() && !self.closed.load(Ordering::SeqCst) {
                self.sink_cleared_before_close.store(true, Ordering::SeqCst);
            }
            *self.sink.lock().unwrap() = sink;
        }
        fn send(&self, _job: &PrintJob) -> PrintResult<()> {
            Ok(())
        }
        fn is_live(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct StubTransport {
        opens: AtomicUsize,
        fail_open: AtomicBool,
        handles: Mutex<Vec<Arc<StubHandle>>>,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn set_target(&self, _identity: &PrinterIdentity) -> PrintResult<()> {
            Ok(())
        }
        async fn open(&self) -> PrintResult<Arc<dyn TransportHandle>> {
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(PrintError::ConnectionFailed("radio off".into()));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            let handle = Arc::new(StubHandle::default());
            self.handles.lock().unwrap().push(Arc::clone(&handle));
            Ok(handle)
        }
        async fn release(&self) {}
    }

    fn printer(id: &str) -> PrinterIdentity {
        PrinterIdentity::new("Printer", id)
    }

    #[tokio::test]
    async fn test_reuses_live_connection() {
        let transport = Arc::new(StubTransport::default());
        let manager = ConnectionManager::new(transport.clone());

        let a = manager.ensure_connected(&printer("A")).await.unwrap();
        let b = manager.ensure_connected(&printer("A")).await.unwrap();

        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(manager.is_connected("A").await);
    }

    #[tokio::test]
    async fn test_switch_tears_down_previous() {
        let transport = Arc::new(StubTransport::default());
        let manager = ConnectionManager::new(transport.clone());

        manager.ensure_connected(&printer("A")).await.unwrap();
        manager.ensure_connected(&printer("B")).await.unwrap();

        let handles = transport.handles.lock().unwrap();
        assert!(handles[0].closed.load(Ordering::SeqCst));
        assert!(handles[0].sink_cleared_before_close.load(Ordering::SeqCst));
        assert!(!handles[1].closed.load(Ordering::SeqCst));
        drop(handles);

        assert!(!manager.is_connected("A").await);
        assert!(manager.is_connected("B").await);
        assert_eq!(manager.history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_marked_disconnected_reconnects() {
        let transport = Arc::new(StubTransport::default());
        let manager = ConnectionManager::new(transport.clone());

        manager.ensure_connected(&printer("A")).await.unwrap();
        manager.mark_disconnected("A").await;
        assert!(!manager.is_connected("A").await);

        manager.ensure_connected(&printer("A")).await.unwrap();
        assert_eq!(transport.opens.load(Ordering::SeqCst), 2);
        assert!(manager.is_connected("A").await);
    }

    #[tokio::test]
    async fn test_open_failure_is_unavailable() {
        let transport = Arc::new(StubTransport::default());
        transport.fail_open.store(true, Ordering::SeqCst);
        let manager = ConnectionManager::new(transport);

        let err = manager.ensure_connected(&printer("A")).await.unwrap_err();
        assert!(matches!(err, PrintError::PrinterUnavailable(_)));
        assert!(manager.current_identity().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_other_device_is_noop() {
        let manager = ConnectionManager::new(Arc::new(StubTransport::default()));
        manager.ensure_connected(&printer("A")).await.unwrap();

        assert!(!manager.disconnect("B").await);
        assert!(manager.is_connected("A").await);
        assert!(manager.disconnect("A").await);
        assert!(!manager.is_connected("A").await);
        assert!(manager.current_identity().await.is_none());
    }

    #[tokio::test]
    async fn test_blank_identity_rejected() {
        let manager = ConnectionManager::new(Arc::new(StubTransport::default()));
        let err = manager
            .ensure_connected(&PrinterIdentity::new("", "A"))
            .await
            .unwrap_err();
        assert!(matches!(err, PrintError::InvalidRequest(_)));
    }
}
