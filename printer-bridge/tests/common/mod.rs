//! Scripted fake transport and discovery for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use printer_bridge::{
    BondState, BridgeConfig, DeviceInfo, Discovery, EventSink, PairOutcome, PrintError, PrintJob,
    PrintResult, PrinterBridge, PrinterIdentity, Transport, TransportEvent, TransportHandle,
};
use tokio::sync::Notify;

/// What the fake printer does with the next job it receives
#[derive(Clone)]
pub enum Step {
    Succeed,
    ConnectionFail(&'static str),
    DeviceError(&'static str),
    /// Report a link drop, then complete
    DropThenSucceed,
    /// Never report anything
    Silent,
    /// Complete once notified
    Hold(Arc<Notify>),
}

#[derive(Default)]
pub struct FakeState {
    pub steps: Mutex<VecDeque<Step>>,
    pub opens: AtomicUsize,
    pub sends: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub fail_open: AtomicBool,
    pub targets: Mutex<Vec<String>>,
    pub wire: Mutex<Vec<Vec<u8>>>,
}

impl FakeState {
    fn next_step(&self) -> Step {
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Succeed)
    }
}

#[derive(Default)]
pub struct FakeTransport {
    pub state: Arc<FakeState>,
}

impl FakeTransport {
    pub fn with_steps(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        let transport = Self::default();
        transport.state.steps.lock().unwrap().extend(steps);
        Arc::new(transport)
    }

    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> usize {
        self.state.sends.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.state.max_live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn set_target(&self, identity: &PrinterIdentity) -> PrintResult<()> {
        self.state.targets.lock().unwrap().push(identity.id.clone());
        Ok(())
    }

    async fn open(&self) -> PrintResult<Arc<dyn TransportHandle>> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(PrintError::ConnectionFailed("adapter off".into()));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Arc::new(FakeHandle {
            state: Arc::clone(&self.state),
            sink: Arc::new(Mutex::new(None)),
            closed: AtomicBool::new(false),
        }))
    }

    async fn release(&self) {}
}

#[derive(Debug)]
pub struct FakeHandle {
    state: Arc<FakeState>,
    sink: Arc<Mutex<Option<EventSink>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for FakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeState").finish_non_exhaustive()
    }
}

fn emit(sink: &Mutex<Option<EventSink>>, event: TransportEvent) {
    if let Some(tx) = sink.lock().unwrap().as_ref() {
        let _ = tx.send(event);
    }
}

impl TransportHandle for FakeHandle {
    fn set_event_sink(&self, sink: Option<EventSink>) {
        *self.sink.lock().unwrap() = sink;
    }

    fn send(&self, job: &PrintJob) -> PrintResult<()> {
        self.state.sends.fetch_add(1, Ordering::SeqCst);
        self.state.wire.lock().unwrap().push(job.to_wire());

        let step = self.state.next_step();
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            emit(&sink, TransportEvent::Connecting);
            match step {
                Step::Succeed => emit(&sink, TransportEvent::Sent),
                Step::ConnectionFail(msg) => {
                    emit(&sink, TransportEvent::ConnectionFailed(msg.to_string()))
                }
                Step::DeviceError(msg) => emit(&sink, TransportEvent::Error(msg.to_string())),
                Step::DropThenSucceed => {
                    emit(&sink, TransportEvent::Disconnected);
                    emit(&sink, TransportEvent::Sent);
                }
                Step::Silent => {}
                Step::Hold(notify) => {
                    notify.notified().await;
                    emit(&sink, TransportEvent::Sent);
                }
            }
        });
        Ok(())
    }

    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Discovery that always reports a powered adapter and a fixed bonded list
pub struct FakeDiscovery {
    pub bonded: Vec<DeviceInfo>,
}

impl FakeDiscovery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            bonded: vec![DeviceInfo {
                name: "MTP-II".to_string(),
                device_id: "66:22:33:44:55:66".to_string(),
                is_paired: true,
                bond_state: BondState::Bonded,
            }],
        })
    }
}

#[async_trait]
impl Discovery for FakeDiscovery {
    async fn ensure_ready(&self) -> PrintResult<()> {
        Ok(())
    }

    async fn list_bonded(&self) -> PrintResult<Vec<DeviceInfo>> {
        Ok(self.bonded.clone())
    }

    async fn discover(&self, _timeout: Duration) -> PrintResult<Vec<DeviceInfo>> {
        Ok(self.bonded.clone())
    }

    async fn pair(&self, _address: &str) -> PrintResult<PairOutcome> {
        Ok(PairOutcome {
            success: true,
            message: "Device is already paired".to_string(),
        })
    }

    async fn device_info(&self, address: &str) -> PrintResult<DeviceInfo> {
        self.bonded
            .iter()
            .find(|d| d.device_id == address)
            .cloned()
            .ok_or_else(|| PrintError::Discovery(format!("Device not found: {}", address)))
    }
}

pub fn bridge(transport: Arc<FakeTransport>) -> PrinterBridge {
    PrinterBridge::new(BridgeConfig::default(), transport, FakeDiscovery::new())
}
