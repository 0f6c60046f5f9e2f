//! Bluetooth SPP transport over a bound RFCOMM tty
//!
//! The printer must be paired and bound first (`rfcomm bind 0 <MAC> 1`),
//! which creates `/dev/rfcomm0`. The target's MAC is resolved to its tty
//! through `/proc/net/rfcomm` unless a fixed device path is configured.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use super::{EventSink, Transport, TransportEvent, TransportHandle};
use crate::config::TransportConfig;
use crate::error::{PrintError, PrintResult};
use crate::escpos::PrintJob;
use crate::types::PrinterIdentity;

const PROC_RFCOMM: &str = "/proc/net/rfcomm";

/// RFCOMM transport
#[derive(Debug)]
pub struct RfcommTransport {
    config: TransportConfig,
    target: Mutex<Option<(PrinterIdentity, PathBuf)>>,
}

impl RfcommTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            target: Mutex::new(None),
        }
    }

    fn current_target(&self) -> Option<(PrinterIdentity, PathBuf)> {
        self.target.lock().ok().and_then(|t| t.clone())
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    #[instrument(skip(self), fields(printer = %identity))]
    async fn set_target(&self, identity: &PrinterIdentity) -> PrintResult<()> {
        if !is_valid_mac(&identity.id) {
            return Err(PrintError::InvalidRequest(format!(
                "Invalid Bluetooth address: {}",
                identity.id
            )));
        }

        let path = match &self.config.device_path {
            Some(p) => PathBuf::from(p),
            None => find_rfcomm_for_mac(&identity.id).await?.ok_or_else(|| {
                PrintError::PrinterUnavailable(format!(
                    "No RFCOMM device bound to {}",
                    identity.id
                ))
            })?,
        };

        debug!(device = %path.display(), "Target registered");
        let mut target = self
            .target
            .lock()
            .map_err(|_| PrintError::PrinterUnavailable("Transport state poisoned".into()))?;
        *target = Some((identity.clone(), path));
        Ok(())
    }

    async fn open(&self) -> PrintResult<Arc<dyn TransportHandle>> {
        let (identity, path) = self
            .current_target()
            .ok_or_else(|| PrintError::PrinterUnavailable("No target printer set".into()))?;

        info!(printer = %identity, device = %path.display(), "Opening RFCOMM device");

        let open_timeout = Duration::from_millis(self.config.open_timeout_ms);
        let file = tokio::time::timeout(
            open_timeout,
            OpenOptions::new().write(true).open(&path),
        )
        .await
        .map_err(|_| PrintError::Timeout(format!("Opening {} timed out", path.display())))?
        .map_err(|e| PrintError::PrinterUnavailable(format!("{}: {}", path.display(), e)))?;

        configure_tty_raw(&file)?;

        Ok(Arc::new(RfcommHandle {
            shared: Arc::new(Shared {
                device: path,
                file: tokio::sync::Mutex::new(Some(file)),
                sink: Mutex::new(None),
                live: AtomicBool::new(true),
                chunk_size: self.config.chunk_size.max(1),
                chunk_delay: Duration::from_millis(self.config.chunk_delay_ms),
            }),
            runtime: tokio::runtime::Handle::current(),
        }))
    }

    async fn release(&self) {
        if let Ok(mut target) = self.target.lock() {
            *target = None;
        }
    }
}

#[derive(Debug)]
struct Shared {
    device: PathBuf,
    file: tokio::sync::Mutex<Option<File>>,
    sink: Mutex<Option<EventSink>>,
    live: AtomicBool,
    chunk_size: usize,
    chunk_delay: Duration,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        if let Ok(sink) = self.sink.lock()
            && let Some(tx) = sink.as_ref()
        {
            // Receiver gone means nobody is waiting any more
            let _ = tx.send(event);
        }
    }

    /// Write `job` chunk by chunk, stopping as soon as the handle is closed.
    ///
    /// A closed handle releases the fd here, so an abandoned job never keeps
    /// writing next to the handle that replaced it.
    async fn write_job(&self, job: &PrintJob) -> io::Result<usize> {
        let mut slot = self.file.lock().await;
        let result = self.write_chunks(&mut slot, job).await;
        if !self.is_live() {
            slot.take();
        }
        result
    }

    async fn write_chunks(&self, slot: &mut Option<File>, job: &PrintJob) -> io::Result<usize> {
        let mut written = 0;
        for printable in job.printables() {
            let wire = printable.to_wire();
            let mut chunks = wire.chunks(self.chunk_size).peekable();
            while let Some(chunk) = chunks.next() {
                if !self.is_live() {
                    return Err(io::Error::new(io::ErrorKind::NotConnected, "handle closed"));
                }
                let file = slot
                    .as_mut()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "device closed"))?;
                file.write_all(chunk).await?;
                // Each chunk reaches the device before the next liveness check
                file.flush().await?;
                written += chunk.len();
                if chunks.peek().is_some() && !self.chunk_delay.is_zero() {
                    tokio::time::sleep(self.chunk_delay).await;
                }
            }
        }
        Ok(written)
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Open RFCOMM tty
#[derive(Debug)]
pub struct RfcommHandle {
    shared: Arc<Shared>,
    runtime: tokio::runtime::Handle,
}

impl TransportHandle for RfcommHandle {
    fn set_event_sink(&self, sink: Option<EventSink>) {
        if let Ok(mut slot) = self.shared.sink.lock() {
            *slot = sink;
        }
    }

    fn send(&self, job: &PrintJob) -> PrintResult<()> {
        if !self.is_live() {
            return Err(PrintError::ConnectionFailed(format!(
                "{} is closed",
                self.shared.device.display()
            )));
        }

        let shared = Arc::clone(&self.shared);
        let job = job.clone();
        self.runtime.spawn(async move {
            shared.emit(TransportEvent::Connecting);
            match shared.write_job(&job).await {
                Ok(bytes) => {
                    shared.emit(TransportEvent::Message(format!("{} bytes written", bytes)));
                    shared.emit(TransportEvent::Sent);
                }
                Err(e) if !shared.is_live() => {
                    debug!(device = %shared.device.display(), error = %e, "Send abandoned after close");
                }
                Err(e) if is_link_loss(&e) => {
                    warn!(device = %shared.device.display(), error = %e, "Link lost");
                    shared.live.store(false, Ordering::SeqCst);
                    shared.emit(TransportEvent::ConnectionFailed(e.to_string()));
                    shared.emit(TransportEvent::Disconnected);
                }
                Err(e) => {
                    warn!(device = %shared.device.display(), error = %e, "Write failed");
                    shared.emit(TransportEvent::Error(e.to_string()));
                }
            }
        });
        Ok(())
    }

    fn is_live(&self) -> bool {
        self.shared.is_live()
    }

    fn close(&self) {
        self.shared.live.store(false, Ordering::SeqCst);
        self.set_event_sink(None);
        // A write in progress drops the file itself at its next chunk
        if let Ok(mut file) = self.shared.file.try_lock() {
            file.take();
        }
        debug!(device = %self.shared.device.display(), "RFCOMM handle closed");
    }
}

fn is_link_loss(e: &io::Error) -> bool {
    use io::ErrorKind::*;
    if matches!(
        e.kind(),
        BrokenPipe | NotConnected | ConnectionReset | ConnectionAborted | TimedOut | UnexpectedEof
    ) {
        return true;
    }
    // rfcomm reports a vanished peer as EIO / EHOSTDOWN
    #[cfg(unix)]
    if matches!(e.raw_os_error(), Some(libc::EIO) | Some(libc::EHOSTDOWN)) {
        return true;
    }
    false
}

/// Configure the tty for raw 8-bit output.
///
/// Disables CR/LF translation and XON/XOFF flow control: 0x11/0x13 and
/// 0x0A occur inside command payloads.
#[cfg(unix)]
fn configure_tty_raw(file: &File) -> PrintResult<()> {
    use std::mem::MaybeUninit;
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let mut termios = MaybeUninit::uninit();
    // SAFETY: fd is an open descriptor owned by `file`
    if unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) } != 0 {
        let err = io::Error::last_os_error();
        // Plain files (tests, fixed paths to captures) are not ttys
        if err.raw_os_error() == Some(libc::ENOTTY) {
            return Ok(());
        }
        return Err(PrintError::PrinterUnavailable(format!("tcgetattr failed: {}", err)));
    }
    // SAFETY: tcgetattr succeeded and initialised the struct
    let mut termios = unsafe { termios.assume_init() };

    termios.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON
        | libc::IXOFF
        | libc::IXANY);
    termios.c_oflag &= !libc::OPOST;
    termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
    termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
    termios.c_cflag |= libc::CS8;

    // SAFETY: termios is a valid, initialised struct for this fd
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
        return Err(PrintError::PrinterUnavailable(format!(
            "tcsetattr failed: {}",
            io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn configure_tty_raw(_file: &File) -> PrintResult<()> {
    Ok(())
}

/// Validate a Bluetooth MAC address (XX:XX:XX:XX:XX:XX)
pub fn is_valid_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Find the tty bound to `mac` in `/proc/net/rfcomm`
async fn find_rfcomm_for_mac(mac: &str) -> PrintResult<Option<PathBuf>> {
    let contents = match tokio::fs::read_to_string(PROC_RFCOMM).await {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(parse_proc_rfcomm(&contents, mac)
        .map(|dev| Path::new("/dev").join(dev))
        .filter(|p| p.exists()))
}

/// Extract the device name from `/proc/net/rfcomm` lines of the form
/// `rfcomm0: 00:11:22:33:44:55 channel 1 clean`
fn parse_proc_rfcomm(contents: &str, mac: &str) -> Option<String> {
    let mac_upper = mac.to_uppercase();
    contents
        .lines()
        .filter(|line| line.to_uppercase().contains(&mac_upper))
        .find_map(|line| {
            line.split(':')
                .next()
                .map(str::trim)
                .filter(|dev| !dev.is_empty())
                .map(str::to_string)
        })
}
