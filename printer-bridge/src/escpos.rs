//! ESC/POS command encoder
//!
//! Turns print requests into an ordered list of [`Printable`] buffers.
//! Order matters: init → mode select → payload → finalize.

use crate::config::EncoderConfig;
use crate::encoding::{LineEncoding, encode_line};
use crate::error::{PrintError, PrintResult};
use tracing::{debug, instrument, warn};

const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const LF: u8 = 0x0A;
const CR: u8 = 0x0D;

/// Character table for ISO-8859-6 Arabic on the supported printers
pub const ARABIC_CODE_TABLE: u8 = 28;

/// One ordered command/data buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Printable {
    bytes: Vec<u8>,
    new_lines_after: u8,
}

impl Printable {
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            new_lines_after: 0,
        }
    }

    /// Buffer followed by `n` LF bytes on the wire
    pub fn with_new_lines(mut self, n: u8) -> Self {
        self.new_lines_after = n;
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn new_lines_after(&self) -> u8 {
        self.new_lines_after
    }

    /// Exact bytes handed to the link
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes.len() + self.new_lines_after as usize);
        out.extend_from_slice(&self.bytes);
        out.extend(std::iter::repeat_n(LF, self.new_lines_after as usize));
        out
    }
}

/// Full ordered sequence of printables for one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrintJob {
    printables: Vec<Printable>,
}

impl PrintJob {
    pub fn printables(&self) -> &[Printable] {
        &self.printables
    }

    pub fn len(&self) -> usize {
        self.printables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.printables.is_empty()
    }

    /// Total bytes on the wire
    pub fn wire_len(&self) -> usize {
        self.printables
            .iter()
            .map(|p| p.bytes.len() + p.new_lines_after as usize)
            .sum()
    }

    /// Concatenated wire bytes, in order
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        for p in &self.printables {
            out.extend(p.to_wire());
        }
        out
    }
}

/// QR error-correction level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrErrorCorrection {
    L,
    M,
    Q,
    H,
}

impl QrErrorCorrection {
    /// Parameter byte for `GS ( k ... 31 45 n`
    pub fn code(self) -> u8 {
        match self {
            QrErrorCorrection::L => 0x30,
            QrErrorCorrection::M => 0x31,
            QrErrorCorrection::Q => 0x32,
            QrErrorCorrection::H => 0x33,
        }
    }
}

/// Per-job QR parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QrSettings {
    pub module_size: u8,
    pub error_correction: QrErrorCorrection,
}

impl QrSettings {
    /// Payloads above this byte length use the long band
    pub const LONG_ABOVE: usize = 1000;
    /// Payloads above this byte length use the medium band
    pub const MEDIUM_ABOVE: usize = 500;

    /// Settings for a payload of `len` bytes.
    ///
    /// Longer payloads trade module size and error correction for capacity.
    pub fn for_len(len: usize) -> Self {
        if len > Self::LONG_ABOVE {
            Self {
                module_size: 4,
                error_correction: QrErrorCorrection::L,
            }
        } else if len > Self::MEDIUM_ABOVE {
            Self {
                module_size: 5,
                error_correction: QrErrorCorrection::M,
            }
        } else {
            Self {
                module_size: 6,
                error_correction: QrErrorCorrection::Q,
            }
        }
    }
}

/// Cutter mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutMode {
    Full,
    Partial,
}

/// ESC/POS job builder
///
/// Each call appends one printable; `build` hands back the ordered job.
#[derive(Debug, Default)]
pub struct PrintJobBuilder {
    printables: Vec<Printable>,
}

impl PrintJobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, p: Printable) -> &mut Self {
        self.printables.push(p);
        self
    }

    // === Setup ===

    /// Initialize printer (ESC @)
    pub fn init(&mut self) -> &mut Self {
        self.push(Printable::raw([ESC, b'@']))
    }

    /// Select character code table (ESC t n)
    pub fn code_table(&mut self, table: u8) -> &mut Self {
        self.push(Printable::raw([ESC, b't', table]))
    }

    // === Alignment ===

    pub fn center(&mut self) -> &mut Self {
        self.push(Printable::raw([ESC, b'a', 0x01]))
    }

    pub fn left(&mut self) -> &mut Self {
        self.push(Printable::raw([ESC, b'a', 0x00]))
    }

    // === Text ===

    /// One encoded text line followed by a line feed
    pub fn line(&mut self, s: &str) -> &mut Self {
        let (bytes, encoding) = encode_line(s);
        if encoding == LineEncoding::Utf8 {
            debug!(chars = s.chars().count(), "Line not representable in ISO-8859-6, sent as UTF-8");
        }
        self.push(Printable::raw(bytes).with_new_lines(1))
    }

    /// `n` CR LF buffers
    pub fn feed(&mut self, n: u8) -> &mut Self {
        for _ in 0..n {
            self.push(Printable::raw([CR, LF]));
        }
        self
    }

    // === QR (GS ( k, function 165-181) ===

    /// Select model 2
    pub fn qr_model(&mut self) -> &mut Self {
        self.push(Printable::raw([GS, b'(', b'k', 0x04, 0x00, 0x31, 0x41, 0x32, 0x00]))
    }

    pub fn qr_module_size(&mut self, size: u8) -> &mut Self {
        self.push(Printable::raw([GS, b'(', b'k', 0x03, 0x00, 0x31, 0x43, size]))
    }

    pub fn qr_error_correction(&mut self, level: QrErrorCorrection) -> &mut Self {
        self.push(Printable::raw([GS, b'(', b'k', 0x03, 0x00, 0x31, 0x45, level.code()]))
    }

    /// Store symbol data; length is little-endian over payload + 3 header bytes
    pub fn qr_store(&mut self, data: &[u8]) -> PrintResult<&mut Self> {
        let len = u16::try_from(data.len() + 3)
            .map_err(|_| PrintError::Encoding(format!("QR payload of {} bytes", data.len())))?;
        let [pl, ph] = len.to_le_bytes();
        let mut cmd = Vec::with_capacity(data.len() + 8);
        cmd.extend_from_slice(&[GS, b'(', b'k', pl, ph, 0x31, 0x50, 0x30]);
        cmd.extend_from_slice(data);
        Ok(self.push(Printable::raw(cmd)))
    }

    /// Print the stored symbol
    pub fn qr_print(&mut self) -> &mut Self {
        self.push(Printable::raw([GS, b'(', b'k', 0x03, 0x00, 0x31, 0x51, 0x30]))
    }

    // === Paper handling ===

    pub fn cut(&mut self, mode: CutMode) -> &mut Self {
        let m = match mode {
            CutMode::Full => 0x00,
            CutMode::Partial => 0x01,
        };
        self.push(Printable::raw([GS, b'V', m]))
    }

    /// Pulse drawer pin 2 (ESC p 0 25 250)
    pub fn cash_drawer(&mut self) -> &mut Self {
        self.push(Printable::raw([ESC, b'p', 0x00, 0x19, 0xFA]))
    }

    pub fn build(&mut self) -> PrintJob {
        PrintJob {
            printables: std::mem::take(&mut self.printables),
        }
    }
}

/// Split the inbound newline-joined text into lines.
///
/// Blank lines in the middle are kept; trailing ones are dropped so a
/// terminating newline does not print an extra empty line. Text without any
/// newline is a single line, even when empty.
pub fn split_lines(data: &str) -> Vec<&str> {
    if !data.contains('\n') {
        return vec![data];
    }
    let mut lines: Vec<&str> = data.split('\n').collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Encode a text job
pub fn encode_text<S: AsRef<str>>(lines: &[S], config: &EncoderConfig) -> PrintJob {
    let mut b = PrintJobBuilder::new();
    b.init().code_table(ARABIC_CODE_TABLE);
    for line in lines {
        b.line(line.as_ref());
    }
    b.feed(config.trailing_feeds);
    b.build()
}

/// Encode a QR job
#[instrument(skip(payload, config), fields(len = payload.len()))]
pub fn encode_qr(payload: &str, config: &EncoderConfig) -> PrintResult<PrintJob> {
    if payload.trim().is_empty() {
        return Err(PrintError::InvalidRequest(
            "QR code data cannot be empty.".to_string(),
        ));
    }
    let data = payload.as_bytes();
    if data.len() > config.qr_max_bytes {
        return Err(PrintError::Encoding(format!(
            "QR code data is too long ({} bytes, maximum {}).",
            data.len(),
            config.qr_max_bytes
        )));
    }
    if data.len() > config.qr_warn_bytes {
        warn!(max = config.qr_max_bytes, "QR payload is long, scan reliability may suffer");
    }

    let settings = QrSettings::for_len(data.len());
    let mut b = PrintJobBuilder::new();
    b.init()
        .center()
        .qr_model()
        .qr_module_size(settings.module_size)
        .qr_error_correction(settings.error_correction)
        .qr_store(data)?
        .qr_print()
        .left()
        .feed(config.qr_trailing_feeds);
    Ok(b.build())
}

/// Encode a paper feed of `lines` lines
pub fn encode_feed(lines: u32) -> PrintResult<PrintJob> {
    let n = u8::try_from(lines)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| PrintError::InvalidRequest(format!("Cannot feed {} lines (1-255).", lines)))?;
    Ok(PrintJobBuilder::new().feed(n).build())
}

pub fn encode_cut(mode: CutMode) -> PrintJob {
    PrintJobBuilder::new().cut(mode).build()
}

pub fn encode_cash_drawer() -> PrintJob {
    PrintJobBuilder::new().cash_drawer().build()
}
