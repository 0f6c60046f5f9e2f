//! Text encoding for Arabic thermal printers
//!
//! The supported printers expect text in ISO-8859-6 once the Arabic
//! character table is selected. Lines it cannot represent fall back to
//! UTF-8, one line at a time.

use encoding_rs::ISO_8859_6;

/// Which byte encoding a line ended up in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEncoding {
    /// Primary code page (ISO-8859-6)
    Arabic,
    /// Universal fallback
    Utf8,
}

/// Encode one line for the printer.
///
/// Lines that ISO-8859-6 can represent are sent in it. Any line containing an
/// unmappable character is sent as raw UTF-8 instead; the decision is made
/// per line so one stray emoji never degrades the rest of the job.
pub fn encode_line(line: &str) -> (Vec<u8>, LineEncoding) {
    let (bytes, _, had_errors) = ISO_8859_6.encode(line);
    if had_errors {
        return (line.as_bytes().to_vec(), LineEncoding::Utf8);
    }
    (bytes.into_owned(), LineEncoding::Arabic)
}
