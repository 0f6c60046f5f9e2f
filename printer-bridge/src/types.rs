//! Printer identity and connection state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{PrintError, PrintResult};

/// A printer addressed on the transport
///
/// Identity is the `id` (Bluetooth MAC); `name` is for display and logs only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterIdentity {
    pub name: String,
    pub id: String,
}

impl PrinterIdentity {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }

    /// Reject blank names or ids before any connection work
    pub fn validate(&self) -> PrintResult<()> {
        if self.name.trim().is_empty() || self.id.trim().is_empty() {
            return Err(PrintError::InvalidRequest(
                "Device name and ID are required.".to_string(),
            ));
        }
        Ok(())
    }
}

impl PartialEq for PrinterIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PrinterIdentity {}

impl Hash for PrinterIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for PrinterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.id)
    }
}

/// Connection bookkeeping for one printer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub identity: PrinterIdentity,
    pub connected: bool,
    pub last_used: DateTime<Utc>,
}

impl ConnectionState {
    pub fn connected(identity: PrinterIdentity) -> Self {
        Self {
            identity,
            connected: true,
            last_used: Utc::now(),
        }
    }
}
