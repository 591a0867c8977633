//! Transport layer for bench lines
//!
//! Every line is a [`SerialTransport`] over a [`PortDriver`]:
//! - [`SystemPort`] for real serial devices
//! - [`LoopbackPort`] for in-memory echo lines (dry runs and tests)

mod loopback;
mod serial;

pub use loopback::{LoopbackHandle, LoopbackPort};
pub use serial::{
    list_ports, LineConfig, SerialFlowControl, SerialParity, SerialTransport, SystemPort,
    DEFAULT_GUARD,
};

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// The OS handle could not be opened
    #[error("Failed to open {port}: {reason}")]
    OpenFailed {
        /// Port that was requested
        port: String,
        /// Underlying cause
        reason: String,
    },

    /// Refused by the line's timed lock
    #[error("Line {line} is locked")]
    Locked {
        /// Logical line name
        line: String,
    },

    /// No terminator seen before the deadline
    #[error("Line {line} timed out after {millis} ms")]
    Timeout {
        /// Logical line name
        line: String,
        /// Timeout that elapsed
        millis: u64,
    },

    /// I/O error on an open handle
    #[error("I/O error: {0}")]
    IoFailure(#[from] std::io::Error),

    /// Operation on a closed line
    #[error("Line {line} is not open")]
    NotOpen {
        /// Logical line name
        line: String,
    },
}

impl TransportError {
    /// Whether the caller may simply try again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Locked { .. } | Self::Timeout { .. })
    }
}

/// Observable transport activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Line opened, guard window armed
    Opened,
    /// Line closed
    Closed,
    /// Bytes written
    Sent(Bytes),
    /// Line received (terminator stripped)
    Received(Bytes),
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened => write!(f, "opened"),
            Self::Closed => write!(f, "closed"),
            Self::Sent(data) => write!(f, "TX {}", hex::encode(data)),
            Self::Received(data) => write!(f, "RX {}", hex::encode(data)),
        }
    }
}

/// Caller-supplied observer, invoked with the line name and the event
pub type EventHook = Arc<dyn Fn(&str, &TransportEvent) + Send + Sync>;

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Frames sent
    pub frames_sent: u64,
    /// Lines received
    pub frames_received: u64,
    /// Operations refused by the lock
    pub lock_rejections: u64,
    /// Receives that timed out
    pub timeouts: u64,
}

/// Raw byte access to one physical or virtual port.
///
/// `read` must not block for long: it returns `Ok(0)` when nothing is
/// available so the transport can poll against its own deadline.
#[cfg_attr(test, mockall::automock)]
pub trait PortDriver: Send {
    /// Open the underlying handle
    fn open(&mut self, config: &LineConfig) -> Result<(), TransportError>;

    /// Release the handle; no-op when already closed
    fn close(&mut self);

    /// Whether the handle is currently open
    fn is_open(&self) -> bool;

    /// Write bytes, returning how many were accepted
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize>;

    /// Read whatever is available into `buf`
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}
