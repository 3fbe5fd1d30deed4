/*!
Error types for the SNPX client.

Every failure surfaces as a distinct [`SnpxError`] variant. Nothing is retried
automatically and nothing is coerced to a default value.
*/

use crate::value::VarType;
use std::time::Duration;
use thiserror::Error;

/// Common result type used throughout the crate
pub type Result<T> = std::result::Result<T, SnpxError>;

/// Faults reported by the controller or detected in a well-formed frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown packet type 0x{0:02x}")]
    UnknownPacketType(u8),

    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("unknown service code 0x{0:02x}")]
    UnknownService(u8),

    #[error("unknown segment selector 0x{0:02x}")]
    UnknownSegment(u8),

    #[error("controller rejected request (major 0x{major:02x}, minor 0x{minor:02x})")]
    Rejected { major: u8, minor: u8 },

    #[error("reply sequence {actual} does not match request sequence {expected}")]
    SequenceMismatch { expected: u16, actual: u16 },

    #[error("handshake failed: expected welcome packet, got type 0x{0:02x}")]
    HandshakeFailed(u8),
}

/// Comprehensive error type for all SNPX operations
#[derive(Error, Debug)]
pub enum SnpxError {
    /// Socket-level failure; the session is unusable afterwards
    #[error("Connection error: {0}")]
    Connection(#[source] std::io::Error),

    /// No complete reply frame arrived in time
    #[error("Timed out after {0:?} waiting for a reply")]
    Timeout(Duration),

    /// Peer closed the connection, or the session was already closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Frame too short or internally inconsistent
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Requested slot range overlaps an assignment held by another variable
    #[error("Slots {slot}..{end} conflict with the assignment of {holder}", end = .slot + .size)]
    AssignmentConflict { slot: u16, size: u16, holder: String },

    /// No contiguous free range of the requested size exists
    #[error("No free assignment slot range of size {size}")]
    NoAssignmentSlot { size: u16 },

    /// Caller-supplied index, count or value is outside what the target can hold
    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Type mismatch: expected {expected}, got {found}")]
    TypeMismatch { expected: VarType, found: VarType },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SnpxError {
    /// Create a new malformed packet error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPacket(msg.into())
    }

    /// Create a new out of range error
    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the connection must be considered dead after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::ConnectionClosed)
    }

    /// Classify an I/O error raised while talking to the controller
    pub fn from_io(err: std::io::Error, timeout: Duration) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => Self::Timeout(timeout),
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => Self::ConnectionClosed,
            _ => Self::Connection(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_classification() {
        let timeout = Duration::from_millis(250);

        let err = SnpxError::from_io(IoError::from(ErrorKind::WouldBlock), timeout);
        assert!(matches!(err, SnpxError::Timeout(t) if t == timeout));

        let err = SnpxError::from_io(IoError::from(ErrorKind::UnexpectedEof), timeout);
        assert!(matches!(err, SnpxError::ConnectionClosed));

        let err = SnpxError::from_io(IoError::from(ErrorKind::ConnectionRefused), timeout);
        assert!(matches!(err, SnpxError::Connection(_)));
    }

    #[test]
    fn test_fatal_errors() {
        assert!(SnpxError::ConnectionClosed.is_fatal());
        assert!(!SnpxError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(!SnpxError::NoAssignmentSlot { size: 3 }.is_fatal());
    }

    #[test]
    fn test_conflict_display() {
        let err = SnpxError::AssignmentConflict {
            slot: 4,
            size: 2,
            holder: "$ANGTOL[1]".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Slots 4..6 conflict with the assignment of $ANGTOL[1]"
        );
    }
}
