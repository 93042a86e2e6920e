use crate::message::MessageType;
use std::io;
use std::time::Duration;

/// Outbound connect failed. Reported to the caller, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("connection to {addr} timed out after {timeout:?}")]
    TimedOut { addr: String, timeout: Duration },
    #[error("failed to connect to {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("TLS handshake with {addr} failed: {reason}")]
    Tls { addr: String, reason: String },
}

/// Mid-session failure on one Connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Unreadable or unwritable frame on the stream (protocol decode error).
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("peer disconnected")]
    Disconnected,
    #[error("frame of {0} bytes exceeds the frame size limit")]
    TooLarge(usize),
    #[error("I/O error: {0}")]
    Io(io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("invalid frame contents: {0}")]
    Invalid(#[from] MessageError),
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => FrameError::Disconnected,
            _ => FrameError::Io(e),
        }
    }
}

/// A message violates the payload/type or size invariants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    #[error("{payload} payload cannot ride on a {msg_type:?} message")]
    PayloadMismatch {
        msg_type: MessageType,
        payload: &'static str,
    },
    #[error("{msg_type:?} message is missing its {expected} payload")]
    MissingPayload {
        msg_type: MessageType,
        expected: &'static str,
    },
    #[error("declared file size {declared} does not match {actual} data bytes")]
    SizeMismatch { declared: u64, actual: u64 },
}

/// Server-side lookup of a direct-message target failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoutingError {
    #[error("target user not found: {0}")]
    UnknownRecipient(String),
}

/// File delivery to one target failed.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("recipient not found: {0}")]
    RecipientNotFound(String),
    #[error("delivery timed out after {0:?}")]
    TimedOut(Duration),
    #[error("delivery task was cancelled")]
    Cancelled,
    #[error("transfer manager is shut down")]
    ShutDown,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("port {0} is outside the allowed range")]
    InvalidPort(u16),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// A console line could not be turned into a command.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UserInputError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    Usage(String),
    #[error("empty input")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_and_eof_map_to_disconnect() {
        for kind in [
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
        ] {
            let err = FrameError::from(io::Error::new(kind, "gone"));
            assert!(matches!(err, FrameError::Disconnected), "{kind:?}");
        }
    }

    #[test]
    fn test_other_io_errors_are_kept() {
        let err = FrameError::from(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[test]
    fn test_transfer_error_display() {
        let err = TransferError::RecipientNotFound("bob".to_string());
        assert_eq!(err.to_string(), "recipient not found: bob");
    }
}
