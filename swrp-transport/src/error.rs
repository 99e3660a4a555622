//! Transport error types.

use thiserror::Error;

/// Errors surfaced by a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no supported link cable found")]
    DeviceNotFound,

    #[error("transport disconnected")]
    Disconnected,

    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("USB error: {0}")]
    Usb(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("connection refused")]
    ConnectionRefused,

    #[error("channel closed")]
    ChannelClosed,
}
