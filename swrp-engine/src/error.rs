//! Engine error types.

use swrp_protocol::{PacketType, ProtocolError};
use swrp_transport::TransportError;
use thiserror::Error;

use crate::media::MediaError;
use crate::state::PipelineState;

/// Errors surfaced by the source and sink pipelines.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("illegal state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("unexpected packet type: expected {expected:?}, got {actual:?}")]
    UnexpectedPacket {
        expected: PacketType,
        actual: PacketType,
    },

    #[error("timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("not connected")]
    NotConnected,
}

impl EngineError {
    /// Stable discriminant reported through the error observer.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Protocol(_) => "protocol",
            EngineError::Transport(_) => "transport",
            EngineError::Media(_) => "media",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::HandshakeFailed(_) => "handshake_failed",
            EngineError::UnexpectedPacket { .. } => "unexpected_packet",
            EngineError::Timeout { .. } => "timeout",
            EngineError::NotConnected => "not_connected",
        }
    }
}
