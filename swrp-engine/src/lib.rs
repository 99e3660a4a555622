//! # swrp-engine
//!
//! The symmetric SerialWarp streaming engine.
//!
//! This crate provides:
//! - Credit-based flow control coupling sink decode progress to source sends
//! - The pipeline lifecycle state machine shared by both endpoints
//! - The source pipeline (capture → encode → segment → send)
//! - The sink pipeline (receive → reassemble → decode → present → ack)
//! - Session statistics and a broadcast observer bus
//! - Contracts for the external capture/encoder/decoder/display collaborators
//!
//! The engine talks to the peer through a [`swrp_transport::Transport`] and
//! speaks the wire format of [`swrp_protocol`].

pub mod config;
pub mod error;
pub mod flow;
pub mod link;
pub mod media;
pub mod observer;
pub mod sink;
pub mod source;
pub mod state;
pub mod stats;

#[cfg(test)]
mod tests;

pub use config::{SinkConfig, SourceConfig, StreamConfig};
pub use error::EngineError;
pub use flow::FlowController;
pub use media::{
    DecodedFrame, EncoderOutput, MediaError, MockDecoder, MockEncoder, MockOutput, RawFrame,
    VideoDecoder, VideoEncoder, VideoOutput,
};
pub use observer::{EngineEvent, EventBus};
pub use sink::SinkPipeline;
pub use source::SourcePipeline;
pub use state::{PipelineState, StateMachine};
pub use stats::{SessionStats, StatsSnapshot};

/// Microseconds since the Unix epoch. Wire timestamps use this clock.
pub fn now_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
