//! Observer events.
//!
//! Pipelines publish onto a broadcast bus; shells subscribe and render. The
//! pipeline holds no back-pointer to any UI: publishing to a bus with no
//! subscribers is a no-op.

use tokio::sync::broadcast;

use crate::media::DecodedFrame;
use crate::state::PipelineState;
use crate::stats::StatsSnapshot;

/// Default capacity of the observer channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// An event published by a pipeline.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A lifecycle state transition.
    StateChanged {
        from: PipelineState,
        to: PipelineState,
    },
    /// Periodic session statistics.
    Stats(StatsSnapshot),
    /// A frame finished decoding on the sink (the preview feed).
    FrameDecoded { frame: DecodedFrame },
    /// An error that reached the user. `kind` is a stable discriminant.
    Error {
        kind: &'static str,
        message: String,
    },
}

/// Broadcast bus carrying [`EngineEvent`]s to any number of observers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. Never blocks; a bus with no subscribers drops it.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
