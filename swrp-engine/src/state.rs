//! Pipeline lifecycle state machine.
//!
//! Both endpoints walk the same state graph. Any transition outside the
//! table is a programming error and is refused; observers are notified on
//! every legal transition.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::EngineError;
use crate::observer::{EngineEvent, EventBus};

/// Lifecycle states of a pipeline endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PipelineState {
    Disconnected,
    Connecting,
    Connected,
    Handshaking,
    Ready,
    Starting,
    Streaming,
    Stopping,
    Error,
}

impl PipelineState {
    /// Whether `self -> to` appears in the transition table.
    pub fn can_transition_to(self, to: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Error)
                | (Connected, Handshaking)
                | (Connected, Disconnected)
                | (Connected, Error)
                | (Handshaking, Ready)
                | (Handshaking, Disconnected)
                | (Handshaking, Error)
                | (Ready, Starting)
                | (Ready, Disconnected)
                | (Ready, Error)
                | (Starting, Streaming)
                | (Starting, Ready)
                | (Starting, Disconnected)
                | (Starting, Error)
                | (Streaming, Stopping)
                | (Streaming, Disconnected)
                | (Streaming, Error)
                | (Stopping, Ready)
                | (Stopping, Disconnected)
                | (Stopping, Error)
                | (Error, Disconnected)
                | (Error, Connecting)
        )
    }
}

#[derive(Debug)]
struct Inner {
    state: Mutex<PipelineState>,
    events: EventBus,
}

/// Shared, observable pipeline state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StateMachine {
    inner: Arc<Inner>,
}

impl StateMachine {
    /// Starts in `Disconnected`.
    pub fn new(events: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PipelineState::Disconnected),
                events,
            }),
        }
    }

    pub fn current(&self) -> PipelineState {
        *self.inner.state.lock()
    }

    /// Performs a transition, refusing anything outside the table.
    pub fn transition(&self, to: PipelineState) -> Result<(), EngineError> {
        let from = {
            let mut state = self.inner.state.lock();
            let from = *state;
            if !from.can_transition_to(to) {
                return Err(EngineError::InvalidTransition { from, to });
            }
            *state = to;
            from
        };

        tracing::debug!(?from, ?to, "pipeline state transition");
        self.inner
            .events
            .publish(EngineEvent::StateChanged { from, to });
        Ok(())
    }

    /// Moves to `Error` if the current state allows it.
    ///
    /// Used from task context where a refused transition means a concurrent
    /// teardown already moved the pipeline on.
    pub fn mark_error(&self) {
        if let Err(e) = self.transition(PipelineState::Error) {
            tracing::debug!("error transition refused: {e}");
        }
    }

    /// Moves to `Disconnected` if the current state allows it.
    pub fn mark_disconnected(&self) {
        if let Err(e) = self.transition(PipelineState::Disconnected) {
            tracing::debug!("disconnect transition refused: {e}");
        }
    }
}
