//! Engine events and the sinks that receive them.

use parking_lot::Mutex;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

/// Something observable that happened inside the engine.
///
/// Events are emitted synchronously, in the order the run loop (or a
/// variable write) produces them. Delays are carried as [`Duration`];
/// converting to wire units is up to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Started {
        start_state: String,
    },
    EnteredState {
        name: String,
        is_finish: bool,
    },
    VariableUpdated {
        name: String,
        value: Value,
    },
    StateActionExecuted {
        state: String,
    },
    TransitionTaken {
        from: String,
        to: String,
        delay: Duration,
    },
    TransitionActionExecuted {
        from: String,
        to: String,
    },
    Finished {
        state: String,
    },
    Stuck {
        state: String,
    },
    Faulted {
        message: String,
    },
    Stopped {
        message: String,
    },
}

/// Receives engine events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

impl EventSink for mpsc::UnboundedSender<EngineEvent> {
    fn emit(&self, event: EngineEvent) {
        // A closed channel means nobody is listening any more.
        let _ = self.send(event);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: EngineEvent) {}
}

/// Buffers events in memory; handy for embedding and tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything recorded so far.
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().push(event);
    }
}
