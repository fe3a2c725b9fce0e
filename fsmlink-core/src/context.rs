//! Per-machine engine context.
//!
//! Everything the run loop and the transport share lives here: the variable
//! store, the delay controller (which also owns the stop flag), the event
//! sink, and the name of the active state. There is no process-wide state,
//! so any number of engines can coexist.

use crate::delay::DelayController;
use crate::event::{EngineEvent, EventSink};
use crate::variables::{VariableStore, Variables};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

/// Shared handle to one engine's runtime state.
///
/// Guards and entry actions receive a `&EngineContext` so they can read the
/// active state, write variables, or request a stop.
pub struct EngineContext {
    variables: VariableStore,
    delay: Arc<DelayController>,
    events: Arc<dyn EventSink>,
    current_state: RwLock<Option<String>>,
}

impl EngineContext {
    /// Creates a context whose events go to `events`.
    ///
    /// Every variable write emits [`EngineEvent::VariableUpdated`] and
    /// interrupts a pending delay.
    pub fn new(events: Arc<dyn EventSink>) -> Arc<Self> {
        let delay = Arc::new(DelayController::new());

        let hook_events = events.clone();
        let hook_delay = delay.clone();
        let variables = VariableStore::with_hook(Arc::new(move |name: &str, value: &Value| {
            tracing::debug!("Variable '{}' set to {}", name, value);
            hook_events.emit(EngineEvent::VariableUpdated {
                name: name.to_string(),
                value: value.clone(),
            });
            if hook_delay.interrupt() {
                tracing::debug!("Variable '{}' changed during delay, re-evaluating", name);
            }
        }));

        Arc::new(Self {
            variables,
            delay,
            events,
            current_state: RwLock::new(None),
        })
    }

    /// Returns the live variable store.
    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    /// Writes a variable (see [`VariableStore::set`]).
    pub fn set_variable(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.set(name, value.into());
    }

    /// Reads a variable, falling back to `default`.
    pub fn get_variable(&self, name: &str, default: Value) -> Value {
        self.variables.get(name, default)
    }

    /// Returns a consistent copy of all variables.
    pub fn snapshot(&self) -> Variables {
        self.variables.snapshot()
    }

    /// Returns the delay controller.
    pub fn delay(&self) -> &DelayController {
        &self.delay
    }

    /// Requests a stop. Idempotent; wakes any pending delay.
    pub fn stop(&self) {
        if self.delay.request_stop() {
            tracing::info!("Stop requested");
        }
    }

    /// Returns whether the engine has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.delay.is_stopped()
    }

    /// Resolves once the engine has been stopped.
    pub async fn stopped(&self) {
        self.delay.stopped().await
    }

    /// Returns the name of the active state, if the machine has started.
    pub fn current_state(&self) -> Option<String> {
        self.current_state.read().clone()
    }

    pub(crate) fn set_current_state(&self, name: &str) {
        *self.current_state.write() = Some(name.to_string());
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        self.events.emit(event);
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("variables", &self.variables)
            .field("delay", &self.delay)
            .field("current_state", &*self.current_state.read())
            .finish()
    }
}
