//! States and transitions.
//!
//! Both are plain values built up front and frozen once the machine runs.
//! Guards and actions are shared closures with fixed signatures returning
//! `Result`, so a failing callback is a value the run loop can report.

use crate::context::EngineContext;
use crate::error::ActionError;
use crate::variables::{VariableStore, Variables};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether a transition may be taken. Sees a variable snapshot.
pub type Guard = Arc<dyn Fn(&EngineContext, &Variables) -> Result<bool, ActionError> + Send + Sync>;

/// Runs on entering a state. Sees a variable snapshot; may write through
/// the context.
pub type EntryAction =
    Arc<dyn Fn(&EngineContext, &Variables) -> Result<(), ActionError> + Send + Sync>;

/// Runs when a transition is selected, against the live store.
pub type TransitionAction = Arc<dyn Fn(&VariableStore) -> Result<(), ActionError> + Send + Sync>;

/// An outgoing edge of a [`State`].
#[derive(Clone)]
pub struct Transition {
    target: String,
    guard: Option<Guard>,
    action: Option<TransitionAction>,
    delay: Duration,
}

impl Transition {
    /// Creates an unconditional, immediate transition to `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            guard: None,
            action: None,
            delay: Duration::ZERO,
        }
    }

    /// Sets the guard.
    pub fn with_guard<F>(mut self, guard: F) -> Self
    where
        F: Fn(&EngineContext, &Variables) -> Result<bool, ActionError> + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Sets the action.
    pub fn with_action<F>(mut self, action: F) -> Self
    where
        F: Fn(&VariableStore) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.action = Some(Arc::new(action));
        self
    }

    /// Sets the delay between selecting the transition and committing it.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn has_guard(&self) -> bool {
        self.guard.is_some()
    }

    pub fn action(&self) -> Option<&TransitionAction> {
        self.action.as_ref()
    }

    /// Evaluates the guard; a missing guard is always true.
    pub fn evaluate(&self, ctx: &EngineContext, vars: &Variables) -> Result<bool, ActionError> {
        match self.guard {
            Some(ref guard) => guard(ctx, vars),
            None => Ok(true),
        }
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("target", &self.target)
            .field("delay", &self.delay)
            .field("has_guard", &self.guard.is_some())
            .field("has_action", &self.action.is_some())
            .finish()
    }
}

/// A node in the state graph.
#[derive(Clone)]
pub struct State {
    name: String,
    entry_action: Option<EntryAction>,
    is_start: bool,
    is_finish: bool,
    transitions: Vec<Transition>,
}

impl State {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_action: None,
            is_start: false,
            is_finish: false,
            transitions: Vec::new(),
        }
    }

    /// Marks this as the start state.
    pub fn start(mut self) -> Self {
        self.is_start = true;
        self
    }

    /// Marks this as a finish state.
    pub fn finish(mut self) -> Self {
        self.is_finish = true;
        self
    }

    /// Sets the entry action.
    pub fn on_entry<F>(mut self, action: F) -> Self
    where
        F: Fn(&EngineContext, &Variables) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.entry_action = Some(Arc::new(action));
        self
    }

    /// Appends an outgoing transition. Declaration order is priority order.
    pub fn transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Appends an outgoing transition in place.
    pub fn add_transition(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_start(&self) -> bool {
        self.is_start
    }

    pub fn is_finish(&self) -> bool {
        self.is_finish
    }

    pub fn entry_action(&self) -> Option<&EntryAction> {
        self.entry_action.as_ref()
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name)
            .field("is_start", &self.is_start)
            .field("is_finish", &self.is_finish)
            .field("has_entry_action", &self.entry_action.is_some())
            .field("transitions", &self.transitions)
            .finish()
    }
}
