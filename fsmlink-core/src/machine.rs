//! The state graph.

use crate::error::CoreError;
use crate::state::State;
use std::collections::HashMap;

/// A set of states with exactly one start state.
///
/// States keep their insertion order for iteration; lookups are by name.
#[derive(Debug, Clone, Default)]
pub struct Machine {
    states: Vec<State>,
    index: HashMap<String, usize>,
    start: Option<usize>,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a state.
    ///
    /// Fails without modifying the machine if the name is taken or if the
    /// state is a second start state.
    pub fn add_state(&mut self, state: State) -> Result<(), CoreError> {
        if self.index.contains_key(state.name()) {
            return Err(CoreError::DuplicateState {
                name: state.name().to_string(),
            });
        }

        if state.is_start() {
            if let Some(existing) = self.start {
                return Err(CoreError::MultipleStartStates {
                    existing: self.states[existing].name().to_string(),
                    rejected: state.name().to_string(),
                });
            }
        }

        let idx = self.states.len();
        if state.is_start() {
            self.start = Some(idx);
        }
        self.index.insert(state.name().to_string(), idx);
        tracing::debug!("Added state: {}", state.name());
        self.states.push(state);
        Ok(())
    }

    /// Builder-style [`Machine::add_state`].
    pub fn with_state(mut self, state: State) -> Result<Self, CoreError> {
        self.add_state(state)?;
        Ok(self)
    }

    /// Checks that the machine can run: a start state exists and every
    /// transition targets a known state.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.start.is_none() {
            return Err(CoreError::NoStartState);
        }

        for state in &self.states {
            for t in state.transitions() {
                if !self.index.contains_key(t.target()) {
                    return Err(CoreError::UnknownTarget {
                        from: state.name().to_string(),
                        to: t.target().to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Looks up a state by name.
    pub fn state(&self, name: &str) -> Option<&State> {
        self.index.get(name).map(|&idx| &self.states[idx])
    }

    /// Returns the start state.
    pub fn start_state(&self) -> Option<&State> {
        self.start.map(|idx| &self.states[idx])
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
