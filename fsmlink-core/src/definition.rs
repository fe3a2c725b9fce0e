//! Declarative machine definitions.
//!
//! Machines can be described in JSON or YAML instead of code:
//!
//! ```yaml
//! variables: {counter: 0, force_finish: false}
//! states:
//!   - {name: A, start: true, entry: {set: {entered: true}}}
//!   - {name: B}
//!   - {name: C, finish: true}
//! transitions:
//!   - {from: A, to: B, guard: "vars.counter < 3", delay_ms: 2000, action: {increment: counter}}
//!   - {from: [A, B], to: C, guard: "vars.counter >= 3"}
//! ```
//!
//! Transitions keep file order within each source state.

use crate::context::EngineContext;
use crate::error::{ActionError, CoreError};
use crate::guard::GuardExpr;
use crate::machine::Machine;
use crate::state::{State, Transition};
use crate::variables::{VariableStore, Variables};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// A state entry in a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateSpec {
    pub name: String,

    #[serde(default)]
    pub start: bool,

    #[serde(default)]
    pub finish: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<ActionSpec>,
}

/// A transition entry in a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionSpec {
    /// Source state(s). A single name or a list.
    #[serde(deserialize_with = "deserialize_names")]
    pub from: Vec<String>,

    pub to: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,

    #[serde(default)]
    pub delay_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionSpec>,
}

/// Variable writes performed by an entry or transition action.
///
/// `set` assignments run first, then `increment`s. Incrementing an absent
/// variable starts from 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, Value>,

    #[serde(
        default,
        deserialize_with = "deserialize_names",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub increment: Vec<String>,
}

impl ActionSpec {
    /// Applies the writes to `store`.
    pub fn apply(&self, store: &VariableStore) -> Result<(), ActionError> {
        for (name, value) in &self.set {
            store.set(name.as_str(), value.clone());
        }

        for name in &self.increment {
            let next = match store.get(name, Value::from(0)) {
                Value::Number(n) => {
                    if let Some(i) = n.as_i64().and_then(|i| i.checked_add(1)) {
                        Value::from(i)
                    } else if let Some(f) = n.as_f64() {
                        Value::from(f + 1.0)
                    } else {
                        return Err(ActionError::new(format!(
                            "cannot increment '{}': value out of range",
                            name
                        )));
                    }
                }
                other => {
                    return Err(ActionError::new(format!(
                        "cannot increment non-numeric variable '{}' (value {})",
                        name, other
                    )))
                }
            };
            store.set(name.as_str(), next);
        }

        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.set.is_empty() && self.increment.is_empty()
    }
}

/// A machine definition as read from a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineDefinition {
    /// Initial variable values.
    #[serde(default)]
    pub variables: Variables,

    pub states: Vec<StateSpec>,

    #[serde(default)]
    pub transitions: Vec<TransitionSpec>,
}

impl MachineDefinition {
    pub fn from_json(s: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_yaml(s: &str) -> Result<Self, CoreError> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Loads a definition, choosing the format by extension. Anything other
    /// than `.json` is read as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    /// Builds a validated [`Machine`].
    pub fn compile(&self) -> Result<Machine, CoreError> {
        let names: HashSet<&str> = self.states.iter().map(|s| s.name.as_str()).collect();

        for spec in &self.states {
            if spec.name.trim().is_empty() {
                return Err(CoreError::InvalidDefinition {
                    reason: "state name must not be empty".to_string(),
                });
            }
        }

        for t in &self.transitions {
            if t.from.is_empty() {
                return Err(CoreError::InvalidDefinition {
                    reason: format!("transition to '{}' has no source state", t.to),
                });
            }
            if let Some(from) = t.from.iter().find(|f| !names.contains(f.as_str())) {
                return Err(CoreError::InvalidDefinition {
                    reason: format!("transition source '{}' is not a state", from),
                });
            }
        }

        let mut machine = Machine::new();
        for spec in &self.states {
            let mut state = State::new(spec.name.clone());
            if spec.start {
                state = state.start();
            }
            if spec.finish {
                state = state.finish();
            }
            if let Some(entry) = spec.entry.clone().filter(|a| !a.is_empty()) {
                state = state.on_entry(move |ctx, _| entry.apply(ctx.variables()));
            }

            for t in self.transitions.iter().filter(|t| t.from.contains(&spec.name)) {
                state.add_transition(compile_transition(t)?);
            }

            machine.add_state(state)?;
        }

        machine.validate()?;
        tracing::debug!(
            "Compiled machine definition: {} states, {} transitions",
            machine.len(),
            self.transitions.len()
        );
        Ok(machine)
    }

    /// Writes the initial variables into `ctx`.
    pub fn seed(&self, ctx: &EngineContext) {
        for (name, value) in &self.variables {
            ctx.set_variable(name.as_str(), value.clone());
        }
    }
}

fn compile_transition(spec: &TransitionSpec) -> Result<Transition, CoreError> {
    let mut transition =
        Transition::new(spec.to.clone()).with_delay(Duration::from_millis(spec.delay_ms));

    if let Some(ref source) = spec.guard {
        let guard = GuardExpr::parse(source)?;
        transition = transition.with_guard(move |_, vars| Ok(guard.evaluate(vars)));
    }

    if let Some(action) = spec.action.clone().filter(|a| !a.is_empty()) {
        transition = transition.with_action(move |store| action.apply(store));
    }

    Ok(transition)
}

fn deserialize_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(name) => vec![name],
        OneOrMany::Many(names) => names,
    })
}
