//! Shared variable store.
//!
//! The store is the only engine-internal resource shared between the run
//! loop and the peer reader. Every access takes the lock for exactly one
//! read, write, or copy; user callbacks never run while it is held.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A point-in-time copy of all variables.
pub type Variables = BTreeMap<String, Value>;

/// Hook invoked after every write, outside the lock.
pub type WriteHook = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Mutation-guarded name -> value mapping.
pub struct VariableStore {
    values: RwLock<Variables>,
    on_write: Option<WriteHook>,
}

impl VariableStore {
    /// Creates an empty store without a write hook.
    pub fn new() -> Self {
        Self {
            values: RwLock::new(Variables::new()),
            on_write: None,
        }
    }

    /// Creates an empty store that calls `hook` after every write.
    pub fn with_hook(hook: WriteHook) -> Self {
        Self {
            values: RwLock::new(Variables::new()),
            on_write: Some(hook),
        }
    }

    /// Stores `value` under `name`, then fires the write hook.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.values.write().insert(name.clone(), value.clone());

        if let Some(ref hook) = self.on_write {
            hook(&name, &value);
        }
    }

    /// Returns the value stored under `name`, or `default` if absent.
    pub fn get(&self, name: &str, default: Value) -> Value {
        self.values.read().get(name).cloned().unwrap_or(default)
    }

    /// Returns the value stored under `name`, if any.
    pub fn try_get(&self, name: &str) -> Option<Value> {
        self.values.read().get(name).cloned()
    }

    /// Returns a consistent copy of every variable.
    pub fn snapshot(&self) -> Variables {
        self.values.read().clone()
    }

    /// Returns the number of variables.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableStore")
            .field("values", &*self.values.read())
            .field("has_hook", &self.on_write.is_some())
            .finish()
    }
}
