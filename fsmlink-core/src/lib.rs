//! # fsmlink-core
//!
//! Execution engine for fsmlink.
//!
//! This crate provides:
//! - The state graph (states, guarded and delayed transitions)
//! - A thread-safe variable store with change notification
//! - Interruptible, stoppable delays
//! - The run loop that walks the graph and reports lifecycle events
//! - Declarative machine definitions and guard expressions

pub mod context;
pub mod definition;
pub mod delay;
pub mod error;
pub mod event;
pub mod guard;
pub mod interpreter;
pub mod machine;
pub mod state;
pub mod variables;

pub use context::EngineContext;
pub use definition::{ActionSpec, MachineDefinition};
pub use delay::{DelayController, DelayOutcome};
pub use error::{ActionError, CoreError};
pub use event::{EngineEvent, EventSink, NullSink, RecordingSink};
pub use guard::GuardExpr;
pub use interpreter::{Interpreter, Outcome};
pub use machine::Machine;
pub use state::{State, Transition};
pub use variables::{VariableStore, Variables};
