//! Built-in counter machine, served when no definition file is configured.
//!
//! ```text
//! State_A --(force_finish)--------------------> State_D_Finish
//! State_A --(2s, counter += 1)----------------> State_B
//! State_B --(counter < 3, 1s)-----------------> State_A
//! State_B --(counter >= 3, 0.5s)--------------> State_C
//! ```
//!
//! Setting `force_finish` to true while the A->B delay is pending interrupts
//! it and finishes in `State_D_Finish`.

use fsmlink_core::{ActionError, CoreError, EngineContext, Machine, State, Transition, Variables};
use serde_json::{json, Value};
use std::time::Duration;

fn counter(vars: &Variables) -> Result<i64, ActionError> {
    match vars.get("counter") {
        None => Ok(0),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| ActionError::new(format!("counter is not an integer: {}", v))),
    }
}

fn log_entry(ctx: &EngineContext, vars: &Variables) -> Result<(), ActionError> {
    tracing::info!(
        "Entered {}, counter is {}",
        ctx.current_state().unwrap_or_default(),
        counter(vars)?
    );
    Ok(())
}

/// Builds the demo machine.
pub fn machine() -> Result<Machine, CoreError> {
    let a = State::new("State_A")
        .start()
        .on_entry(log_entry)
        .transition(
            Transition::new("State_D_Finish").with_guard(|_, vars| {
                Ok(vars.get("force_finish").and_then(Value::as_bool).unwrap_or(false))
            }),
        )
        .transition(
            Transition::new("State_B")
                .with_delay(Duration::from_secs(2))
                .with_action(|store| {
                    let next = store.get("counter", json!(0)).as_i64().unwrap_or(0) + 1;
                    tracing::info!("Counter incremented to {}", next);
                    store.set("counter", json!(next));
                    Ok(())
                }),
        );

    let b = State::new("State_B")
        .on_entry(log_entry)
        .transition(
            Transition::new("State_A")
                .with_guard(|_, vars| Ok(counter(vars)? < 3))
                .with_delay(Duration::from_secs(1)),
        )
        .transition(
            Transition::new("State_C")
                .with_guard(|_, vars| Ok(counter(vars)? >= 3))
                .with_delay(Duration::from_millis(500)),
        );

    Machine::new()
        .with_state(a)?
        .with_state(b)?
        .with_state(State::new("State_C").finish().on_entry(log_entry))?
        .with_state(State::new("State_D_Finish").finish().on_entry(log_entry))
}

/// Writes the demo's initial variables.
pub fn seed(ctx: &EngineContext) {
    ctx.set_variable("counter", 0);
    ctx.set_variable("force_finish", false);
}
