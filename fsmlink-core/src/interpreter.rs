//! The run loop.
//!
//! For each active state the loop runs the entry action, stops on a finish
//! state, and otherwise scans the outgoing transitions in declaration order.
//! The first transition whose guard holds is selected; its action runs, then
//! its delay. A variable write during the delay aborts it and the scan
//! restarts from the first transition. An expired delay commits the move to
//! the target state.

use crate::context::EngineContext;
use crate::delay::DelayOutcome;
use crate::error::CoreError;
use crate::event::EngineEvent;
use crate::machine::Machine;
use crate::state::{State, Transition};
use std::sync::Arc;

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A finish state was reached.
    Finished(String),
    /// No guard held in a non-finish state.
    Stuck(String),
    /// The engine was stopped from outside.
    Stopped,
    /// A guard or action failed.
    Faulted(String),
}

/// Executes a [`Machine`] against an [`EngineContext`].
pub struct Interpreter {
    machine: Arc<Machine>,
    ctx: Arc<EngineContext>,
}

impl Interpreter {
    /// Creates an interpreter after validating the machine.
    pub fn new(machine: Machine, ctx: Arc<EngineContext>) -> Result<Self, CoreError> {
        machine.validate()?;
        Ok(Self {
            machine: Arc::new(machine),
            ctx,
        })
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Runs the machine to a terminal outcome.
    ///
    /// The stop flag is always set on return, so a machine runs at most
    /// once. `Stopped` is the only outcome that emits
    /// [`EngineEvent::Stopped`]; the others have their own terminal event.
    pub async fn run(&self) -> Outcome {
        let outcome = self.drive().await;
        self.ctx.stop();

        if outcome == Outcome::Stopped {
            tracing::info!("Run loop terminated by stop request");
            self.ctx.emit(EngineEvent::Stopped {
                message: "FSM was stopped.".to_string(),
            });
        }

        outcome
    }

    async fn drive(&self) -> Outcome {
        if self.ctx.is_stopped() {
            return Outcome::Stopped;
        }

        let Some(start) = self.machine.start_state() else {
            return self.fault("No start state defined.".to_string());
        };

        tracing::info!("FSM starting at state: {}", start.name());
        self.ctx.set_current_state(start.name());
        self.ctx.emit(EngineEvent::Started {
            start_state: start.name().to_string(),
        });

        let mut current = start;
        loop {
            if self.ctx.is_stopped() {
                return Outcome::Stopped;
            }

            if let Some(outcome) = self.enter(current) {
                return outcome;
            }

            match self.advance(current).await {
                Ok(next) => {
                    tracing::info!("Completing transition: {} -> {}", current.name(), next.name());
                    self.ctx.set_current_state(next.name());
                    current = next;
                }
                Err(outcome) => return outcome,
            }
        }
    }

    /// Runs the entry step. Returns an outcome if the run ends here.
    fn enter(&self, state: &State) -> Option<Outcome> {
        tracing::info!("Processing state: {}", state.name());
        self.ctx.emit(EngineEvent::EnteredState {
            name: state.name().to_string(),
            is_finish: state.is_finish(),
        });

        if let Some(action) = state.entry_action() {
            let snapshot = self.ctx.snapshot();
            if let Err(e) = action(&self.ctx, &snapshot) {
                return Some(self.fault(format!(
                    "Action error in state {}: {}",
                    state.name(),
                    e
                )));
            }
            self.ctx.emit(EngineEvent::StateActionExecuted {
                state: state.name().to_string(),
            });
        }

        if self.ctx.is_stopped() {
            return Some(Outcome::Stopped);
        }

        if state.is_finish() {
            tracing::info!("Reached finish state: {}", state.name());
            self.ctx.emit(EngineEvent::Finished {
                state: state.name().to_string(),
            });
            return Some(Outcome::Finished(state.name().to_string()));
        }

        None
    }

    /// Selects and commits one transition out of `state`.
    async fn advance<'m>(&'m self, state: &'m State) -> Result<&'m State, Outcome> {
        loop {
            if self.ctx.is_stopped() {
                return Err(Outcome::Stopped);
            }
            self.ctx.delay().clear_interrupt();

            let selected = match self.select(state) {
                Ok(Some(t)) => t,
                Ok(None) => {
                    tracing::warn!("FSM stuck in state {}: no valid transitions", state.name());
                    self.ctx.emit(EngineEvent::Stuck {
                        state: state.name().to_string(),
                    });
                    return Err(Outcome::Stuck(state.name().to_string()));
                }
                Err(outcome) => return Err(outcome),
            };

            tracing::info!(
                "Selected transition: {} -> {}",
                state.name(),
                selected.target()
            );
            self.ctx.emit(EngineEvent::TransitionTaken {
                from: state.name().to_string(),
                to: selected.target().to_string(),
                delay: selected.delay(),
            });

            if let Some(action) = selected.action() {
                if let Err(e) = action(self.ctx.variables()) {
                    return Err(self.fault(format!("Transition action error: {}", e)));
                }
                self.ctx.emit(EngineEvent::TransitionActionExecuted {
                    from: state.name().to_string(),
                    to: selected.target().to_string(),
                });
            }

            if self.ctx.is_stopped() {
                return Err(Outcome::Stopped);
            }

            if !selected.delay().is_zero() {
                tracing::info!(
                    "Starting delay of {:.2}s for transition to {}",
                    selected.delay().as_secs_f64(),
                    selected.target()
                );
                match self.ctx.delay().wait(selected.delay()).await {
                    DelayOutcome::Expired => {
                        tracing::debug!("Delay completed for transition to {}", selected.target());
                    }
                    DelayOutcome::Interrupted => {
                        tracing::info!(
                            "Delay for transition to {} interrupted, re-evaluating state {}",
                            selected.target(),
                            state.name()
                        );
                        continue;
                    }
                    DelayOutcome::Stopped => return Err(Outcome::Stopped),
                }
            }

            return match self.machine.state(selected.target()) {
                Some(next) => Ok(next),
                None => Err(self.fault(format!(
                    "Target state '{}' not found.",
                    selected.target()
                ))),
            };
        }
    }

    /// Returns the first transition whose guard holds.
    fn select<'m>(&self, state: &'m State) -> Result<Option<&'m Transition>, Outcome> {
        for t in state.transitions() {
            let snapshot = self.ctx.snapshot();
            match t.evaluate(&self.ctx, &snapshot) {
                Ok(true) => return Ok(Some(t)),
                Ok(false) => {}
                Err(e) => {
                    return Err(self.fault(format!(
                        "Condition error for transition from {}: {}",
                        state.name(),
                        e
                    )))
                }
            }
            if self.ctx.is_stopped() {
                return Err(Outcome::Stopped);
            }
        }
        Ok(None)
    }

    fn fault(&self, message: String) -> Outcome {
        tracing::error!("{}", message);
        self.ctx.emit(EngineEvent::Faulted {
            message: message.clone(),
        });
        Outcome::Faulted(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActionError;
    use crate::event::RecordingSink;
    use crate::state::Transition;
    use proptest::prelude::*;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn setup(machine: Machine) -> (Arc<RecordingSink>, Interpreter) {
        let sink = Arc::new(RecordingSink::new());
        let ctx = EngineContext::new(sink.clone());
        let interpreter = Interpreter::new(machine, ctx).unwrap();
        (sink, interpreter)
    }

    fn machine(states: Vec<State>) -> Machine {
        let mut machine = Machine::new();
        for s in states {
            machine.add_state(s).unwrap();
        }
        machine
    }

    fn var_equals(
        name: &'static str,
        expected: Value,
    ) -> impl Fn(&EngineContext, &crate::Variables) -> Result<bool, ActionError> {
        move |_, vars| Ok(vars.get(name) == Some(&expected))
    }

    fn taken(from: &str, to: &str, delay_ms: u64) -> EngineEvent {
        EngineEvent::TransitionTaken {
            from: from.to_string(),
            to: to.to_string(),
            delay: Duration::from_millis(delay_ms),
        }
    }

    fn entered(name: &str, is_finish: bool) -> EngineEvent {
        EngineEvent::EnteredState {
            name: name.to_string(),
            is_finish,
        }
    }

    #[tokio::test]
    async fn test_immediate_transition_then_stuck() {
        let (sink, interpreter) = setup(machine(vec![
            State::new("State1").start().transition(Transition::new("State2")),
            State::new("State2"),
        ]));

        let outcome = interpreter.run().await;

        assert_eq!(outcome, Outcome::Stuck("State2".to_string()));
        assert!(interpreter.context().is_stopped());
        assert_eq!(
            sink.events(),
            vec![
                EngineEvent::Started {
                    start_state: "State1".to_string()
                },
                entered("State1", false),
                taken("State1", "State2", 0),
                entered("State2", false),
                EngineEvent::Stuck {
                    state: "State2".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_finish_state_skips_transitions() {
        let (sink, interpreter) = setup(machine(vec![
            State::new("A").start().transition(Transition::new("Done")),
            State::new("Done")
                .finish()
                .on_entry(|ctx, _| {
                    ctx.set_variable("finished", true);
                    Ok(())
                })
                .transition(Transition::new("A")),
        ]));

        let outcome = interpreter.run().await;

        assert_eq!(outcome, Outcome::Finished("Done".to_string()));
        let events = sink.events();
        assert_eq!(
            &events[events.len() - 3..],
            &[
                EngineEvent::VariableUpdated {
                    name: "finished".to_string(),
                    value: json!(true)
                },
                EngineEvent::StateActionExecuted {
                    state: "Done".to_string()
                },
                EngineEvent::Finished {
                    state: "Done".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_first_true_guard_wins() {
        let (sink, interpreter) = setup(machine(vec![
            State::new("A")
                .start()
                .transition(Transition::new("B").with_guard(|_, _| Ok(false)))
                .transition(Transition::new("C"))
                .transition(Transition::new("D")),
            State::new("B").finish(),
            State::new("C").finish(),
            State::new("D").finish(),
        ]));

        assert_eq!(interpreter.run().await, Outcome::Finished("C".to_string()));
        assert!(sink.events().contains(&taken("A", "C", 0)));
        assert!(!sink.events().contains(&taken("A", "D", 0)));
    }

    #[tokio::test]
    async fn test_transition_action_writes_live_variables() {
        let (sink, interpreter) = setup(machine(vec![
            State::new("A").start().transition(Transition::new("B").with_action(|vars| {
                let n = vars.get("counter", json!(0)).as_i64().unwrap_or(0);
                vars.set("counter", json!(n + 1));
                Ok(())
            })),
            State::new("B")
                .transition(Transition::new("C").with_guard(var_equals("counter", json!(1)))),
            State::new("C").finish(),
        ]));

        assert_eq!(interpreter.run().await, Outcome::Finished("C".to_string()));
        assert!(sink.events().contains(&EngineEvent::TransitionActionExecuted {
            from: "A".to_string(),
            to: "B".to_string()
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_during_delay_reselects() {
        let (sink, interpreter) = setup(machine(vec![
            State::new("State1")
                .start()
                .transition(
                    Transition::new("Waiting")
                        .with_guard(var_equals("x", json!(1)))
                        .with_delay(Duration::from_millis(5000)),
                )
                .transition(Transition::new("Other").with_guard(var_equals("x", json!(0)))),
            State::new("Waiting").finish(),
            State::new("Other").finish(),
        ]));
        let ctx = interpreter.context().clone();
        ctx.set_variable("x", 1);

        let run = tokio::spawn(async move { interpreter.run().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        ctx.set_variable("x", 0);

        assert_eq!(run.await.unwrap(), Outcome::Finished("Other".to_string()));
        let events = sink.events();
        assert!(events.contains(&taken("State1", "Waiting", 5000)));
        assert!(events.contains(&taken("State1", "Other", 0)));
        assert!(!events.contains(&entered("Waiting", true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_during_delay_can_leave_machine_stuck() {
        let (sink, interpreter) = setup(machine(vec![
            State::new("State1").start().transition(
                Transition::new("Waiting")
                    .with_guard(var_equals("x", json!(1)))
                    .with_delay(Duration::from_millis(5000)),
            ),
            State::new("Waiting").finish(),
        ]));
        let ctx = interpreter.context().clone();
        ctx.set_variable("x", 1);

        let run = tokio::spawn(async move { interpreter.run().await });
        tokio::time::sleep(Duration::from_secs(2)).await;
        ctx.set_variable("x", 0);

        assert_eq!(run.await.unwrap(), Outcome::Stuck("State1".to_string()));
        assert!(!sink.events().contains(&entered("Waiting", true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_restarts_from_first_transition() {
        // An earlier transition becoming true preempts the one mid-delay.
        let (_sink, interpreter) = setup(machine(vec![
            State::new("A")
                .start()
                .transition(Transition::new("Urgent").with_guard(var_equals("urgent", json!(true))))
                .transition(Transition::new("Slow").with_delay(Duration::from_secs(10))),
            State::new("Urgent").finish(),
            State::new("Slow").finish(),
        ]));
        let ctx = interpreter.context().clone();

        let run = tokio::spawn(async move { interpreter.run().await });
        tokio::time::sleep(Duration::from_secs(3)).await;
        ctx.set_variable("urgent", true);

        assert_eq!(run.await.unwrap(), Outcome::Finished("Urgent".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_write_restarts_same_delay() {
        let (sink, interpreter) = setup(machine(vec![
            State::new("A")
                .start()
                .transition(Transition::new("B").with_delay(Duration::from_secs(5))),
            State::new("B").finish(),
        ]));
        let ctx = interpreter.context().clone();

        let started = tokio::time::Instant::now();
        let run = tokio::spawn(async move { interpreter.run().await });
        tokio::time::sleep(Duration::from_secs(3)).await;
        ctx.set_variable("noise", 1);

        assert_eq!(run.await.unwrap(), Outcome::Finished("B".to_string()));
        // The reselected transition waits its full delay again.
        assert!(started.elapsed() >= Duration::from_secs(8));
        let taken_count = sink
            .events()
            .iter()
            .filter(|e| matches!(e, EngineEvent::TransitionTaken { .. }))
            .count();
        assert_eq!(taken_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_before_delay_starts_does_not_interrupt() {
        let (sink, interpreter) = setup(machine(vec![
            State::new("A").start().transition(
                Transition::new("B")
                    .with_delay(Duration::from_secs(5))
                    .with_action(|vars| {
                        vars.set("armed", json!(true));
                        Ok(())
                    }),
            ),
            State::new("B").finish(),
        ]));
        let ctx = interpreter.context().clone();

        let started = tokio::time::Instant::now();
        assert_eq!(interpreter.run().await, Outcome::Finished("B".to_string()));
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(ctx.get_variable("armed", json!(false)), json!(true));

        let taken_count = sink
            .events()
            .iter()
            .filter(|e| matches!(e, EngineEvent::TransitionTaken { .. }))
            .count();
        assert_eq!(taken_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_delay() {
        let (sink, interpreter) = setup(machine(vec![
            State::new("A")
                .start()
                .transition(Transition::new("B").with_delay(Duration::from_secs(60))),
            State::new("B").finish(),
        ]));
        let ctx = interpreter.context().clone();

        let run = tokio::spawn(async move { interpreter.run().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        ctx.stop();

        assert_eq!(run.await.unwrap(), Outcome::Stopped);
        let events = sink.events();
        assert_eq!(
            events.last(),
            Some(&EngineEvent::Stopped {
                message: "FSM was stopped.".to_string()
            })
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, EngineEvent::TransitionTaken { .. }))
                .count(),
            1
        );
        assert!(!events.contains(&entered("B", true)));
    }

    #[tokio::test]
    async fn test_guard_fault_emits_single_error() {
        let (sink, interpreter) = setup(machine(vec![
            State::new("A")
                .start()
                .transition(
                    Transition::new("B")
                        .with_guard(|_, _| Err(ActionError::new("division by zero"))),
                )
                .transition(Transition::new("B")),
            State::new("B").finish(),
        ]));

        let outcome = interpreter.run().await;

        assert!(matches!(outcome, Outcome::Faulted(ref m) if m.contains("division by zero")));
        let events = sink.events();
        let errors = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::Faulted { .. }))
            .count();
        assert_eq!(errors, 1);
        assert!(matches!(events.last(), Some(EngineEvent::Faulted { .. })));
    }

    #[tokio::test]
    async fn test_entry_action_fault_is_fatal() {
        let (sink, interpreter) = setup(machine(vec![
            State::new("A")
                .start()
                .on_entry(|_, _| Err("bad entry".into()))
                .transition(Transition::new("B")),
            State::new("B").finish(),
        ]));

        let outcome = interpreter.run().await;

        assert_eq!(
            outcome,
            Outcome::Faulted("Action error in state A: bad entry".to_string())
        );
        assert!(!sink
            .events()
            .iter()
            .any(|e| matches!(e, EngineEvent::TransitionTaken { .. })));
    }

    #[tokio::test]
    async fn test_transition_action_fault_is_fatal() {
        let (sink, interpreter) = setup(machine(vec![
            State::new("A")
                .start()
                .transition(Transition::new("B").with_action(|_| Err("nope".into()))),
            State::new("B").finish(),
        ]));

        let outcome = interpreter.run().await;

        assert_eq!(
            outcome,
            Outcome::Faulted("Transition action error: nope".to_string())
        );
        assert!(!sink.events().contains(&entered("B", true)));
    }

    #[tokio::test]
    async fn test_entry_action_can_stop() {
        let (_sink, interpreter) = setup(machine(vec![
            State::new("A")
                .start()
                .on_entry(|ctx, _| {
                    ctx.stop();
                    Ok(())
                })
                .transition(Transition::new("B")),
            State::new("B").finish(),
        ]));

        assert_eq!(interpreter.run().await, Outcome::Stopped);
    }

    #[tokio::test]
    async fn test_stopped_before_run() {
        let (sink, interpreter) = setup(machine(vec![State::new("A").start().finish()]));
        interpreter.context().stop();

        assert_eq!(interpreter.run().await, Outcome::Stopped);
        assert!(!sink
            .events()
            .iter()
            .any(|e| matches!(e, EngineEvent::Started { .. })));
    }

    #[test]
    fn test_new_rejects_invalid_machine() {
        let ctx = EngineContext::new(Arc::new(RecordingSink::new()));
        let result = Interpreter::new(
            machine(vec![State::new("A").start().transition(Transition::new("Ghost"))]),
            ctx,
        );
        assert!(matches!(result, Err(CoreError::UnknownTarget { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_with_counter() {
        // A -> B (increment, 2s) ; B -> A while counter < 3 ; B -> C otherwise.
        let below = |limit: i64| {
            move |_: &EngineContext, vars: &crate::Variables| {
                Ok::<_, ActionError>(
                    vars.get("counter").and_then(Value::as_i64).unwrap_or(0) < limit,
                )
            }
        };
        let (sink, interpreter) = setup(machine(vec![
            State::new("A").start().transition(
                Transition::new("B")
                    .with_delay(Duration::from_secs(2))
                    .with_action(|vars| {
                        let n = vars.get("counter", json!(0)).as_i64().unwrap_or(0);
                        vars.set("counter", json!(n + 1));
                        Ok(())
                    }),
            ),
            State::new("B")
                .transition(Transition::new("A").with_guard(below(3)))
                .transition(Transition::new("C")),
            State::new("C").finish(),
        ]));
        let ctx = interpreter.context().clone();

        assert_eq!(interpreter.run().await, Outcome::Finished("C".to_string()));
        assert_eq!(ctx.get_variable("counter", json!(0)), json!(3));
        let entries = sink
            .events()
            .iter()
            .filter(|e| **e == entered("B", false))
            .count();
        assert_eq!(entries, 3);
    }

    proptest! {
        #[test]
        fn selection_is_deterministic(flags in proptest::collection::vec(any::<bool>(), 1..8)) {
            let mut a = State::new("A").start();
            for (i, flag) in flags.iter().enumerate() {
                let flag = *flag;
                a = a.transition(Transition::new(format!("T{i}")).with_guard(move |_, _| Ok(flag)));
            }
            let mut states = vec![a];
            for i in 0..flags.len() {
                states.push(State::new(format!("T{i}")).finish());
            }
            let (_sink, interpreter) = setup(machine(states));
            let start = interpreter.machine().start_state().unwrap();

            let first = interpreter.select(start).unwrap().map(|t| t.target().to_string());
            let second = interpreter.select(start).unwrap().map(|t| t.target().to_string());
            let expected = flags.iter().position(|f| *f).map(|i| format!("T{i}"));

            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first, expected);
        }
    }
}
