//! Command execution and output formatting.

use colored::Colorize;
use fsmlink_client::Client;
use fsmlink_protocol::OutboundMessage;
use serde_json::Value;
use tokio::sync::mpsc;

/// Parses a command-line value.
///
/// Tried in order: boolean (any case), integer, float, JSON, and finally
/// the raw text as a string.
pub fn parse_value(raw: &str) -> Value {
    let raw = raw.trim();

    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return v;
    }
    Value::String(raw.to_string())
}

/// Formats one interpreter event for the terminal.
pub fn format_event(message: &OutboundMessage) -> String {
    let body = match message {
        OutboundMessage::FsmConnected { message } => message.green().to_string(),
        OutboundMessage::FsmStarted { start_state } => {
            format!("{} at {}", "Started".green(), start_state.cyan())
        }
        OutboundMessage::CurrentState { name, is_finish } => {
            if *is_finish {
                format!("State {} {}", name.cyan().bold(), "(finish)".dimmed())
            } else {
                format!("State {}", name.cyan().bold())
            }
        }
        OutboundMessage::VariableUpdate { name, value } => {
            format!("{} = {}", name.yellow(), value)
        }
        OutboundMessage::StateActionExecuted { state_name } => {
            format!("Entry action done in {}", state_name).dimmed().to_string()
        }
        OutboundMessage::TransitionTaken {
            from_state,
            to_state,
            delay,
        } => {
            let edge = format!("{} → {}", from_state.cyan(), to_state.cyan());
            if *delay > 0 {
                format!("{} after {}ms", edge, delay)
            } else {
                edge
            }
        }
        OutboundMessage::TransitionActionExecuted {
            from_state,
            to_state,
        } => format!("Transition action done ({} → {})", from_state, to_state)
            .dimmed()
            .to_string(),
        OutboundMessage::FsmFinished { finish_state } => {
            format!("{} in {}", "Finished".green().bold(), finish_state.cyan())
        }
        OutboundMessage::FsmStuck { state_name } => {
            format!("{} in {}", "Stuck".yellow().bold(), state_name.cyan())
        }
        OutboundMessage::FsmError { message } => {
            format!("{}: {}", "Error".red().bold(), message)
        }
        OutboundMessage::FsmStopped { message } => message.yellow().to_string(),
    };

    let time = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
    format!("{} {}", time.dimmed(), body)
}

/// Prints one event, as raw JSON or formatted.
pub fn print_event(message: &OutboundMessage, json: bool) {
    if json {
        match serde_json::to_string(message) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("{}: {}", "Error".red(), e),
        }
    } else {
        println!("{}", format_event(message));
    }
}

/// Prints events until the run ends, the connection closes or Ctrl+C.
pub async fn follow(
    client: &Client,
    mut events: mpsc::UnboundedReceiver<OutboundMessage>,
    json: bool,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(message) => {
                    print_event(&message, json);
                    if message.is_terminal() {
                        break;
                    }
                }
                None => {
                    eprintln!("{}", "Connection closed".red());
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Disconnecting (the interpreter will stop)...".dimmed());
                break;
            }
        }
    }

    if let Err(e) = client.close().await {
        tracing::debug!("Close failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_value_order() {
        assert_eq!(parse_value("TRUE"), json!(true));
        assert_eq!(parse_value("False"), json!(false));
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("-7"), json!(-7));
        assert_eq!(parse_value("2.5"), json!(2.5));
        assert_eq!(parse_value("null"), json!(null));
        assert_eq!(parse_value("[1, 2]"), json!([1, 2]));
        assert_eq!(parse_value("{\"a\": 1}"), json!({"a": 1}));
        assert_eq!(parse_value("\"quoted\""), json!("quoted"));
        assert_eq!(parse_value("open door"), json!("open door"));
        assert_eq!(parse_value("  padded "), json!("padded"));
    }

    #[test]
    fn test_parse_value_rejects_non_finite_floats() {
        assert_eq!(parse_value("NaN"), json!("NaN"));
        assert_eq!(parse_value("inf"), json!("inf"));
    }

    #[test]
    fn test_format_event_mentions_states() {
        colored::control::set_override(false);
        let line = format_event(&OutboundMessage::TransitionTaken {
            from_state: "A".to_string(),
            to_state: "B".to_string(),
            delay: 2000,
        });
        assert!(line.ends_with("A → B after 2000ms"), "{}", line);

        let line = format_event(&OutboundMessage::CurrentState {
            name: "C".to_string(),
            is_finish: true,
        });
        assert!(line.ends_with("State C (finish)"), "{}", line);
    }
}
