//! Interactive REPL.
//!
//! Interpreter events are printed as they arrive while the prompt stays
//! open. Leaving the REPL disconnects, which stops the interpreter.

use crate::commands::{parse_value, print_event};
use colored::Colorize;
use fsmlink_client::Client;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::net::SocketAddr;

const HELP_TEXT: &str = r#"
Available commands:
  help                  Show this help
  set <name> <value>    Set a variable (bool, number, JSON or text)
  stopfsm               Stop the interpreter
  quit, exit            Disconnect and exit
"#;

/// What the REPL should do after a line.
#[derive(Debug, PartialEq)]
enum Action {
    Print(String),
    Set(String, serde_json::Value),
    Stop,
    Quit,
}

pub async fn run(
    client: Client,
    addr: SocketAddr,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "fsmlink CLI".bold().cyan());
    println!("Connecting to {}...", addr);

    let mut events = client.connect().await?;
    println!("{}", "Connected!".green());

    let printer = tokio::spawn(async move {
        while let Some(message) = events.recv().await {
            print_event(&message, json);
        }
        println!("{}", "Interpreter closed the connection.".dimmed());
    });

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".fsmlink_history"))
        .unwrap_or_else(|_| ".fsmlink_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "fsm>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let result = match parse_command(line) {
                    Action::Print(text) => {
                        println!("{}", text);
                        Ok(())
                    }
                    Action::Set(name, value) => client.set_variable(name, value).await,
                    Action::Stop => client.stop_fsm().await,
                    Action::Quit => break,
                };
                if let Err(e) = result {
                    println!("{}: {}\n", "Error".red(), e);
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    let _ = client.close().await;
    printer.abort();
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

fn parse_command(line: &str) -> Action {
    let mut parts = line.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or_default().to_lowercase();
    let rest = parts.next().unwrap_or_default().trim();

    match cmd.as_str() {
        "help" | "?" => Action::Print(HELP_TEXT.to_string()),
        "quit" | "exit" | "q" => Action::Quit,
        "stopfsm" | "stop" => Action::Stop,
        "set" => {
            let mut args = rest.splitn(2, char::is_whitespace);
            match (args.next().filter(|n| !n.is_empty()), args.next()) {
                (Some(name), Some(value)) if !value.trim().is_empty() => {
                    Action::Set(name.to_string(), parse_value(value))
                }
                _ => Action::Print("Usage: set <name> <value>".to_string()),
            }
        }
        _ => Action::Print(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        )),
    }
}
