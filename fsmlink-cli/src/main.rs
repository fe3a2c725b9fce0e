//! fsmlink-cli - Command-line controller for fsmlink
//!
//! Provides both a REPL and one-shot commands. An interpreter serves a
//! single controller and stops when it disconnects, so every command keeps
//! the connection open until the run ends.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use fsmlink_client::{Client, ConnectionConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fsmlink-cli")]
#[command(about = "Command-line controller for fsmlink interpreters")]
#[command(version)]
struct Cli {
    /// Interpreter address
    #[arg(short, long, default_value = "127.0.0.1:65432", env = "FSMLINK_ADDR")]
    server: SocketAddr,

    /// Connect timeout in milliseconds
    #[arg(long, default_value = "5000")]
    connect_timeout_ms: u64,

    /// Print events as raw JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive REPL
    Repl,

    /// Print interpreter events until the run ends
    Watch,

    /// Set a variable, then follow the run
    Set {
        /// Variable name
        name: String,

        /// Value (bool, number, JSON or text)
        value: String,
    },

    /// Stop the interpreter and print its final events
    Stop,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = ConnectionConfig::new(cli.server)
        .with_connect_timeout(Duration::from_millis(cli.connect_timeout_ms));
    let client = Client::new(config);

    let command = cli.command.unwrap_or(Commands::Repl);
    if let Commands::Repl = command {
        return repl::run(client, cli.server, cli.json).await;
    }

    let events = client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;
    tracing::debug!("Connected to {}", cli.server);

    let sent = match command {
        Commands::Repl | Commands::Watch => Ok(()),
        Commands::Set { name, value } => {
            let value = commands::parse_value(&value);
            eprintln!("{} {} = {}", "Setting".green(), name.yellow(), value);
            client.set_variable(name, value).await
        }
        Commands::Stop => client.stop_fsm().await,
    };
    if let Err(e) = sent {
        eprintln!("{}: {}", "Error".red(), e);
        let _ = client.close().await;
        std::process::exit(1);
    }

    eprintln!("{}", "Press Ctrl+C to disconnect...".dimmed());
    commands::follow(&client, events, cli.json).await;

    Ok(())
}
