//! fsmlink - finite-state-machine interpreter
//!
//! Runs one machine, driven and observed by a single remote controller
//! speaking line-delimited JSON.

mod demo;

use fsmlink_core::{MachineDefinition, Outcome};
use fsmlink_server::config::CONFIG_ENV;
use fsmlink_server::{Config, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var(CONFIG_ENV) {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting fsmlink");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Write timeout: {}ms", config.network.write_timeout_ms);

    let definition = match config.machine.definition {
        Some(ref path) => {
            tracing::info!("  Machine: {}", path.display());
            Some(MachineDefinition::from_file(path).map_err(|e| {
                tracing::error!("Failed to load machine definition: {}", e);
                e
            })?)
        }
        None => {
            tracing::info!("  Machine: built-in demo");
            None
        }
    };

    let machine = match definition {
        Some(ref def) => def.compile()?,
        None => demo::machine()?,
    };

    let server = Server::bind(ServerConfig::from(&config.network), machine).await?;
    let ctx = server.context();
    match definition {
        Some(ref def) => def.seed(&ctx),
        None => demo::seed(&ctx),
    }

    let shutdown_ctx = ctx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal");
                shutdown_ctx.stop();
            }
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    match server.serve().await? {
        Outcome::Finished(state) => tracing::info!("FSM finished in state {}", state),
        Outcome::Stuck(state) => tracing::warn!("FSM stuck in state {}", state),
        Outcome::Stopped => tracing::info!("FSM stopped"),
        Outcome::Faulted(message) => tracing::error!("FSM failed: {}", message),
    }

    tracing::info!("Final variables: {}", serde_json::to_string(&ctx.snapshot())?);
    Ok(())
}
