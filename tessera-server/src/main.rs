//! Tessera - Overlay Network Control Plane
//!
//! One binary, two roles:
//! - `tessera serve` (the default) runs the controller: the agent registry on the
//!   listen address and the REST admin API on `/api/v1/*`
//! - every other subcommand is an admin client writing to the shared store
//!
//! Agents connect to the registry at `listen_addr` (default 0.0.0.0:58422).

#![allow(clippy::print_stdout, reason = "CLI tool outputs to stdout")]

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod api;
mod cli;
mod commands;
mod router;
mod server_utils;
mod state;
#[cfg(test)]
mod test_helpers;

use cli::{Cli, Commands};
use state::AppState;
use tessera_core::config::{apply_env_overrides, read_config};
use tessera_core::logger::init_logger;
use tessera_core::store::KvStore;
use tessera_core::{MemoryStore, PostgresStore};
use tessera_types::models::{ControllerConfig, StoreBackend};

/// Fd index of the REST listener under socket activation; the registry takes the next one.
const API_FD_INDEX: usize = 0;
const REGISTRY_FD_INDEX: usize = 1;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = read_config(&cli.config)
        .with_context(|| format!("Failed to read {}", cli.config.display()))?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    apply_cli_overrides(&mut config, &cli);

    let _log_guard = init_logger(&config.log)?;

    match cli.command {
        None | Some(Commands::Serve { .. }) => run_server(config).await,
        Some(Commands::Namespace(cmd)) => {
            commands::handle_namespace_command(open_admin_store(&config).await?, cmd).await
        },
        Some(Commands::Edge(cmd)) => {
            commands::handle_edge_command(open_admin_store(&config).await?, cmd).await
        },
        Some(Commands::Route(cmd)) => {
            commands::handle_route_command(open_admin_store(&config).await?, cmd).await
        },
        Some(Commands::Topology { namespace, json }) => {
            commands::handle_topology(open_admin_store(&config).await?, &namespace, json).await
        },
    }
}

/// Flags win over the environment and the config file.
fn apply_cli_overrides(config: &mut ControllerConfig, cli: &Cli) {
    if let Some(url) = &cli.database_url {
        config.store.database_url = url.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    if let Some(Commands::Serve { listen, api_listen, memory }) = &cli.command {
        if let Some(addr) = listen {
            config.listen_addr = addr.clone();
        }
        if let Some(addr) = api_listen {
            config.api_addr = addr.clone();
        }
        if *memory {
            config.store.backend = StoreBackend::Memory;
        }
    }
}

async fn open_postgres(config: &ControllerConfig) -> Result<PostgresStore> {
    let store = PostgresStore::connect(&config.store)
        .await
        .context("Failed to connect to PostgreSQL")?;
    store.run_migrations().await.context("Failed to run store migrations")?;
    Ok(store)
}

/// Admin commands must reach the store the controller watches.
async fn open_admin_store(config: &ControllerConfig) -> Result<Arc<dyn KvStore>> {
    if config.store.backend == StoreBackend::Memory {
        anyhow::bail!(
            "Admin commands need the shared postgres store; the memory backend only lives inside `tessera serve`"
        );
    }
    if config.store.database_url.is_empty() {
        anyhow::bail!("Set --database-url or TESSERA_DATABASE_URL");
    }
    Ok(Arc::new(open_postgres(config).await?))
}

async fn run_server(config: ControllerConfig) -> Result<()> {
    config.check()?;
    let api_addr = config.api_socket_addr()?;
    let listen_addr = config.listen_socket_addr()?;

    info!("🚀 Tessera v{} starting...", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn KvStore> = match config.store.backend {
        StoreBackend::Postgres => {
            let store = open_postgres(&config).await?;
            info!("🗄️ Connected to PostgreSQL store");
            Arc::new(store)
        },
        StoreBackend::Memory => {
            tracing::warn!("⚠️ Using in-memory store, state is lost on exit");
            Arc::new(MemoryStore::new())
        },
    };

    let state = AppState::new(store, config.registry.clone());
    let followers = state.spawn_followers().await?;
    info!("✅ Watching edges and routes");

    let api_listener = server_utils::create_listener(api_addr, API_FD_INDEX)?;
    let registry_listener = server_utils::create_listener(listen_addr, REGISTRY_FD_INDEX)?;

    let shutdown = CancellationToken::new();
    let registry = state.registry().clone();
    let registry_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { registry.serve(registry_listener, shutdown).await })
    };

    let app = router::build_router(state.clone());

    info!("🛰️ Agent registry on {}", listen_addr);
    info!("🔌 Admin API at http://{}/api/v1/", api_addr);

    let api_shutdown = shutdown.clone();
    axum::serve(api_listener, app)
        .with_graceful_shutdown(async move {
            server_utils::shutdown_signal().await;
            api_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    state.registry().shutdown();
    if let Err(e) = registry_task.await {
        tracing::warn!("⚠️ Registry task ended abnormally: {}", e);
    }
    for follower in followers {
        follower.abort();
    }

    info!("👋 Tessera stopped");
    Ok(())
}
