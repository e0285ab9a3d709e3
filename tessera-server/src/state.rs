//! Application State
//!
//! Holds shared state for the server: the store-backed managers and the registry.

use std::sync::Arc;
use std::time::Instant;

use tessera_core::store::KvStore;
use tessera_core::{EdgeManager, RegistryServer, RouteManager};
use tessera_types::models::RegistryConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub(crate) inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
    pub store: Arc<dyn KvStore>,
    pub edges: EdgeManager,
    pub routes: RouteManager,
    pub registry: RegistryServer,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn KvStore>, registry_config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                edges: EdgeManager::new(store.clone()),
                routes: RouteManager::new(store.clone()),
                registry: RegistryServer::new(registry_config),
                store,
                started_at: Instant::now(),
            }),
        }
    }

    pub fn store(&self) -> &dyn KvStore {
        self.inner.store.as_ref()
    }

    pub fn edges(&self) -> &EdgeManager {
        &self.inner.edges
    }

    pub fn routes(&self) -> &RouteManager {
        &self.inner.routes
    }

    pub fn registry(&self) -> &RegistryServer {
        &self.inner.registry
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    /// Feed both managers' change streams into the registry.
    pub async fn spawn_followers(&self) -> anyhow::Result<Vec<tokio::task::JoinHandle<()>>> {
        let edge_changes = self.edges().subscribe().await?;
        let route_changes = self.routes().subscribe().await?;

        let registry = self.registry().clone();
        let edges = tokio::spawn(async move { registry.follow_edges(edge_changes).await });
        let registry = self.registry().clone();
        let routes = tokio::spawn(async move { registry.follow_routes(route_changes).await });
        Ok(vec![edges, routes])
    }
}

pub(crate) fn get_instance_id() -> String {
    use std::sync::OnceLock;
    static INSTANCE_ID: OnceLock<String> = OnceLock::new();

    INSTANCE_ID
        .get_or_init(|| {
            let hostname = hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string());
            let pid = std::process::id();
            format!("{}-{}", hostname, pid)
        })
        .clone()
}
