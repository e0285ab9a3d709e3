//! API Routes
//!
//! REST administrative endpoints mirroring the CLI subcommands.

mod edges;
mod error;
mod routes;
mod topology;


pub use error::ApiError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get},
    Router,
};
use serde::Deserialize;

use crate::state::AppState;
use tessera_types::models::DEFAULT_NAMESPACE;

pub fn router() -> Router<AppState> {
    Router::new()
        // Edges
        .route("/edges", get(edges::list_edges).post(edges::create_edge))
        .route("/edges/:namespace/:name", delete(edges::delete_edge).get(edges::get_edge))
        // Routes
        .route("/routes", get(routes::list_routes).post(routes::create_route))
        .route("/routes/:namespace/:name", delete(routes::delete_route).get(routes::get_route))
        // Topology
        .route("/namespaces", get(topology::list_namespaces))
        .route("/topology/:namespace", get(topology::get_topology))
        .route("/sessions", get(topology::list_sessions))
        // API fallback: return 404 for unknown API endpoints
        .fallback(api_not_found)
}

async fn api_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "Not found"})))
}

/// `?namespace=` filter shared by the list endpoints.
#[derive(Debug, Deserialize)]
pub struct NamespaceQuery {
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for NamespaceQuery {
    fn default() -> Self {
        Self { namespace: default_namespace() }
    }
}

pub(crate) fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}
