use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;

use super::ApiError;
use crate::state::AppState;
use tessera_core::namespaces;
use tessera_core::registry::SessionInfo;
use tessera_types::NamespaceTopology;

#[derive(Debug, Serialize)]
pub struct TopologyResponse {
    #[serde(flatten)]
    pub topology: NamespaceTopology,
    /// Edges with a live registry session
    pub online: Vec<String>,
}

pub async fn list_namespaces(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(namespaces::list_namespaces(state.store()).await?))
}

/// Declared topology as read from the store, plus which edges are connected.
pub async fn get_topology(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Json<TopologyResponse>, ApiError> {
    let topology = namespaces::read_topology(state.store(), &namespace).await?;
    let online = state.registry().online_edges(&namespace);
    Ok(Json(TopologyResponse { topology, online }))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.registry().sessions())
}
