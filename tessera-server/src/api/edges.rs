use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use super::{default_namespace, ApiError, NamespaceQuery};
use crate::state::AppState;
use tessera_types::Edge;

#[derive(Debug, Deserialize)]
pub struct CreateEdgeRequest {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    pub host_addr: String,
    pub cidr: String,
    #[serde(default)]
    pub platform: String,
}

impl From<CreateEdgeRequest> for Edge {
    fn from(req: CreateEdgeRequest) -> Self {
        Edge::new(req.namespace, req.name, req.host_addr, req.cidr).with_platform(req.platform)
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

/// Stored form is returned, with the CIDR canonicalized.
pub async fn create_edge(
    State(state): State<AppState>,
    Json(payload): Json<CreateEdgeRequest>,
) -> Result<(StatusCode, Json<Edge>), ApiError> {
    let edge = state.edges().add_edge(payload.into()).await?;
    tracing::info!("🌐 Edge added: {}/{} ({})", edge.namespace, edge.name, edge.cidr);
    Ok((StatusCode::CREATED, Json(edge)))
}

pub async fn list_edges(
    State(state): State<AppState>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<Vec<Edge>>, ApiError> {
    Ok(Json(state.edges().list_edges(&query.namespace).await?))
}

pub async fn get_edge(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Edge>, ApiError> {
    match state.edges().get_edge(&namespace, &name).await? {
        Some(edge) => Ok(Json(edge)),
        None => Err(ApiError::NotFound { kind: "edge", namespace, name }),
    }
}

/// Deleting an absent edge succeeds with `deleted: false`.
pub async fn delete_edge(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = state.edges().delete_edge(&namespace, &name).await?;
    if deleted {
        tracing::info!("🗑️ Edge deleted: {}/{}", namespace, name);
    }
    Ok(Json(DeleteResponse { deleted }))
}
