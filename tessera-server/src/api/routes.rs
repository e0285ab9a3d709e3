use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;

use super::edges::DeleteResponse;
use super::{default_namespace, ApiError, NamespaceQuery};
use crate::state::AppState;
use tessera_types::Route;

#[derive(Debug, Deserialize)]
pub struct CreateRouteRequest {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    pub listener: String,
    pub cidr: String,
}

impl From<CreateRouteRequest> for Route {
    fn from(req: CreateRouteRequest) -> Self {
        Route::new(req.namespace, req.name, req.listener, req.cidr)
    }
}

pub async fn create_route(
    State(state): State<AppState>,
    Json(payload): Json<CreateRouteRequest>,
) -> Result<(StatusCode, Json<Route>), ApiError> {
    let route = state.routes().add_route(payload.into()).await?;
    tracing::info!(
        "🧭 Route added: {}/{} {} via {}",
        route.namespace,
        route.name,
        route.cidr,
        route.listener
    );
    Ok((StatusCode::CREATED, Json(route)))
}

pub async fn list_routes(
    State(state): State<AppState>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<Vec<Route>>, ApiError> {
    Ok(Json(state.routes().list_routes(&query.namespace).await?))
}

pub async fn get_route(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Route>, ApiError> {
    match state.routes().get_route(&namespace, &name).await? {
        Some(route) => Ok(Json(route)),
        None => Err(ApiError::NotFound { kind: "route", namespace, name }),
    }
}

pub async fn delete_route(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = state.routes().delete_route(&namespace, &name).await?;
    if deleted {
        tracing::info!("🗑️ Route deleted: {}/{}", namespace, name);
    }
    Ok(Json(DeleteResponse { deleted }))
}
