//! HTTP surface of the query service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::engine::SearchCriteria;
use crate::query::{DoctorPage, Existence, QueryService, Status};
use crate::{DirectoryError, Result};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Service answering every route.
    pub service: Arc<QueryService>,
}

/// Raw pagination parameters; validated by [`QueryService::list_raw`].
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    /// Requested page, 1-based.
    pub page: Option<String>,
    /// Requested page size.
    pub size: Option<String>,
}

/// Error response carrying a JSON `{ "error": ... }` body.
#[derive(Debug)]
pub struct ApiError(DirectoryError);

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DirectoryError::InvalidRequest(_) | DirectoryError::Json(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Rejected request: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Builds the router: status, list search and existence search.
pub fn router(service: Arc<QueryService>) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/search/doctorsList", post(list_doctors))
        .route("/search/doctors", post(doctor_exists))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { service })
}

/// Serves the router on `addr` until the process is stopped.
pub async fn serve(addr: SocketAddr, service: Arc<QueryService>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(service)).await?;
    Ok(())
}

async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(state.service.status())
}

async fn list_doctors(
    State(state): State<AppState>,
    params: std::result::Result<Query<PageParams>, QueryRejection>,
    body: Bytes,
) -> std::result::Result<Json<DoctorPage>, ApiError> {
    let Query(params) = params.map_err(|rejection| {
        DirectoryError::InvalidRequest(format!("Malformed query string: {}", rejection.body_text()))
    })?;
    let criteria = parse_criteria(&body)?;
    let page = state
        .service
        .list_raw(&criteria, params.page.as_deref(), params.size.as_deref())?;
    Ok(Json(page))
}

async fn doctor_exists(
    State(state): State<AppState>,
    body: Bytes,
) -> std::result::Result<Json<Existence>, ApiError> {
    let criteria = parse_criteria(&body)?;
    Ok(Json(state.service.exists(&criteria)))
}

/// Parses a criteria body. An empty body or `null` means no criteria.
fn parse_criteria(body: &[u8]) -> Result<SearchCriteria> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(SearchCriteria::default());
    }
    let criteria: Option<SearchCriteria> = serde_json::from_slice(body)
        .map_err(|e| DirectoryError::InvalidRequest(format!("Malformed request body: {}", e)))?;
    Ok(criteria.unwrap_or_default())
}
