//! Admin HTTP endpoints: liveness and registry statistics.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::json;
use sso_ticket::{TicketError, TicketRegistry};

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<dyn TicketRegistry>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TicketStats {
    pub session_count: u64,
    pub service_ticket_count: u64,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tickets/stats", get(ticket_stats))
        .with_state(state)
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

pub async fn ticket_stats(State(state): State<AdminState>) -> Result<Json<TicketStats>, AdminError> {
    let session_count = state.registry.session_count().await?;
    let service_ticket_count = state.registry.service_ticket_count().await?;
    Ok(Json(TicketStats {
        session_count,
        service_ticket_count,
    }))
}

/// Registry failure surfaced over HTTP.
#[derive(Debug)]
pub struct AdminError(TicketError);

impl From<TicketError> for AdminError {
    fn from(err: TicketError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = if self.0.is_unavailable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        tracing::warn!(error = %self.0, status = status.as_u16(), "Admin request failed");
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
