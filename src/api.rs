use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use shuttle_axum::axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::domain::ShortlistRequest;
use crate::engine::{ShortlistEngine, ShortlistOutcome};
use crate::history::{next_run_id, RunHistory, RunRecord};
use crate::metrics::record_outcome;

/// Upper bound for the indication free text, in characters.
pub const MAX_INDICATION_CHARS: usize = 6000;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ShortlistEngine>,
    pub history: Arc<RunHistory>,
}

impl AppState {
    pub fn new(engine: ShortlistEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            history: Arc::new(RunHistory::default()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/shortlist", post(create_shortlist))
        .route("/api/run/{run_id}", get(read_run))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ShortlistResponse {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: ShortlistOutcome,
}

#[derive(Debug)]
pub enum ApiError {
    InvalidRequest(&'static str),
    RunNotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::RunNotFound => (StatusCode::NOT_FOUND, "run_id not found"),
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

fn validate(req: &ShortlistRequest) -> Result<(), ApiError> {
    if req.indication_text.trim().is_empty() {
        return Err(ApiError::InvalidRequest("indication_text must not be empty"));
    }
    if req.indication_text.chars().count() > MAX_INDICATION_CHARS {
        return Err(ApiError::InvalidRequest("indication_text is too long"));
    }
    Ok(())
}

async fn create_shortlist(
    State(state): State<AppState>,
    Json(req): Json<ShortlistRequest>,
) -> Result<Json<ShortlistResponse>, ApiError> {
    if let Err(e) = validate(&req) {
        warn!(target: "shortlist", error = ?e, "rejected shortlist request");
        return Err(e);
    }

    let outcome = state.engine.shortlist(&req);
    record_outcome(outcome.status, &outcome.red_flags, outcome.reliability);

    let run_id = next_run_id();
    let generated_at = Utc::now();
    state.history.push(RunRecord {
        run_id: run_id.clone(),
        created_at: generated_at,
        request: req,
        outcome: outcome.clone(),
    });

    Ok(Json(ShortlistResponse {
        run_id,
        generated_at,
        outcome,
    }))
}

async fn read_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunRecord>, ApiError> {
    state.history.get(&run_id).map(Json).ok_or(ApiError::RunNotFound)
}
