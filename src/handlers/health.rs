use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    /// `dry-run`, or the name of the live store backend.
    pub mode: String,
}

pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    Json(ApiResponse::ok(HealthStatus {
        status: "OK".to_string(),
        mode: state.submissions.write_path().describe().to_string(),
    }))
}
