//! GET /api/registration/schema: the loaded form schema, for the client.

use axum::{extract::State, Json};

use crate::response::ApiResponse;
use crate::schema::FormSchema;
use crate::state::AppState;

pub async fn form_schema(State(state): State<AppState>) -> Json<ApiResponse<FormSchema>> {
    Json(ApiResponse::ok(state.submissions.schema().clone()))
}
