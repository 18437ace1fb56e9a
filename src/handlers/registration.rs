//! POST /api/registration: submit a completed form.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde_json::Value;
use tracing::warn;

use crate::error::RegistrationError;
use crate::response::SubmissionResponse;
use crate::state::AppState;

pub async fn submit(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Json<SubmissionResponse> {
    let payload = match body {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            warn!(%rejection, "rejected registration body");
            let err = RegistrationError::InvalidBody(rejection.body_text());
            return Json(SubmissionResponse::from(&err));
        }
    };

    match state.submissions.submit(payload).await {
        Ok(outcome) => Json(outcome.into()),
        Err(err) => Json(SubmissionResponse::from(&err)),
    }
}
