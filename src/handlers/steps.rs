//! POST /api/registration/steps/:step/validate: gate advancement through the form.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    Json,
};
use serde_json::Value;
use tracing::debug;

use crate::error::RegistrationError;
use crate::response::StepValidationResponse;
use crate::state::AppState;
use crate::validation::validate_step as validate;

pub async fn validate_step(
    State(state): State<AppState>,
    step: Result<Path<usize>, PathRejection>,
    body: Result<Json<Value>, JsonRejection>,
) -> Json<StepValidationResponse> {
    let step = match step {
        Ok(Path(step)) => step,
        Err(rejection) => return invalid(rejection.body_text()),
    };
    let values = match body {
        Ok(Json(Value::Object(values))) => values,
        Ok(Json(_)) => return invalid("expected a JSON object".to_string()),
        Err(rejection) => return invalid(rejection.body_text()),
    };

    let result = validate(state.submissions.schema(), step, &values);
    debug!(step, ok = result.is_ok(), "step validated");
    match result {
        Ok(outcome) => Json(outcome.into()),
        Err(err) => Json(StepValidationResponse::from(&err)),
    }
}

fn invalid(detail: String) -> Json<StepValidationResponse> {
    Json(StepValidationResponse::from(&RegistrationError::InvalidBody(
        detail,
    )))
}
