//! JSON envelopes returned to the form engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RegistrationError;
use crate::submission::FailedInsert;
use crate::validation::{FieldErrors, StepOutcome};

/// Shared envelope for small endpoints (health, schema).
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Answer to `POST /api/registration`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FailedInsert>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<FieldErrors>,
    /// The submitted payload, echoed back on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Dry-run echo of the statement that would have run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DryRunEcho>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunEcho {
    pub first_query: String,
}

impl SubmissionResponse {
    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(error_message.into()),
            ..Default::default()
        }
    }
}

impl From<&RegistrationError> for SubmissionResponse {
    fn from(err: &RegistrationError) -> Self {
        Self {
            field_errors: err.field_errors().cloned(),
            ..Self::failure(err.user_message())
        }
    }
}

/// Answer to `POST /api/registration/steps/{step}/validate`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepValidationResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<FieldErrors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<StepOutcome> for StepValidationResponse {
    fn from(outcome: StepOutcome) -> Self {
        match outcome {
            StepOutcome::Advance { next_step } => Self {
                ok: true,
                next_step: Some(next_step),
                ..Default::default()
            },
            StepOutcome::Submit => Self {
                ok: true,
                submit: Some(true),
                ..Default::default()
            },
        }
    }
}

impl From<&RegistrationError> for StepValidationResponse {
    fn from(err: &RegistrationError) -> Self {
        Self {
            ok: false,
            field_errors: err.field_errors().cloned(),
            error_message: Some(err.user_message()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_envelope_omits_absent_fields() {
        let body = serde_json::to_value(SubmissionResponse::failure("algo")).unwrap();
        assert_eq!(body, json!({"success": false, "errorMessage": "algo"}));
    }

    #[test]
    fn dry_run_echo_is_camel_case() {
        let response = SubmissionResponse {
            success: true,
            result: Some(DryRunEcho {
                first_query: "INSERT INTO \"t\" DEFAULT VALUES".into(),
            }),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(response).unwrap(),
            json!({"success": true, "result": {"firstQuery": "INSERT INTO \"t\" DEFAULT VALUES"}})
        );
    }

    #[test]
    fn step_outcomes_serialize() {
        let advance = StepValidationResponse::from(StepOutcome::Advance { next_step: 2 });
        assert_eq!(
            serde_json::to_value(advance).unwrap(),
            json!({"ok": true, "nextStep": 2})
        );
        let submit = StepValidationResponse::from(StepOutcome::Submit);
        assert_eq!(
            serde_json::to_value(submit).unwrap(),
            json!({"ok": true, "submit": true})
        );
    }
}
