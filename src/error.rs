//! Errors raised before a submission reaches the write path.
//!
//! Database failures are not errors at this level: they are outcomes of the
//! transactional write and are reported through
//! [`SubmissionOutcome`](crate::submission::SubmissionOutcome).

use thiserror::Error;

use crate::validation::{FieldErrors, ValidationFailure};

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("{0}")]
    Validation(#[from] ValidationFailure),

    #[error("unknown step {step}: the form has {steps} step(s)")]
    UnknownStep { step: usize, steps: usize },
}

impl RegistrationError {
    /// Message shown to the person filling the form.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidBody(detail) => {
                format!("El cuerpo de la solicitud no es válido: {detail}")
            }
            Self::Validation(_) => "Los datos del formulario no son válidos".to_string(),
            Self::UnknownStep { step, steps } => {
                format!("El paso {step} no existe; el formulario tiene {steps} pasos")
            }
        }
    }

    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::Validation(failure) => Some(&failure.field_errors),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_expose_fields() {
        let mut field_errors = FieldErrors::new();
        field_errors.insert("nombre".into(), "Este campo es obligatorio".into());
        let err = RegistrationError::from(ValidationFailure { field_errors });

        assert_eq!(err.user_message(), "Los datos del formulario no son válidos");
        assert_eq!(err.field_errors().unwrap().len(), 1);
        assert_eq!(err.to_string(), "1 field(s) failed validation: nombre");
    }

    #[test]
    fn other_errors_have_no_field_errors() {
        let err = RegistrationError::UnknownStep { step: 7, steps: 4 };
        assert!(err.field_errors().is_none());
        assert_eq!(
            err.user_message(),
            "El paso 7 no existe; el formulario tiene 4 pasos"
        );

        let err = RegistrationError::InvalidBody("expected a JSON object".into());
        assert_eq!(err.to_string(), "invalid request body: expected a JSON object");
    }
}
