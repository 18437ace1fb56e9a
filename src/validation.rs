//! Field validation against the form schema.
//!
//! Errors are reported per field, keyed by the first path segment (the field
//! name). Each field carries at most one message: the first rule that fails.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RegistrationError;
use crate::schema::{FieldKind, FieldSpec, FormSchema, SelectOption};

pub type FieldErrors = BTreeMap<String, String>;

const REQUIRED: &str = "Este campo es obligatorio";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub field_errors: FieldErrors,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.field_errors.keys().map(String::as_str).collect();
        write!(
            f,
            "{} field(s) failed validation: {}",
            fields.len(),
            fields.join(", ")
        )
    }
}

impl std::error::Error for ValidationFailure {}

/// What the form engine should do after a step passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Advance { next_step: usize },
    /// The last step passed; the form posts the full payload next.
    Submit,
}

/// Validate the fields of one step. Fields of other steps are ignored.
pub fn validate_step(
    schema: &FormSchema,
    step: usize,
    values: &Map<String, Value>,
) -> Result<StepOutcome, RegistrationError> {
    let form_step = schema
        .step(step)
        .ok_or(RegistrationError::UnknownStep {
            step,
            steps: schema.step_count(),
        })?;

    let field_errors = check_fields(schema, form_step.fields.iter(), values);
    if !field_errors.is_empty() {
        return Err(ValidationFailure { field_errors }.into());
    }

    if schema.is_last_step(step) {
        Ok(StepOutcome::Submit)
    } else {
        Ok(StepOutcome::Advance {
            next_step: step + 1,
        })
    }
}

/// Validate a complete submission: every field of every step.
pub fn validate_submission(
    schema: &FormSchema,
    values: &Map<String, Value>,
) -> Result<(), ValidationFailure> {
    let field_errors = check_fields(schema, schema.fields(), values);
    if field_errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationFailure { field_errors })
    }
}

fn check_fields<'a>(
    schema: &FormSchema,
    fields: impl Iterator<Item = &'a FieldSpec>,
    values: &Map<String, Value>,
) -> FieldErrors {
    let mut errors = FieldErrors::new();
    for spec in fields {
        let pattern = schema.pattern(&spec.name);
        if let Err(message) = check_field(spec, values.get(spec.name.as_str()), pattern) {
            errors.insert(
                spec.name.to_string(),
                spec.message.clone().unwrap_or(message),
            );
        }
    }
    errors
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

fn check_field(spec: &FieldSpec, value: Option<&Value>, pattern: Option<&Regex>) -> Result<(), String> {
    if let FieldKind::MultiSelect { options, min_items } = &spec.kind {
        return check_multi_select(spec.required, options, *min_items, value);
    }

    if is_blank(value) {
        return if spec.required {
            Err(REQUIRED.to_string())
        } else {
            Ok(())
        };
    }
    let Some(value) = value else {
        return Ok(());
    };

    match &spec.kind {
        FieldKind::Text {
            min_length,
            max_length,
            ..
        } => {
            let text = value.as_str().ok_or("Debe ser un texto")?;
            let length = text.chars().count();
            if let Some(min) = min_length {
                if length < *min {
                    return Err(format!("Debe tener al menos {min} caracteres"));
                }
            }
            if let Some(max) = max_length {
                if length > *max {
                    return Err(format!("Debe tener como máximo {max} caracteres"));
                }
            }
            if let Some(regex) = pattern {
                if !regex.is_match(text) {
                    return Err("Formato no válido".to_string());
                }
            }
            Ok(())
        }
        FieldKind::Number { min, max } => {
            let number = numeric(value).ok_or("Debe ser un número")?;
            if let Some(min) = min {
                if number < *min {
                    return Err(format!("Debe ser mayor o igual a {min}"));
                }
            }
            if let Some(max) = max {
                if number > *max {
                    return Err(format!("Debe ser menor o igual a {max}"));
                }
            }
            Ok(())
        }
        FieldKind::Date => {
            let text = value.as_str().ok_or("Fecha no válida")?;
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(|_| ())
                .map_err(|_| "Fecha no válida".to_string())
        }
        FieldKind::Select { options } => {
            let selected = value.as_str().ok_or("Seleccione una opción válida")?;
            if options.iter().any(|o| o.value == selected) {
                Ok(())
            } else {
                Err("Seleccione una opción válida".to_string())
            }
        }
        FieldKind::Boolean => value
            .as_bool()
            .map(|_| ())
            .ok_or_else(|| "Debe ser verdadero o falso".to_string()),
        FieldKind::MultiSelect { .. } => Ok(()),
    }
}

fn check_multi_select(
    required: bool,
    options: &[SelectOption],
    min_items: usize,
    value: Option<&Value>,
) -> Result<(), String> {
    let items: &[Value] = match value {
        None | Some(Value::Null) => &[],
        Some(Value::Array(items)) => items.as_slice(),
        Some(_) => return Err("Debe ser una lista de opciones".to_string()),
    };

    if items.is_empty() && required {
        return Err("Seleccione al menos una opción".to_string());
    }
    if items.len() < min_items {
        return Err(format!("Seleccione al menos {min_items} opciones"));
    }

    for item in items {
        let selection: SelectOption = serde_json::from_value(item.clone())
            .map_err(|_| "Opción no válida".to_string())?;
        if !options.is_empty() && !options.iter().any(|o| o.value == selection.value) {
            return Err(format!("Opción no válida: {}", selection.value));
        }
    }
    Ok(())
}

/// JSON numbers, or strings holding one (form inputs often post text).
pub(crate) fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}
