//! Form schema: the steps of the registration form and the rules of each field.
//!
//! The same schema drives step-by-step validation in the form engine and the
//! full server-side validation of a submission. Field names double as column
//! names of the registration table, so they are parsed as [`Identifier`]s.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sql::Identifier;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read form schema {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed form schema: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("form schema declares no steps")]
    NoSteps,

    #[error("field '{0}' is declared more than once")]
    DuplicateField(String),

    #[error("field '{field}' has an invalid pattern: {source}")]
    InvalidPattern {
        field: String,
        #[source]
        source: regex::Error,
    },

    #[error("field '{field}': {reason}")]
    InvalidBounds { field: String, reason: String },

    #[error("associated violence field '{0}' is not declared in any step")]
    AssociatedFieldMissing(String),

    #[error("associated violence field '{0}' must be a multi_select")]
    AssociatedFieldKind(String),
}

fn default_associated_violence_field() -> Identifier {
    Identifier::from_static("violencia_asociada")
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSchema {
    /// List-valued field holding the `{value, label}` selections that become
    /// dependent rows.
    #[serde(default = "default_associated_violence_field")]
    pub associated_violence_field: Identifier,
    pub steps: Vec<FormStep>,
    #[serde(skip)]
    patterns: HashMap<Identifier, Regex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormStep {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Replaces the default message of whichever rule fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Date,
    Select {
        options: Vec<SelectOption>,
    },
    MultiSelect {
        #[serde(default)]
        options: Vec<SelectOption>,
        #[serde(default)]
        min_items: usize,
    },
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl FormSchema {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SchemaError> {
        let mut schema: FormSchema = serde_yaml::from_str(yaml)?;
        schema.check()?;
        Ok(schema)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Structural checks plus pattern compilation.
    fn check(&mut self) -> Result<(), SchemaError> {
        if self.steps.is_empty() {
            return Err(SchemaError::NoSteps);
        }

        let mut seen = HashSet::new();
        let mut patterns = HashMap::new();
        for field in self.fields() {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.to_string()));
            }
            match &field.kind {
                FieldKind::Text {
                    min_length,
                    max_length,
                    pattern,
                } => {
                    if let (Some(min), Some(max)) = (min_length, max_length) {
                        if min > max {
                            return Err(SchemaError::InvalidBounds {
                                field: field.name.to_string(),
                                reason: format!("min_length {min} exceeds max_length {max}"),
                            });
                        }
                    }
                    if let Some(pattern) = pattern {
                        let regex =
                            Regex::new(pattern).map_err(|source| SchemaError::InvalidPattern {
                                field: field.name.to_string(),
                                source,
                            })?;
                        patterns.insert(field.name.clone(), regex);
                    }
                }
                FieldKind::Number {
                    min: Some(min),
                    max: Some(max),
                } if min > max => {
                    return Err(SchemaError::InvalidBounds {
                        field: field.name.to_string(),
                        reason: format!("min {min} exceeds max {max}"),
                    });
                }
                _ => {}
            }
        }

        match self.field(self.associated_violence_field.as_str()) {
            None => {
                return Err(SchemaError::AssociatedFieldMissing(
                    self.associated_violence_field.to_string(),
                ))
            }
            Some(spec) if !matches!(spec.kind, FieldKind::MultiSelect { .. }) => {
                return Err(SchemaError::AssociatedFieldKind(spec.name.to_string()))
            }
            Some(_) => {}
        }

        self.patterns = patterns;
        Ok(())
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, index: usize) -> Option<&FormStep> {
        self.steps.get(index)
    }

    pub fn is_last_step(&self, index: usize) -> bool {
        index + 1 == self.steps.len()
    }

    /// Every field of every step, in form order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.steps.iter().flat_map(|step| step.fields.iter())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields().find(|f| f.name.as_str() == name)
    }

    /// Fields that become columns of the registration row.
    pub fn registration_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields()
            .filter(move |f| f.name != self.associated_violence_field)
    }

    pub fn pattern(&self, field: &Identifier) -> Option<&Regex> {
        self.patterns.get(field)
    }
}
