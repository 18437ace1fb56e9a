//! Registration records, associated violence selections, and the split of a
//! submitted payload into the statements the write path executes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RegistrationError;
use crate::schema::{FieldKind, FieldSpec, FormSchema};
use crate::sql::{Identifier, InsertStatement, SqlValue};
use crate::validation::numeric;

/// One `{value, label}` entry of the associated violence list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolenceSelection {
    pub value: String,
    pub label: String,
}

/// Table and column names used by the write path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub registration_table: Identifier,
    /// Generated key of the registration table.
    pub registration_id: Identifier,
    pub violence_table: Identifier,
    /// Foreign key back to the registration.
    pub violence_registration_id: Identifier,
    pub violence_code: Identifier,
    pub violence_label: Identifier,
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            registration_table: Identifier::from_static("registro_violencia"),
            registration_id: Identifier::from_static("numero_violencia"),
            violence_table: Identifier::from_static("violencia_asociada"),
            violence_registration_id: Identifier::from_static("numero_violencia"),
            violence_code: Identifier::from_static("cod_violencia_asociada"),
            violence_label: Identifier::from_static("violencia_asociada"),
        }
    }
}

impl TableLayout {
    /// Dependent row for one selection. Needs the parent's generated id.
    pub fn violence_insert(&self, registration_id: i64, selection: &ViolenceSelection) -> InsertStatement {
        InsertStatement::into_table(self.violence_table.clone())
            .value(self.violence_registration_id.clone(), registration_id)
            .value(self.violence_code.clone(), selection.value.as_str())
            .value(self.violence_label.clone(), selection.label.as_str())
    }
}

/// A validated payload split into the parent insert and the selections that
/// become dependent rows.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionPlan {
    pub registration: InsertStatement,
    pub selections: Vec<ViolenceSelection>,
}

impl SubmissionPlan {
    /// Only fields declared in the schema reach the registration insert;
    /// anything else in the payload is dropped.
    pub fn build(
        payload: &Map<String, Value>,
        schema: &FormSchema,
        layout: &TableLayout,
    ) -> Result<Self, RegistrationError> {
        let mut registration = InsertStatement::into_table(layout.registration_table.clone());
        for spec in schema.registration_fields() {
            if let Some(value) = payload.get(spec.name.as_str()) {
                registration = registration.value(spec.name.clone(), column_value(spec, value));
            }
        }
        let registration = registration.returning(layout.registration_id.clone());

        let selections = match payload.get(schema.associated_violence_field.as_str()) {
            None | Some(Value::Null) => Vec::new(),
            Some(list) => serde_json::from_value(list.clone()).map_err(|e| {
                RegistrationError::InvalidBody(format!(
                    "'{}' must be a list of {{value, label}} objects: {e}",
                    schema.associated_violence_field
                ))
            })?,
        };

        Ok(Self {
            registration,
            selections,
        })
    }
}

/// Convert a validated field value into the value bound for its column.
fn column_value(spec: &FieldSpec, value: &Value) -> SqlValue {
    let blank = matches!(value, Value::String(s) if s.trim().is_empty());
    match &spec.kind {
        FieldKind::Text { .. } => SqlValue::from(value),
        _ if blank => SqlValue::Null,
        FieldKind::Number { .. } => match value {
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(i) => SqlValue::Int(i),
                Err(_) => numeric(value).map(SqlValue::Float).unwrap_or(SqlValue::Null),
            },
            other => SqlValue::from(other),
        },
        FieldKind::Date => value
            .as_str()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .map(SqlValue::Date)
            .unwrap_or_else(|| SqlValue::from(value)),
        _ => SqlValue::from(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: &str = r#"
steps:
  - title: Persona
    fields:
      - { name: nombre, kind: text }
      - { name: edad, kind: number, required: false }
      - { name: fecha_hecho, kind: date, required: false }
  - title: Violencia
    fields:
      - name: violencia_asociada
        kind: multi_select
        required: false
"#;

    fn build_plan(payload: Value) -> Result<SubmissionPlan, RegistrationError> {
        let schema = FormSchema::from_yaml_str(SCHEMA).unwrap();
        SubmissionPlan::build(payload.as_object().unwrap(), &schema, &TableLayout::default())
    }

    #[test]
    fn splits_registration_fields_from_selections() {
        let plan = build_plan(json!({
            "nombre": "Ana",
            "violencia_asociada": [
                {"value": "1", "label": "Física"},
                {"value": "2", "label": "Psicológica"}
            ]
        }))
        .unwrap();

        assert_eq!(
            plan.registration.render(),
            "INSERT INTO \"registro_violencia\" (\"nombre\") VALUES ('Ana') \
             RETURNING \"numero_violencia\""
        );
        assert_eq!(plan.selections.len(), 2);
        assert_eq!(plan.selections[1].label, "Psicológica");
    }

    #[test]
    fn drops_undeclared_keys() {
        let plan = build_plan(json!({"nombre": "Ana", "is_admin": true})).unwrap();
        assert!(plan.registration.value_of("is_admin").is_none());
        assert_eq!(plan.registration.columns().len(), 1);
    }

    #[test]
    fn missing_selection_list_means_no_dependents() {
        let plan = build_plan(json!({"nombre": "Ana"})).unwrap();
        assert!(plan.selections.is_empty());
    }

    #[test]
    fn converts_typed_columns() {
        let plan = build_plan(json!({"nombre": "Ana", "edad": "34", "fecha_hecho": "2024-05-01"})).unwrap();
        assert_eq!(plan.registration.value_of("edad"), Some(&SqlValue::Int(34)));
        assert_eq!(
            plan.registration.value_of("fecha_hecho"),
            Some(&SqlValue::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()))
        );

        let plan = build_plan(json!({"nombre": "Ana", "edad": ""})).unwrap();
        assert_eq!(plan.registration.value_of("edad"), Some(&SqlValue::Null));
    }

    #[test]
    fn malformed_selection_list_is_invalid_body() {
        let err = build_plan(json!({"nombre": "Ana", "violencia_asociada": ["1"]})).unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidBody(_)));
    }

    #[test]
    fn violence_insert_references_parent() {
        let layout = TableLayout::default();
        let stmt = layout.violence_insert(
            42,
            &ViolenceSelection {
                value: "2".into(),
                label: "Psicológica".into(),
            },
        );
        assert_eq!(
            stmt.render(),
            "INSERT INTO \"violencia_asociada\" (\"numero_violencia\", \
             \"cod_violencia_asociada\", \"violencia_asociada\") VALUES (42, '2', 'Psicológica')"
        );
        assert!(stmt.returning_column().is_none());
    }
}
