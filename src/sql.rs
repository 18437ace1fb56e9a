//! Insert statement construction.
//!
//! Statements are built from a table name and a record shape. The Postgres
//! store turns them into parameterised queries; dry-run mode renders them as
//! literal SQL text so the caller can see what would have been executed.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid SQL identifier {0:?}: expected [A-Za-z_][A-Za-z0-9_]*")]
pub struct InvalidIdentifier(pub String);

/// A table or column name that is safe to splice into SQL once quoted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

impl Identifier {
    pub fn parse(name: impl Into<String>) -> Result<Self, InvalidIdentifier> {
        let name = name.into();
        if is_valid_identifier(&name) {
            Ok(Self(name))
        } else {
            Err(InvalidIdentifier(name))
        }
    }

    /// Compile-time known names (layout defaults).
    pub(crate) fn from_static(name: &'static str) -> Self {
        debug_assert!(is_valid_identifier(name), "bad static identifier {name}");
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form used in generated SQL.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = InvalidIdentifier;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single bound value in an insert.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl SqlValue {
    /// Literal SQL form. Only used for the dry-run echo, never executed.
    pub fn render_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(true) => "TRUE".to_string(),
            SqlValue::Bool(false) => "FALSE".to_string(),
            SqlValue::Int(n) => n.to_string(),
            SqlValue::Float(f) if f.is_finite() => f.to_string(),
            SqlValue::Float(_) => "NULL".to_string(),
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        }
    }
}

impl From<&serde_json::Value> for SqlValue {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => n.as_f64().map(SqlValue::Float).unwrap_or(SqlValue::Null),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            // Nested structures are stored as their JSON text
            other => SqlValue::Text(other.to_string()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

/// `INSERT INTO table (columns...) VALUES (...) [RETURNING column]`
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    table: Identifier,
    columns: Vec<(Identifier, SqlValue)>,
    returning: Option<Identifier>,
}

impl InsertStatement {
    pub fn into_table(table: Identifier) -> Self {
        Self {
            table,
            columns: Vec::new(),
            returning: None,
        }
    }

    pub fn value(mut self, column: Identifier, value: impl Into<SqlValue>) -> Self {
        self.columns.push((column, value.into()));
        self
    }

    pub fn returning(mut self, column: Identifier) -> Self {
        self.returning = Some(column);
        self
    }

    pub fn table(&self) -> &Identifier {
        &self.table
    }

    pub fn columns(&self) -> &[(Identifier, SqlValue)] {
        &self.columns
    }

    pub fn returning_column(&self) -> Option<&Identifier> {
        self.returning.as_ref()
    }

    pub fn value_of(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name.as_str() == column)
            .map(|(_, value)| value)
    }

    /// Render with inlined literals.
    pub fn render(&self) -> String {
        let mut sql = format!("INSERT INTO {}", self.table.quoted());
        if self.columns.is_empty() {
            sql.push_str(" DEFAULT VALUES");
        } else {
            let names: Vec<String> = self.columns.iter().map(|(c, _)| c.quoted()).collect();
            let values: Vec<String> = self
                .columns
                .iter()
                .map(|(_, v)| v.render_literal())
                .collect();
            sql.push_str(&format!(
                " ({}) VALUES ({})",
                names.join(", "),
                values.join(", ")
            ));
        }
        if let Some(column) = &self.returning {
            sql.push_str(&format!(" RETURNING {}", column.quoted()));
        }
        sql
    }
}

impl fmt::Display for InsertStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
