//! Explicit table schemas for events and entities.
//!
//! Every event type and every entity declares its columns up front, at
//! registration time. Rows are JSON objects; a schema validates them before
//! they reach the storage collaborator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ReactorError;

/// A storage row: column name to value.
pub type Row = Map<String, Value>;

/// Column types understood by the storage collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Text,
    Boolean,
    /// RFC 3339 timestamp stored as text.
    Timestamp,
    /// Arbitrary JSON.
    Json,
}

impl ColumnType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ColumnType::Integer => value.is_i64() || value.is_u64(),
            ColumnType::Text | ColumnType::Timestamp => value.is_string(),
            ColumnType::Boolean => value.is_boolean(),
            ColumnType::Json => true,
        }
    }
}

/// One column of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub column: ColumnType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, column: ColumnType) -> Self {
        Self {
            name: name.into(),
            column,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// An ordered list of columns.
///
/// ```ignore
/// Schema::new()
///     .integer("group_id")
///     .integer("user_id")
///     .text("direction")
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn integer(self, name: &str) -> Self {
        self.field(Field::new(name, ColumnType::Integer))
    }

    pub fn text(self, name: &str) -> Self {
        self.field(Field::new(name, ColumnType::Text))
    }

    pub fn boolean(self, name: &str) -> Self {
        self.field(Field::new(name, ColumnType::Boolean))
    }

    pub fn timestamp(self, name: &str) -> Self {
        self.field(Field::new(name, ColumnType::Timestamp))
    }

    pub fn json(self, name: &str) -> Self {
        self.field(Field::new(name, ColumnType::Json))
    }

    pub fn optional(self, name: &str, column: ColumnType) -> Self {
        self.field(Field::new(name, column).nullable())
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Append the columns of `other` not already present.
    pub fn merge(mut self, other: &Schema) -> Self {
        for field in &other.fields {
            if self.get(&field.name).is_none() {
                self.fields.push(field.clone());
            }
        }
        self
    }

    /// Keep only the columns of this schema from `row`.
    pub fn project(&self, row: &Row) -> Row {
        self.fields
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    row.get(&f.name).cloned().unwrap_or(Value::Null),
                )
            })
            .collect()
    }
}

/// A named table with its schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub schema: Schema,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Check a full row: no unknown columns, required columns present, types match.
    pub fn validate(&self, row: &Row) -> Result<(), ReactorError> {
        self.validate_columns(row)?;
        for field in &self.schema.fields {
            if !field.nullable && row.get(&field.name).map_or(true, Value::is_null) {
                return Err(self.violation(format!("missing required column {}", field.name)));
            }
        }
        Ok(())
    }

    /// Check a partial row (an update): no unknown columns, types match.
    pub fn validate_columns(&self, row: &Row) -> Result<(), ReactorError> {
        for (name, value) in row {
            let Some(field) = self.schema.get(name) else {
                return Err(self.violation(format!("unknown column {}", name)));
            };
            if value.is_null() {
                if !field.nullable {
                    return Err(self.violation(format!("column {} is not nullable", name)));
                }
                continue;
            }
            if !field.column.accepts(value) {
                return Err(self.violation(format!(
                    "column {} expects {:?}, got {}",
                    name, field.column, value
                )));
            }
        }
        Ok(())
    }

    fn violation(&self, message: String) -> ReactorError {
        ReactorError::SchemaViolation {
            table: self.name.clone(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn members() -> TableSchema {
        TableSchema::new(
            "group_members",
            Schema::new()
                .integer("group_id")
                .integer("user_id")
                .optional("note", ColumnType::Text),
        )
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate_accepts_well_formed_row() {
        let table = members();
        assert!(table
            .validate(&row(json!({"group_id": 1, "user_id": 2})))
            .is_ok());
        assert!(table
            .validate(&row(json!({"group_id": 1, "user_id": 2, "note": null})))
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_unknown_and_mistyped() {
        let table = members();
        assert!(table.validate(&row(json!({"group_id": 1}))).is_err());
        assert!(table
            .validate(&row(json!({"group_id": 1, "user_id": 2, "extra": true})))
            .is_err());
        let err = table
            .validate(&row(json!({"group_id": "one", "user_id": 2})))
            .unwrap_err();
        assert!(err.to_string().contains("expects Integer"));
    }

    #[test]
    fn test_validate_columns_allows_partial_updates() {
        let table = members();
        assert!(table.validate_columns(&row(json!({"note": "x"}))).is_ok());
        assert!(table.validate_columns(&row(json!({"user_id": null}))).is_err());
    }

    #[test]
    fn test_project_and_merge() {
        let subject = Schema::new().text("subject_kind").integer("subject_id");
        let user = Schema::new().integer("user_id").merge(&subject);
        assert_eq!(user.fields.len(), 3);

        let full = row(json!({"user_id": 3, "subject_kind": "user", "subject_id": 3, "x": 1}));
        let projected = subject.project(&full);
        assert_eq!(projected.len(), 2);
        assert_eq!(projected["subject_id"], json!(3));
    }
}
