use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

use crate::error::SqlExecutorError;
use crate::types::RowValues;

/// A row from a database query result
///
/// This struct represents a single row from a database query result,
/// with access to both the column names and the values.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomDbRow {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub rows: Vec<RowValues>,
    // Column name to index, shared across all rows in a result set
    #[doc(hidden)]
    pub(crate) column_index_cache: Arc<HashMap<String, usize>>,
}

impl CustomDbRow {
    /// Create a new database row
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, rows: Vec<RowValues>) -> Self {
        let cache = Arc::new(index_columns(&column_names));
        Self {
            column_names,
            rows,
            column_index_cache: cache,
        }
    }

    pub(crate) fn with_cache(
        column_names: Arc<Vec<String>>,
        rows: Vec<RowValues>,
        column_index_cache: Arc<HashMap<String, usize>>,
    ) -> Self {
        Self {
            column_names,
            rows,
            column_index_cache,
        }
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index_cache.get(column_name) {
            return Some(idx);
        }
        // drivers differ in column name casing
        self.column_names
            .iter()
            .position(|col| col.eq_ignore_ascii_case(column_name))
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.rows.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.rows.get(index)
    }

    /// Decode a column into a Rust value.
    ///
    /// # Errors
    /// Returns `SqlExecutorError::ExecutionError` if the column does not exist or the stored
    /// value cannot be converted into `T`.
    pub fn try_get<T: FromRowValue>(&self, column_name: &str) -> Result<T, SqlExecutorError> {
        let value = self.get(column_name).ok_or_else(|| {
            SqlExecutorError::ExecutionError(format!("column \"{column_name}\" not found in row"))
        })?;
        T::from_row_value(value).map_err(|err| match err {
            SqlExecutorError::ExecutionError(msg) => {
                SqlExecutorError::ExecutionError(format!("column \"{column_name}\": {msg}"))
            }
            other => other,
        })
    }
}

pub(crate) fn index_columns(column_names: &[String]) -> HashMap<String, usize> {
    column_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect()
}

/// Conversion from a stored [`RowValues`] into a Rust value.
pub trait FromRowValue: Sized {
    /// # Errors
    /// Returns `SqlExecutorError::ExecutionError` when the value has an incompatible type.
    fn from_row_value(value: &RowValues) -> Result<Self, SqlExecutorError>;
}

fn mismatch(expected: &str, value: &RowValues) -> SqlExecutorError {
    SqlExecutorError::ExecutionError(format!("expected {expected}, found {}", value.kind()))
}

impl FromRowValue for RowValues {
    fn from_row_value(value: &RowValues) -> Result<Self, SqlExecutorError> {
        Ok(value.clone())
    }
}

impl FromRowValue for i64 {
    fn from_row_value(value: &RowValues) -> Result<Self, SqlExecutorError> {
        match value {
            RowValues::Int(i) => Ok(*i),
            RowValues::Bool(b) => Ok(i64::from(*b)),
            other => Err(mismatch("Int", other)),
        }
    }
}

impl FromRowValue for i32 {
    fn from_row_value(value: &RowValues) -> Result<Self, SqlExecutorError> {
        let wide = i64::from_row_value(value)?;
        i32::try_from(wide).map_err(|e| {
            SqlExecutorError::ExecutionError(format!("integer {wide} out of range for i32: {e}"))
        })
    }
}

impl FromRowValue for f64 {
    fn from_row_value(value: &RowValues) -> Result<Self, SqlExecutorError> {
        value.as_float().ok_or_else(|| mismatch("Float", value))
    }
}

impl FromRowValue for bool {
    fn from_row_value(value: &RowValues) -> Result<Self, SqlExecutorError> {
        value.as_bool().copied().ok_or_else(|| mismatch("Bool", value))
    }
}

impl FromRowValue for String {
    fn from_row_value(value: &RowValues) -> Result<Self, SqlExecutorError> {
        match value {
            RowValues::Text(s) => Ok(s.clone()),
            RowValues::JSON(json) => Ok(json.to_string()),
            other => Err(mismatch("Text", other)),
        }
    }
}

impl FromRowValue for Vec<u8> {
    fn from_row_value(value: &RowValues) -> Result<Self, SqlExecutorError> {
        match value {
            RowValues::Blob(bytes) => Ok(bytes.clone()),
            RowValues::Text(s) => Ok(s.as_bytes().to_vec()),
            other => Err(mismatch("Blob", other)),
        }
    }
}

impl FromRowValue for NaiveDateTime {
    fn from_row_value(value: &RowValues) -> Result<Self, SqlExecutorError> {
        value.as_timestamp().ok_or_else(|| mismatch("Timestamp", value))
    }
}

impl FromRowValue for JsonValue {
    fn from_row_value(value: &RowValues) -> Result<Self, SqlExecutorError> {
        match value {
            RowValues::JSON(json) => Ok(json.clone()),
            RowValues::Text(s) => serde_json::from_str(s).map_err(|e| {
                SqlExecutorError::ExecutionError(format!("invalid JSON text: {e}"))
            }),
            RowValues::Null => Ok(JsonValue::Null),
            other => Err(mismatch("JSON", other)),
        }
    }
}

impl<T: FromRowValue> FromRowValue for Option<T> {
    fn from_row_value(value: &RowValues) -> Result<Self, SqlExecutorError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_row_value(value).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> CustomDbRow {
        CustomDbRow::new(
            Arc::new(vec!["id".into(), "score".into(), "note".into()]),
            vec![
                RowValues::Text("a".into()),
                RowValues::Int(7),
                RowValues::Null,
            ],
        )
    }

    #[test]
    fn typed_access_by_name() {
        let row = row();
        assert_eq!(row.try_get::<String>("id").unwrap(), "a");
        assert_eq!(row.try_get::<i64>("score").unwrap(), 7);
        assert_eq!(row.try_get::<Option<String>>("note").unwrap(), None);
        assert_eq!(row.try_get::<i64>("SCORE").unwrap(), 7);
    }

    #[test]
    fn missing_column_and_type_mismatch_are_errors() {
        let row = row();
        let missing = row.try_get::<i64>("nope").unwrap_err();
        assert!(missing.to_string().contains("\"nope\" not found"));
        let mismatch = row.try_get::<i64>("id").unwrap_err();
        assert!(mismatch.to_string().contains("expected Int, found Text"));
    }
}
