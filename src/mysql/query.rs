use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::mysql::{MySqlArguments, MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::query::Query;
use sqlx::{Column, Decode, MySql, Row, Type, TypeInfo, ValueRef};

use crate::error::SqlExecutorError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Bind one parameter to a prepared `MySQL` query.
pub(crate) fn bind_param<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    param: &'q RowValues,
) -> Query<'q, MySql, MySqlArguments> {
    match param {
        RowValues::Null => query.bind(None::<String>),
        RowValues::Bool(v) => query.bind(*v),
        RowValues::Int(v) => query.bind(*v),
        RowValues::Float(v) => query.bind(*v),
        RowValues::Text(v) => query.bind(v.as_str()),
        RowValues::Timestamp(v) => query.bind(*v),
        RowValues::JSON(v) => query.bind(sqlx::types::Json(v)),
        RowValues::Blob(v) => query.bind(v.as_slice()),
    }
}

/// Build a prepared query with every parameter bound in order.
pub(crate) fn bind_all<'q>(
    sql: &'q str,
    params: &'q [RowValues],
) -> Query<'q, MySql, MySqlArguments> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| bind_param(query, param))
}

/// DECIMAL/NUMERIC as the server renders it, so no precision is lost.
#[derive(Debug)]
struct RawDecimal(String);

impl Type<MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_ascii_uppercase();
        name.contains("DECIMAL") || name.contains("NUMERIC")
    }
}

impl<'r> Decode<'r, MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Logical category of a `MySQL` column type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeCategory {
    Decimal,
    Boolean,
    Integer,
    Unsigned,
    Float,
    Double,
    DateTime,
    Date,
    Time,
    Json,
    Binary,
    Text,
}

fn categorize_type(type_name: &str) -> TypeCategory {
    let upper = type_name.to_ascii_uppercase();
    if upper.contains("DECIMAL") || upper.contains("NUMERIC") {
        TypeCategory::Decimal
    } else if upper == "BOOLEAN" || upper == "BOOL" {
        TypeCategory::Boolean
    } else if upper.contains("INT") {
        if upper.contains("UNSIGNED") {
            TypeCategory::Unsigned
        } else {
            TypeCategory::Integer
        }
    } else if upper == "FLOAT" {
        TypeCategory::Float
    } else if upper == "DOUBLE" || upper == "REAL" {
        TypeCategory::Double
    } else if upper == "DATETIME" || upper == "TIMESTAMP" {
        TypeCategory::DateTime
    } else if upper == "DATE" {
        TypeCategory::Date
    } else if upper == "TIME" {
        TypeCategory::Time
    } else if upper == "JSON" {
        TypeCategory::Json
    } else if upper.contains("BLOB") || upper.contains("BINARY") || upper == "BIT" {
        TypeCategory::Binary
    } else {
        TypeCategory::Text
    }
}

/// Decode one column of a `MySQL` row.
///
/// # Errors
/// Returns `SqlExecutorError::MysqlError` if the value does not decode as its column type.
pub fn decode_column(row: &MySqlRow, idx: usize) -> Result<RowValues, SqlExecutorError> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(RowValues::Null);
    }
    let category = categorize_type(row.column(idx).type_info().name());
    let value = match category {
        TypeCategory::Decimal => RowValues::Text(row.try_get::<RawDecimal, _>(idx)?.0),
        TypeCategory::Boolean => RowValues::Bool(row.try_get::<bool, _>(idx)?),
        TypeCategory::Integer => RowValues::Int(row.try_get::<i64, _>(idx)?),
        TypeCategory::Unsigned => {
            let v = row.try_get::<u64, _>(idx)?;
            i64::try_from(v).map_or_else(|_| RowValues::Text(v.to_string()), RowValues::Int)
        }
        TypeCategory::Float => RowValues::Float(f64::from(row.try_get::<f32, _>(idx)?)),
        TypeCategory::Double => RowValues::Float(row.try_get::<f64, _>(idx)?),
        TypeCategory::DateTime => RowValues::Timestamp(row.try_get::<NaiveDateTime, _>(idx)?),
        TypeCategory::Date => RowValues::Text(row.try_get::<NaiveDate, _>(idx)?.to_string()),
        TypeCategory::Time => RowValues::Text(row.try_get::<NaiveTime, _>(idx)?.to_string()),
        TypeCategory::Json => RowValues::JSON(row.try_get::<serde_json::Value, _>(idx)?),
        TypeCategory::Binary => RowValues::Blob(row.try_get::<Vec<u8>, _>(idx)?),
        TypeCategory::Text => match row.try_get::<String, _>(idx) {
            Ok(s) => RowValues::Text(s),
            Err(_) => {
                let bytes = row.try_get::<Vec<u8>, _>(idx)?;
                RowValues::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
        },
    };
    Ok(value)
}

/// Materialize fetched rows into a `ResultSet`.
///
/// # Errors
/// Returns the first column decoding error.
pub fn build_result_set(rows: &[MySqlRow]) -> Result<ResultSet, SqlExecutorError> {
    let column_names: Vec<String> = rows.first().map_or_else(Vec::new, |row| {
        row.columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect()
    });
    let col_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(rows.len());
    result_set.set_column_names(Arc::new(column_names));
    for row in rows {
        let mut row_values = Vec::with_capacity(col_count);
        for idx in 0..col_count {
            row_values.push(decode_column(row, idx)?);
        }
        result_set.add_row_values(row_values);
    }
    Ok(result_set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_are_categorized() {
        assert_eq!(categorize_type("DECIMAL"), TypeCategory::Decimal);
        assert_eq!(categorize_type("BOOLEAN"), TypeCategory::Boolean);
        assert_eq!(categorize_type("BIGINT"), TypeCategory::Integer);
        assert_eq!(categorize_type("INT UNSIGNED"), TypeCategory::Unsigned);
        assert_eq!(categorize_type("DOUBLE"), TypeCategory::Double);
        assert_eq!(categorize_type("DATETIME"), TypeCategory::DateTime);
        assert_eq!(categorize_type("VARBINARY"), TypeCategory::Binary);
        assert_eq!(categorize_type("VARCHAR"), TypeCategory::Text);
        assert_eq!(categorize_type("json"), TypeCategory::Json);
    }
}
