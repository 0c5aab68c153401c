//! Conversion between JSON field values and SQLite column values.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::Value as SqlValue;
use serde_json::{Number, Value};

use crate::error::{ScrapeKitError, ScrapeKitResult};
use crate::schema::{ColumnDescriptor, ColumnKind, TableShape};

fn mismatch(shape: &TableShape, column: &ColumnDescriptor, message: impl Into<String>) -> ScrapeKitError {
    ScrapeKitError::schema_mismatch(&shape.schema.name, &column.field, message)
}

/// Encode a scalar field value for its column. References are handled by the caller.
pub fn encode(shape: &TableShape, column: &ColumnDescriptor, value: &Value) -> ScrapeKitResult<SqlValue> {
    if value.is_null() {
        return if column.nullable {
            Ok(SqlValue::Null)
        } else {
            Err(mismatch(shape, column, "value is required"))
        };
    }

    let expected = |kind: &str| mismatch(shape, column, format!("expected {}, got {}", kind, value));

    match &column.kind {
        ColumnKind::Boolean => value
            .as_bool()
            .map(|b| SqlValue::Integer(b as i64))
            .ok_or_else(|| expected("boolean")),
        ColumnKind::Integer => value.as_i64().map(SqlValue::Integer).ok_or_else(|| expected("integer")),
        ColumnKind::Float => value.as_f64().map(SqlValue::Real).ok_or_else(|| expected("number")),
        ColumnKind::Text => value
            .as_str()
            .map(|s| SqlValue::Text(s.to_string()))
            .ok_or_else(|| expected("string")),
        ColumnKind::Date => {
            let s = value.as_str().ok_or_else(|| expected("date string"))?;
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| mismatch(shape, column, e.to_string()))?;
            Ok(SqlValue::Text(s.to_string()))
        }
        ColumnKind::Time => {
            let s = value.as_str().ok_or_else(|| expected("time string"))?;
            NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
                .map_err(|e| mismatch(shape, column, e.to_string()))?;
            Ok(SqlValue::Text(s.to_string()))
        }
        ColumnKind::DateTime => {
            let s = value.as_str().ok_or_else(|| expected("datetime string"))?;
            if !is_datetime(s) {
                return Err(mismatch(shape, column, format!("invalid datetime: {}", s)));
            }
            Ok(SqlValue::Text(s.to_string()))
        }
        ColumnKind::Json => Ok(SqlValue::Text(value.to_string())),
        ColumnKind::ForeignKey { .. } => value.as_i64().map(SqlValue::Integer).ok_or_else(|| expected("identity")),
    }
}

fn is_datetime(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
}

/// Decode a stored column value back into its JSON field value
pub fn decode(column: &ColumnDescriptor, value: SqlValue) -> ScrapeKitResult<Value> {
    let unexpected = |v: &SqlValue| {
        ScrapeKitError::database(format!(
            "unexpected stored value {:?} in column {}",
            v, column.name
        ))
    };

    match (&column.kind, value) {
        (_, SqlValue::Null) => Ok(Value::Null),
        (ColumnKind::Boolean, SqlValue::Integer(i)) => Ok(Value::Bool(i != 0)),
        (ColumnKind::Integer | ColumnKind::ForeignKey { .. }, SqlValue::Integer(i)) => Ok(Value::from(i)),
        (ColumnKind::Float, SqlValue::Real(f)) => Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)),
        (ColumnKind::Float, SqlValue::Integer(i)) => Ok(Number::from_f64(i as f64).map(Value::Number).unwrap_or(Value::Null)),
        (ColumnKind::Text | ColumnKind::Date | ColumnKind::Time | ColumnKind::DateTime, SqlValue::Text(s)) => {
            Ok(Value::String(s))
        }
        (ColumnKind::Json, SqlValue::Text(s)) => Ok(serde_json::from_str(&s)?),
        (_, other) => Err(unexpected(&other)),
    }
}
