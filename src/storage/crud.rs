use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};

use super::migrations::quote_ident;
use super::{codec, Completion, Database};
use crate::error::{ScrapeKitError, ScrapeKitResult};
use crate::logging::{LogContext, PerformanceLogger};
use crate::schema::{ColumnKind, Schema, ShapeRegistry, TableShape, ID_FIELD};

impl Database {
    /// Create the table for `S`, and the tables it references, if missing
    pub async fn init<S: Schema>(&self) -> ScrapeKitResult<()> {
        let definition = S::definition();
        let timer = PerformanceLogger::new(LogContext::new("storage", "init").with_table(definition.table_name()));

        let result = self
            .blocking(move |db| {
                let conn = db.acquire()?;
                db.ensure_table(&conn, &definition).map(drop)
            })
            .await;

        finish(timer, &result, "Initialized table");
        result
    }

    /// Insert a record and return its new identity.
    ///
    /// Any `id` carried by the record is ignored. Nested records are inserted
    /// into their own tables first, all within one transaction.
    pub async fn save<S: Schema>(&self, record: &S) -> ScrapeKitResult<i64> {
        let definition = S::definition();
        let timer = PerformanceLogger::new(LogContext::new("storage", "save").with_table(definition.table_name()));
        let value = serde_json::to_value(record)?;

        let result = self
            .blocking(move |db| {
                db.with_session(&definition, |tx, shape| {
                    insert_record(tx, db.registry(), shape, &value).map(Completion::Commit)
                })
            })
            .await;

        finish(timer, &result, "Saved record");
        result
    }

    pub async fn get_by_id<S: Schema>(&self, id: i64) -> ScrapeKitResult<Option<S>> {
        let definition = S::definition();
        let timer = PerformanceLogger::new(
            LogContext::new("storage", "get_by_id")
                .with_table(definition.table_name())
                .with_number_field("id", id),
        );

        let result = self
            .blocking(move |db| {
                db.with_session(&definition, |tx, shape| {
                    Ok(match load_record(tx, db.registry(), shape, id)? {
                        Some(record) => Completion::Commit(Some(record)),
                        None => Completion::Rollback(None),
                    })
                })
            })
            .await
            .and_then(|record| record.map(decode_record::<S>).transpose());

        finish(timer, &result, "Loaded record");
        result
    }

    /// All stored records of `S`, in identity order
    pub async fn get_all<S: Schema>(&self) -> ScrapeKitResult<Vec<S>> {
        let definition = S::definition();
        let timer = PerformanceLogger::new(LogContext::new("storage", "get_all").with_table(definition.table_name()));

        let result = self
            .blocking(move |db| {
                db.with_session(&definition, |tx, shape| {
                    load_all(tx, db.registry(), shape).map(Completion::Commit)
                })
            })
            .await
            .and_then(|records| records.into_iter().map(decode_record::<S>).collect());

        finish(timer, &result, "Loaded records");
        result
    }

    /// Apply field updates to one record and return its new state.
    ///
    /// `updates` must be an object of declared field names; `id` cannot be
    /// changed. Returns `Ok(None)` when no record has this identity.
    pub async fn update<S: Schema>(&self, id: i64, updates: Value) -> ScrapeKitResult<Option<S>> {
        let definition = S::definition();
        let timer = PerformanceLogger::new(
            LogContext::new("storage", "update")
                .with_table(definition.table_name())
                .with_number_field("id", id),
        );

        let result = self
            .blocking(move |db| {
                db.with_session(&definition, |tx, shape| {
                    if !record_exists(tx, shape, id)? {
                        return Ok(Completion::Rollback(None));
                    }
                    update_record(tx, db.registry(), shape, id, &updates)?;
                    Ok(Completion::Commit(load_record(tx, db.registry(), shape, id)?))
                })
            })
            .await
            .and_then(|record| record.map(decode_record::<S>).transpose());

        finish(timer, &result, "Updated record");
        result
    }

    /// Delete one record; `Ok(false)` when no record has this identity
    pub async fn delete<S: Schema>(&self, id: i64) -> ScrapeKitResult<bool> {
        let definition = S::definition();
        let timer = PerformanceLogger::new(
            LogContext::new("storage", "delete")
                .with_table(definition.table_name())
                .with_number_field("id", id),
        );

        let result = self
            .blocking(move |db| {
                db.with_session(&definition, |tx, shape| {
                    let deleted = tx.execute(
                        &format!("DELETE FROM {} WHERE {} = ?1", quote_ident(&shape.name), ID_FIELD),
                        [id],
                    )?;
                    Ok(if deleted > 0 {
                        Completion::Commit(true)
                    } else {
                        Completion::Rollback(false)
                    })
                })
            })
            .await;

        finish(timer, &result, "Deleted record");
        result
    }

    /// Number of stored records of `S`
    pub async fn count<S: Schema>(&self) -> ScrapeKitResult<i64> {
        let definition = S::definition();

        self.blocking(move |db| {
            db.with_session(&definition, |tx, shape| {
                let count: i64 = tx.query_row(
                    &format!("SELECT COUNT(*) FROM {}", quote_ident(&shape.name)),
                    [],
                    |row| row.get(0),
                )?;
                Ok(Completion::Commit(count))
            })
        })
        .await
    }
}

fn finish<T>(timer: PerformanceLogger, result: &ScrapeKitResult<T>, message: &str) {
    match result {
        Ok(_) => timer.finish(message),
        Err(e) => timer.finish_with_error(message, e),
    }
}

fn decode_record<S: Schema>(record: Value) -> ScrapeKitResult<S> {
    Ok(serde_json::from_value(record)?)
}

fn as_fields<'a>(shape: &TableShape, value: &'a Value) -> ScrapeKitResult<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        ScrapeKitError::schema_mismatch(&shape.schema.name, "*", format!("expected an object, got {}", value))
    })
}

/// Column value for a field, inserting a nested record first when one is given
fn column_value(
    conn: &Connection,
    registry: &ShapeRegistry,
    shape: &TableShape,
    field: &str,
    value: &Value,
) -> ScrapeKitResult<(String, SqlValue)> {
    let column = shape.column_for_field(field).ok_or_else(|| {
        ScrapeKitError::schema_mismatch(&shape.schema.name, field, "no such field")
    })?;

    let sql_value = match (&column.kind, value) {
        (ColumnKind::ForeignKey { target }, Value::Object(_)) => {
            let target_shape = registry.require(target)?;
            SqlValue::Integer(insert_record(conn, registry, &target_shape, value)?)
        }
        _ => codec::encode(shape, column, value)?,
    };

    Ok((quote_ident(&column.name), sql_value))
}

fn insert_record(
    conn: &Connection,
    registry: &ShapeRegistry,
    shape: &TableShape,
    record: &Value,
) -> ScrapeKitResult<i64> {
    let fields = as_fields(shape, record)?;

    let mut columns = Vec::with_capacity(shape.columns.len());
    let mut values = Vec::with_capacity(shape.columns.len());
    for column in &shape.columns {
        let value = fields.get(&column.field).unwrap_or(&Value::Null);
        let (name, sql_value) = column_value(conn, registry, shape, &column.field, value)?;
        columns.push(name);
        values.push(sql_value);
    }

    let table = quote_ident(&shape.name);
    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", table)
    } else {
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        )
    };

    conn.execute(&sql, params_from_iter(values))?;
    Ok(conn.last_insert_rowid())
}

fn update_record(
    conn: &Connection,
    registry: &ShapeRegistry,
    shape: &TableShape,
    id: i64,
    updates: &Value,
) -> ScrapeKitResult<()> {
    let fields = as_fields(shape, updates)?;
    if fields.is_empty() {
        return Ok(());
    }

    let mut assignments = Vec::with_capacity(fields.len());
    let mut values = Vec::with_capacity(fields.len() + 1);
    for (field, value) in fields {
        if field == ID_FIELD {
            return Err(ScrapeKitError::schema_mismatch(
                &shape.schema.name,
                ID_FIELD,
                "identity cannot be updated",
            ));
        }
        let (name, sql_value) = column_value(conn, registry, shape, field, value)?;
        values.push(sql_value);
        assignments.push(format!("{} = ?{}", name, values.len()));
    }
    values.push(SqlValue::Integer(id));

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote_ident(&shape.name),
        assignments.join(", "),
        ID_FIELD,
        values.len()
    );
    conn.execute(&sql, params_from_iter(values))?;
    Ok(())
}

fn record_exists(conn: &Connection, shape: &TableShape, id: i64) -> ScrapeKitResult<bool> {
    let found = conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE {} = ?1", quote_ident(&shape.name), ID_FIELD),
            [id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn select_sql(shape: &TableShape) -> String {
    let mut columns = vec![ID_FIELD.to_string()];
    columns.extend(shape.columns.iter().map(|c| quote_ident(&c.name)));
    format!("SELECT {} FROM {}", columns.join(", "), quote_ident(&shape.name))
}

fn read_row(row: &rusqlite::Row<'_>, width: usize) -> rusqlite::Result<Vec<SqlValue>> {
    (0..width).map(|i| row.get::<_, SqlValue>(i)).collect()
}

fn load_record(
    conn: &Connection,
    registry: &ShapeRegistry,
    shape: &TableShape,
    id: i64,
) -> ScrapeKitResult<Option<Value>> {
    let sql = format!("{} WHERE {} = ?1", select_sql(shape), ID_FIELD);
    let width = shape.columns.len() + 1;

    let row = conn.query_row(&sql, [id], |row| read_row(row, width)).optional()?;
    row.map(|raw| build_record(conn, registry, shape, raw)).transpose()
}

fn load_all(conn: &Connection, registry: &ShapeRegistry, shape: &TableShape) -> ScrapeKitResult<Vec<Value>> {
    let sql = format!("{} ORDER BY {}", select_sql(shape), ID_FIELD);
    let width = shape.columns.len() + 1;

    // Rows are collected before nested records are loaded on the same connection
    let rows = {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| read_row(row, width))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    rows.into_iter()
        .map(|raw| build_record(conn, registry, shape, raw))
        .collect()
}

fn build_record(
    conn: &Connection,
    registry: &ShapeRegistry,
    shape: &TableShape,
    raw: Vec<SqlValue>,
) -> ScrapeKitResult<Value> {
    let mut values = raw.into_iter();
    let mut record = Map::new();

    match values.next() {
        Some(SqlValue::Integer(id)) => {
            record.insert(ID_FIELD.to_string(), Value::from(id));
        }
        other => {
            return Err(ScrapeKitError::database(format!(
                "unexpected identity {:?} in {}",
                other, shape.name
            )))
        }
    }

    for (column, value) in shape.columns.iter().zip(values) {
        let decoded = match (&column.kind, value) {
            (ColumnKind::ForeignKey { .. }, SqlValue::Null) => Value::Null,
            (ColumnKind::ForeignKey { target }, SqlValue::Integer(foreign_id)) => {
                let target_shape = registry.require(target)?;
                load_record(conn, registry, &target_shape, foreign_id)?.unwrap_or(Value::Null)
            }
            (_, value) => codec::decode(column, value)?,
        };
        record.insert(column.field.clone(), decoded);
    }

    Ok(Value::Object(record))
}
