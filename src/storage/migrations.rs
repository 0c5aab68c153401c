use rusqlite::Connection;
use tracing::info;

use crate::error::ScrapeKitResult;
use crate::schema::{ColumnDescriptor, ColumnKind, TableShape, ID_FIELD};

/// Quote an SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(kind: &ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Boolean | ColumnKind::Integer | ColumnKind::ForeignKey { .. } => "INTEGER",
        ColumnKind::Float => "REAL",
        // Dates and JSON are kept as text so SQLite never coerces them to numbers
        ColumnKind::Text | ColumnKind::Date | ColumnKind::Time | ColumnKind::DateTime | ColumnKind::Json => "TEXT",
    }
}

fn column_sql(column: &ColumnDescriptor) -> String {
    let mut sql = format!("{} {}", quote_ident(&column.name), sql_type(&column.kind));
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if column.unique {
        sql.push_str(" UNIQUE");
    }
    if let ColumnKind::ForeignKey { target } = &column.kind {
        sql.push_str(&format!(" REFERENCES {} ({})", quote_ident(target), ID_FIELD));
    }
    sql
}

/// `CREATE TABLE IF NOT EXISTS` statement for a shape
pub fn create_table_sql(shape: &TableShape) -> String {
    let mut columns = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", ID_FIELD)];
    columns.extend(shape.columns.iter().map(column_sql));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote_ident(&shape.name),
        columns.join(",\n    ")
    )
}

/// Create the table for a shape if it is missing; existing tables are left untouched
pub fn materialize_table(conn: &Connection, shape: &TableShape) -> ScrapeKitResult<()> {
    conn.execute(&create_table_sql(shape), [])?;
    info!("Get or create table: {}", shape.name);
    Ok(())
}

/// Whether a table with this name exists
pub fn table_exists(conn: &Connection, table: &str) -> ScrapeKitResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, SchemaDefinition, ShapeRegistry};

    fn flags() -> SchemaDefinition {
        SchemaDefinition::new("Flags").field(FieldDef::boolean("nsfw"))
    }

    fn joke() -> SchemaDefinition {
        SchemaDefinition::new("Joke")
            .field(FieldDef::text("category").unique())
            .field(FieldDef::text("setup").optional())
            .field(FieldDef::json("extra"))
            .field(FieldDef::reference("flags", flags))
    }

    #[test]
    fn test_create_table_sql() {
        let registry = ShapeRegistry::new();
        let shape = registry.synthesize(&joke()).unwrap();
        let sql = create_table_sql(&shape);

        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"joke\""));
        assert!(sql.contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("\"category\" TEXT NOT NULL UNIQUE"));
        assert!(sql.contains("\"setup\" TEXT,") || sql.contains("\"setup\" TEXT\n"));
        assert!(sql.contains("\"extra\" TEXT NOT NULL"));
        assert!(sql.contains("\"flags_id\" INTEGER NOT NULL REFERENCES \"flags\" (id)"));
    }

    #[test]
    fn test_materialize_is_create_if_missing() {
        let conn = Connection::open_in_memory().unwrap();
        let registry = ShapeRegistry::new();
        let shape = registry.synthesize(&flags()).unwrap();

        assert!(!table_exists(&conn, "flags").unwrap());
        materialize_table(&conn, &shape).unwrap();
        conn.execute("INSERT INTO flags (nsfw) VALUES (1)", []).unwrap();
        materialize_table(&conn, &shape).unwrap();

        assert!(table_exists(&conn, "flags").unwrap());
        let rows: i64 = conn.query_row("SELECT COUNT(*) FROM flags", [], |r| r.get(0)).unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
