//! Declarative record schemas and their column mapping.
//!
//! A record type describes itself once through [`Schema::definition`]: an
//! ordered list of fields with a semantic type and the `optional` / `unique`
//! modifiers. [`inspect`] turns that list into column descriptors, and the
//! [`registry`] builds and caches one table shape per schema name.

use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod registry;

pub use registry::{Association, ShapeRegistry, TableShape};

/// Name of the implicit identity field
pub const ID_FIELD: &str = "id";

/// A record type that can be persisted through the storage layer
pub trait Schema: Serialize + DeserializeOwned {
    fn definition() -> SchemaDefinition;
}

/// Declared semantic type of a field
#[derive(Debug, Clone, Copy)]
pub enum FieldType {
    Boolean,
    Text,
    Integer,
    Float,
    Date,
    Time,
    DateTime,
    /// Structured value stored as opaque JSON
    Json,
    /// Nested record of another schema
    Reference(fn() -> SchemaDefinition),
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::DateTime => "datetime",
            FieldType::Json => "json",
            FieldType::Reference(_) => "reference",
        }
    }
}

/// One declared field of a schema
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub optional: bool,
    pub unique: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
            unique: false,
        }
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Date)
    }

    pub fn time(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Time)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::DateTime)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Json)
    }

    pub fn reference(name: impl Into<String>, target: fn() -> SchemaDefinition) -> Self {
        Self::new(name, FieldType::Reference(target))
    }

    /// Field may be absent
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Field values must be distinct across rows
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Ordered field list of one record shape, identified by its name
#[derive(Debug, Clone)]
pub struct SchemaDefinition {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl SchemaDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Table name and registry key
    pub fn table_name(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Storage category of a column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    Integer,
    Float,
    Text,
    Date,
    Time,
    DateTime,
    Json,
    ForeignKey { target: String },
}

/// Column derived from one schema field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Column name; `<field>_id` for references
    pub name: String,
    /// Field the column is read from and written to
    pub field: String,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub unique: bool,
}

/// Map each declared field except `id` to a column descriptor
pub fn inspect(definition: &SchemaDefinition) -> Vec<ColumnDescriptor> {
    definition
        .fields
        .iter()
        .filter(|field| field.name != ID_FIELD)
        .map(describe)
        .collect()
}

fn describe(field: &FieldDef) -> ColumnDescriptor {
    let kind = match field.ty {
        FieldType::Boolean => ColumnKind::Boolean,
        FieldType::Text => ColumnKind::Text,
        FieldType::Integer => ColumnKind::Integer,
        FieldType::Float => ColumnKind::Float,
        FieldType::Date => ColumnKind::Date,
        FieldType::Time => ColumnKind::Time,
        FieldType::DateTime => ColumnKind::DateTime,
        FieldType::Reference(target) => ColumnKind::ForeignKey {
            target: target().table_name(),
        },
        FieldType::Json => ColumnKind::Json,
    };

    let name = match kind {
        ColumnKind::ForeignKey { .. } => format!("{}_id", field.name),
        _ => field.name.clone(),
    };

    ColumnDescriptor {
        name,
        field: field.name.clone(),
        kind,
        nullable: field.optional,
        unique: field.unique,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> SchemaDefinition {
        SchemaDefinition::new("Author").field(FieldDef::text("name").unique())
    }

    fn post() -> SchemaDefinition {
        SchemaDefinition::new("BlogPost")
            .field(FieldDef::integer(ID_FIELD))
            .field(FieldDef::text("title"))
            .field(FieldDef::boolean("published"))
            .field(FieldDef::float("score").optional())
            .field(FieldDef::date("day"))
            .field(FieldDef::time("at"))
            .field(FieldDef::datetime("created"))
            .field(FieldDef::json("tags"))
            .field(FieldDef::reference("author", author).optional())
    }

    #[test]
    fn test_identity_field_is_skipped() {
        let columns = inspect(&post());
        assert_eq!(columns.len(), 8);
        assert!(columns.iter().all(|c| c.name != ID_FIELD));
    }

    #[test]
    fn test_type_mapping_and_order() {
        let kinds: Vec<ColumnKind> = inspect(&post()).into_iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ColumnKind::Text,
                ColumnKind::Boolean,
                ColumnKind::Float,
                ColumnKind::Date,
                ColumnKind::Time,
                ColumnKind::DateTime,
                ColumnKind::Json,
                ColumnKind::ForeignKey { target: "author".to_string() },
            ]
        );
    }

    #[test]
    fn test_modifiers() {
        let columns = inspect(&post());
        let score = columns.iter().find(|c| c.name == "score").unwrap();
        assert!(score.nullable);
        assert!(!score.unique);

        let title = columns.iter().find(|c| c.name == "title").unwrap();
        assert!(!title.nullable);

        let name = &inspect(&author())[0];
        assert!(name.unique);
    }

    #[test]
    fn test_reference_column_naming() {
        let columns = inspect(&post());
        let author = columns.last().unwrap();
        assert_eq!(author.name, "author_id");
        assert_eq!(author.field, "author");
        assert!(author.nullable);
    }

    #[test]
    fn test_table_name_is_lowercased() {
        assert_eq!(post().table_name(), "blogpost");
    }
}
