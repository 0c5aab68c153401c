use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::{inspect, ColumnDescriptor, ColumnKind, FieldType, SchemaDefinition};
use crate::error::{ScrapeKitError, ScrapeKitResult};

/// Link from a reference field to the table holding the nested record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub field: String,
    pub foreign_key: String,
    pub target: String,
}

/// Synthesized table definition for one schema
#[derive(Debug, Clone)]
pub struct TableShape {
    pub name: String,
    pub schema: SchemaDefinition,
    /// Columns after the implicit `id`, in declaration order
    pub columns: Vec<ColumnDescriptor>,
    pub associations: Vec<Association>,
}

impl TableShape {
    pub fn column_for_field(&self, field: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.field == field)
    }

    pub fn association(&self, field: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.field == field)
    }
}

/// Store of synthesized table shapes, keyed by lowercased schema name.
///
/// Shapes are built on first request and never replaced, so every caller
/// sharing a registry sees the same `Arc<TableShape>` for a schema name.
#[derive(Debug, Default)]
pub struct ShapeRegistry {
    shapes: RwLock<HashMap<String, Arc<TableShape>>>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached shape for this schema, building it on a miss
    pub fn synthesize(&self, definition: &SchemaDefinition) -> ScrapeKitResult<Arc<TableShape>> {
        let mut visiting = Vec::new();
        self.synthesize_inner(definition, &mut visiting)
    }

    fn synthesize_inner(
        &self,
        definition: &SchemaDefinition,
        visiting: &mut Vec<String>,
    ) -> ScrapeKitResult<Arc<TableShape>> {
        let key = definition.table_name();

        if let Some(shape) = self.get(&key)? {
            return Ok(shape);
        }

        if visiting.contains(&key) {
            let mut path = visiting.clone();
            path.push(key);
            return Err(ScrapeKitError::CyclicSchema { path: path.join(" -> ") });
        }

        visiting.push(key.clone());
        let mut associations = Vec::new();
        for field in &definition.fields {
            if let FieldType::Reference(target) = field.ty {
                let target_shape = self.synthesize_inner(&target(), visiting)?;
                associations.push(Association {
                    field: field.name.clone(),
                    foreign_key: format!("{}_id", field.name),
                    target: target_shape.name.clone(),
                });
            }
        }
        visiting.pop();

        let columns = inspect(definition);
        debug_assert!(columns.iter().all(|c| match &c.kind {
            ColumnKind::ForeignKey { target } => associations.iter().any(|a| &a.target == target),
            _ => true,
        }));

        let shape = TableShape {
            name: key.clone(),
            schema: definition.clone(),
            columns,
            associations,
        };

        let mut shapes = self
            .shapes
            .write()
            .map_err(|_| ScrapeKitError::internal("shape registry lock poisoned"))?;
        let entry = shapes.entry(key).or_insert_with(|| {
            debug!("Synthesized table shape: {}", shape.name);
            Arc::new(shape)
        });
        Ok(entry.clone())
    }

    /// Look up an already synthesized shape by table name
    pub fn get(&self, table: &str) -> ScrapeKitResult<Option<Arc<TableShape>>> {
        let shapes = self
            .shapes
            .read()
            .map_err(|_| ScrapeKitError::internal("shape registry lock poisoned"))?;
        Ok(shapes.get(table).cloned())
    }

    /// Like `get`, for shapes that must exist because a caller synthesized them
    pub fn require(&self, table: &str) -> ScrapeKitResult<Arc<TableShape>> {
        self.get(table)?
            .ok_or_else(|| ScrapeKitError::internal(format!("table shape not synthesized: {}", table)))
    }

    pub fn len(&self) -> usize {
        self.shapes.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;

    fn flags() -> SchemaDefinition {
        SchemaDefinition::new("Flags")
            .field(FieldDef::boolean("nsfw"))
            .field(FieldDef::boolean("political"))
    }

    fn joke() -> SchemaDefinition {
        SchemaDefinition::new("Joke")
            .field(FieldDef::text("category"))
            .field(FieldDef::reference("flags", flags))
    }

    fn node() -> SchemaDefinition {
        SchemaDefinition::new("Node").field(FieldDef::reference("next", node).optional())
    }

    fn ping() -> SchemaDefinition {
        SchemaDefinition::new("Ping").field(FieldDef::reference("pong", pong))
    }

    fn pong() -> SchemaDefinition {
        SchemaDefinition::new("Pong").field(FieldDef::reference("ping", ping))
    }

    #[test]
    fn test_synthesis_is_idempotent() {
        let registry = ShapeRegistry::new();
        let first = registry.synthesize(&flags()).unwrap();
        let second = registry.synthesize(&flags()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.columns, second.columns);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_key_is_case_insensitive() {
        let registry = ShapeRegistry::new();
        let a = registry.synthesize(&SchemaDefinition::new("User")).unwrap();
        let b = registry.synthesize(&SchemaDefinition::new("USER")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name, "user");
    }

    #[test]
    fn test_reference_target_synthesized_first() {
        let registry = ShapeRegistry::new();
        let shape = registry.synthesize(&joke()).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("flags").unwrap().is_some());
        assert_eq!(
            shape.association("flags"),
            Some(&Association {
                field: "flags".to_string(),
                foreign_key: "flags_id".to_string(),
                target: "flags".to_string(),
            })
        );
        assert_eq!(shape.column_for_field("flags").unwrap().name, "flags_id");
    }

    #[test]
    fn test_self_reference_is_rejected() {
        let registry = ShapeRegistry::new();
        let err = registry.synthesize(&node()).unwrap_err();
        match err {
            ScrapeKitError::CyclicSchema { path } => assert_eq!(path, "node -> node"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_mutual_reference_is_rejected() {
        let registry = ShapeRegistry::new();
        let err = registry.synthesize(&ping()).unwrap_err();
        assert!(matches!(err, ScrapeKitError::CyclicSchema { ref path } if path == "ping -> pong -> ping"));
    }

    #[test]
    fn test_require_missing_shape() {
        let registry = ShapeRegistry::new();
        assert!(registry.require("ghost").is_err());
    }
}
