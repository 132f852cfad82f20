//! Tantivy schema for indexed entities.
//!
//! Every entity type shares one schema; documents are told apart by the
//! `entity_type` term and addressed by the unique `doc_id` term.

use tantivy::schema::{Field, Schema, STORED, STRING, TEXT};

use crate::SearchError;

/// Schema field handles for efficient access
#[derive(Debug, Clone)]
pub struct IndexSchema {
    schema: Schema,
    /// Entity type name (STRING | STORED)
    pub entity_type: Field,
    /// `{entity_type}:{key}` (STRING | STORED)
    pub doc_id: Field,
    /// Tenant scope, empty when untenanted (STRING | STORED)
    pub tenant_id: Field,
    /// Searchable content (TEXT)
    pub text: Field,
    /// Stored JSON payload (STORED)
    pub payload: Field,
}

impl IndexSchema {
    /// Get the underlying Tantivy schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Create an IndexSchema from an existing Tantivy Schema
    pub fn from_schema(schema: Schema) -> Result<Self, SearchError> {
        let field = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| SearchError::SchemaMismatch(format!("missing {} field", name)))
        };
        let entity_type = field("entity_type")?;
        let doc_id = field("doc_id")?;
        let tenant_id = field("tenant_id")?;
        let text = field("text")?;
        let payload = field("payload")?;

        Ok(Self {
            schema,
            entity_type,
            doc_id,
            tenant_id,
            text,
            payload,
        })
    }
}

/// Build the entity index schema.
pub fn build_index_schema() -> IndexSchema {
    let mut schema_builder = Schema::builder();

    let entity_type = schema_builder.add_text_field("entity_type", STRING | STORED);
    let doc_id = schema_builder.add_text_field("doc_id", STRING | STORED);
    let tenant_id = schema_builder.add_text_field("tenant_id", STRING | STORED);
    let text = schema_builder.add_text_field("text", TEXT);
    let payload = schema_builder.add_text_field("payload", STORED);

    let schema = schema_builder.build();

    IndexSchema {
        schema,
        entity_type,
        doc_id,
        tenant_id,
        text,
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_schema() {
        let schema = build_index_schema();
        for name in ["entity_type", "doc_id", "tenant_id", "text", "payload"] {
            assert!(schema.schema.get_field(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_from_schema() {
        let original = build_index_schema();
        let rebuilt = IndexSchema::from_schema(original.schema().clone()).unwrap();
        assert_eq!(rebuilt.doc_id, original.doc_id);
        assert_eq!(rebuilt.payload, original.payload);
    }

    #[test]
    fn test_from_foreign_schema_fails() {
        let mut builder = Schema::builder();
        builder.add_text_field("doc_id", STRING);
        assert!(matches!(
            IndexSchema::from_schema(builder.build()),
            Err(SearchError::SchemaMismatch(_))
        ));
    }
}
