//! Record to document conversion.
//!
//! Converters are chosen from a static type map; types without an entry
//! use the registry default, a [`JsonFieldConverter`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use massindex_types::{EntityType, IndexDocument, MassIndexError, Record};

/// Turns one loaded record into at most one index document.
///
/// Returning `Ok(None)` declines the record (it is counted as filtered).
/// Implementations must be deterministic.
pub trait DocumentConverter: Send + Sync {
    fn convert(
        &self,
        record: &Record,
        tenant_id: Option<&str>,
    ) -> Result<Option<IndexDocument>, MassIndexError>;
}

/// Indexes the string and number fields of a record as full text and
/// stores all fields as the JSON payload.
#[derive(Debug, Clone, Default)]
pub struct JsonFieldConverter {
    text_fields: Option<Vec<String>>,
    indexable_flag: Option<String>,
}

impl JsonFieldConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the full-text content to the named fields.
    pub fn with_text_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.text_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Decline records whose `field` is `false`.
    pub fn with_indexable_flag(mut self, field: impl Into<String>) -> Self {
        self.indexable_flag = Some(field.into());
        self
    }

    fn text_of(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(s) => out.push(s.clone()),
            Value::Number(n) => out.push(n.to_string()),
            Value::Array(items) => items.iter().for_each(|item| Self::text_of(item, out)),
            _ => {}
        }
    }
}

impl DocumentConverter for JsonFieldConverter {
    fn convert(
        &self,
        record: &Record,
        tenant_id: Option<&str>,
    ) -> Result<Option<IndexDocument>, MassIndexError> {
        if let Some(flag) = &self.indexable_flag {
            if record.field(flag) == Some(&Value::Bool(false)) {
                return Ok(None);
            }
        }

        let mut parts = Vec::new();
        match &self.text_fields {
            Some(fields) => {
                for name in fields {
                    if let Some(value) = record.field(name) {
                        Self::text_of(value, &mut parts);
                    }
                }
            }
            None => record
                .fields
                .values()
                .for_each(|value| Self::text_of(value, &mut parts)),
        }

        let payload = serde_json::to_string(&record.fields)
            .map_err(|e| MassIndexError::Conversion(format!("{}: {}", record.key, e)))?;

        Ok(Some(IndexDocument {
            entity_type: record.entity_type.clone(),
            doc_id: IndexDocument::doc_id_for(&record.entity_type, record.key),
            tenant_id: tenant_id.map(str::to_string),
            text: parts.join(" "),
            payload,
        }))
    }
}

/// Static mapping from entity type to converter.
#[derive(Clone)]
pub struct ConverterRegistry {
    by_type: HashMap<EntityType, Arc<dyn DocumentConverter>>,
    default: Arc<dyn DocumentConverter>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new(Arc::new(JsonFieldConverter::new()))
    }
}

impl ConverterRegistry {
    pub fn new(default: Arc<dyn DocumentConverter>) -> Self {
        Self {
            by_type: HashMap::new(),
            default,
        }
    }

    pub fn with_converter(
        mut self,
        entity_type: EntityType,
        converter: Arc<dyn DocumentConverter>,
    ) -> Self {
        self.by_type.insert(entity_type, converter);
        self
    }

    pub fn for_type(&self, entity_type: &EntityType) -> &dyn DocumentConverter {
        self.by_type
            .get(entity_type)
            .map(|c| c.as_ref())
            .unwrap_or(self.default.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> Record {
        Record::new(EntityType::new("Book").unwrap(), 7)
            .with_field("title", "Dune")
            .with_field("year", 1965)
            .with_field("tags", serde_json::json!(["scifi", "desert"]))
            .with_field("published", true)
    }

    #[test]
    fn test_json_converter_builds_document() {
        let doc = JsonFieldConverter::new()
            .convert(&book(), Some("acme"))
            .unwrap()
            .unwrap();
        assert_eq!(doc.doc_id, "Book:7");
        assert_eq!(doc.tenant_id.as_deref(), Some("acme"));
        for word in ["scifi", "desert", "Dune", "1965"] {
            assert!(doc.text.split(' ').any(|w| w == word), "{word} missing");
        }
        assert!(!doc.text.contains("true"));
        let payload: serde_json::Value = serde_json::from_str(&doc.payload).unwrap();
        assert_eq!(payload["title"], "Dune");
    }

    #[test]
    fn test_text_fields_and_flag() {
        let converter = JsonFieldConverter::new()
            .with_text_fields(["title"])
            .with_indexable_flag("published");
        let doc = converter.convert(&book(), None).unwrap().unwrap();
        assert_eq!(doc.text, "Dune");
        assert!(doc.tenant_id.is_none());

        let hidden = book().with_field("published", false);
        assert!(converter.convert(&hidden, None).unwrap().is_none());
    }

    struct Rejecting;

    impl DocumentConverter for Rejecting {
        fn convert(
            &self,
            record: &Record,
            _tenant_id: Option<&str>,
        ) -> Result<Option<IndexDocument>, MassIndexError> {
            Err(MassIndexError::Conversion(record.key.to_string()))
        }
    }

    #[test]
    fn test_registry_lookup_falls_back_to_default() {
        let author = EntityType::new("Author").unwrap();
        let registry = ConverterRegistry::default().with_converter(author.clone(), Arc::new(Rejecting));

        let author_record = Record::new(author.clone(), 1);
        assert!(registry.for_type(&author).convert(&author_record, None).is_err());

        let book_type = EntityType::new("Book").unwrap();
        assert!(registry.for_type(&book_type).convert(&book(), None).is_ok());
    }
}
