//! Entity identifiers, records and index documents.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MassIndexError;

/// Primary key of a record. Keys of one entity type are totally ordered.
pub type PrimaryKey = u64;

/// Identifier of an indexed entity type (e.g. `"Book"`).
///
/// Type names end up inside storage keys, so the separators `:` and `#`
/// and whitespace are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityType(String);

impl EntityType {
    /// Create an entity type from a name, trimming surrounding whitespace.
    pub fn new(name: impl AsRef<str>) -> Result<Self, MassIndexError> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(MassIndexError::ScopeConfiguration(
                "entity type name must not be empty".to_string(),
            ));
        }
        if name.chars().any(|c| c == ':' || c == '#' || c.is_whitespace()) {
            return Err(MassIndexError::ScopeConfiguration(format!(
                "invalid entity type name: {:?}",
                name
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityType {
    type Err = MassIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EntityType {
    type Error = MassIndexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.0
    }
}

/// A record loaded from the authoritative store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub entity_type: EntityType,
    pub key: PrimaryKey,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(entity_type: EntityType, key: PrimaryKey) -> Self {
        Self {
            entity_type,
            key,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A document ready to be written to the full-text index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub entity_type: EntityType,
    /// Unique within the index: `{entity_type}:{key}`
    pub doc_id: String,
    pub tenant_id: Option<String>,
    /// Full-text searchable content
    pub text: String,
    /// Stored JSON payload
    pub payload: String,
}

impl IndexDocument {
    /// Canonical document id for a record key.
    pub fn doc_id_for(entity_type: &EntityType, key: PrimaryKey) -> String {
        format!("{}:{}", entity_type, key)
    }
}
