//! Restrictions narrowing which records of an entity type are in scope.
//!
//! Two mutually exclusive forms exist:
//! - [`Predicate`]: declarative, validated before any work starts, and safe
//!   to combine with partition key ranges.
//! - an opaque query string: handed to the record source untouched. The
//!   engine cannot prove it yields a stable, sliceable key order, so a type
//!   restricted this way is planned as a single partition.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{PrimaryKey, Record};
use crate::error::MassIndexError;

/// Declarative restriction predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Keys within `[min, max]`; a missing bound is open.
    KeyRange {
        #[serde(default)]
        min: Option<PrimaryKey>,
        #[serde(default)]
        max: Option<PrimaryKey>,
    },
    /// Field equals a JSON value.
    FieldEquals { field: String, value: Value },
    /// Field is present and not null.
    FieldExists { field: String },
    /// Conjunction of predicates.
    All { predicates: Vec<Predicate> },
}

impl Predicate {
    /// Static validation performed by the scope resolver.
    pub fn validate(&self) -> Result<(), MassIndexError> {
        match self {
            Predicate::KeyRange {
                min: Some(min),
                max: Some(max),
            } if min > max => Err(MassIndexError::ScopeConfiguration(format!(
                "key range predicate has min {} > max {}",
                min, max
            ))),
            Predicate::KeyRange { .. } => Ok(()),
            Predicate::FieldEquals { field, .. } | Predicate::FieldExists { field } => {
                if field.trim().is_empty() {
                    Err(MassIndexError::ScopeConfiguration(
                        "predicate field name must not be empty".to_string(),
                    ))
                } else {
                    Ok(())
                }
            }
            Predicate::All { predicates } => {
                if predicates.is_empty() {
                    return Err(MassIndexError::ScopeConfiguration(
                        "conjunction predicate must not be empty".to_string(),
                    ));
                }
                predicates.iter().try_for_each(Predicate::validate)
            }
        }
    }

    /// Evaluate against a key alone. Returns `None` when record fields are needed.
    pub fn matches_key(&self, key: PrimaryKey) -> Option<bool> {
        match self {
            Predicate::KeyRange { min, max } => Some(
                min.is_none_or(|min| key >= min) && max.is_none_or(|max| key <= max),
            ),
            Predicate::FieldEquals { .. } | Predicate::FieldExists { .. } => None,
            Predicate::All { predicates } => {
                let mut decided = true;
                for predicate in predicates {
                    match predicate.matches_key(key) {
                        Some(false) => return Some(false),
                        Some(true) => {}
                        None => decided = false,
                    }
                }
                decided.then_some(true)
            }
        }
    }

    /// Evaluate against a full record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Predicate::KeyRange { .. } => self.matches_key(record.key).unwrap_or(false),
            Predicate::FieldEquals { field, value } => record.field(field) == Some(value),
            Predicate::FieldExists { field } => {
                record.field(field).is_some_and(|value| !value.is_null())
            }
            Predicate::All { predicates } => predicates.iter().all(|p| p.matches(record)),
        }
    }

    /// Parse the JSON form used by the `customQueryCriteria` job parameter.
    pub fn from_json(json: &str) -> Result<Self, MassIndexError> {
        serde_json::from_str(json).map_err(|e| {
            MassIndexError::ScopeConfiguration(format!("invalid criteria predicate: {}", e))
        })
    }
}

/// Restriction attached to one entity type of a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Restriction {
    Predicate(Predicate),
    /// Opaque query in the record source's own language; never parsed here.
    Query(String),
}

impl Restriction {
    /// Whether the planner may split this type into several partitions.
    pub fn supports_partitioning(&self) -> bool {
        matches!(self, Restriction::Predicate(_))
    }
}
