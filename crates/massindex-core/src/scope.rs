//! Indexing scope resolution.
//!
//! Turns requested type names and restrictions into an immutable
//! [`IndexingScope`], rejecting invalid combinations before any work starts.

use massindex_types::{EntityType, JobParameters, MassIndexError, Predicate, Restriction};

/// One in-scope entity type with its optional restriction.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeEntry {
    pub entity_type: EntityType,
    pub restriction: Option<Restriction>,
}

/// Ordered, duplicate-free set of entity types to reindex.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexingScope {
    entries: Vec<ScopeEntry>,
}

impl IndexingScope {
    pub fn builder() -> ScopeBuilder {
        ScopeBuilder::default()
    }

    pub fn entries(&self) -> &[ScopeEntry] {
        &self.entries
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.entries.iter().map(|e| &e.entity_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, entity_type: &EntityType) -> bool {
        self.entry(entity_type).is_some()
    }

    pub fn restriction(&self, entity_type: &EntityType) -> Option<&Restriction> {
        self.entry(entity_type).and_then(|e| e.restriction.as_ref())
    }

    /// Whether the type may be split into several partitions.
    pub fn is_parallel(&self, entity_type: &EntityType) -> bool {
        self.restriction(entity_type)
            .is_none_or(Restriction::supports_partitioning)
    }

    fn entry(&self, entity_type: &EntityType) -> Option<&ScopeEntry> {
        self.entries.iter().find(|e| &e.entity_type == entity_type)
    }
}

#[derive(Debug, Default)]
struct PendingEntry {
    name: String,
    predicates: Vec<Predicate>,
    query: Option<String>,
}

/// Collects types and per-type restrictions, validated by [`ScopeBuilder::build`].
#[derive(Debug, Default)]
pub struct ScopeBuilder {
    types: Vec<String>,
    restrictions: Vec<PendingEntry>,
}

impl ScopeBuilder {
    pub fn entity_type(mut self, name: impl Into<String>) -> Self {
        self.types.push(name.into());
        self
    }

    pub fn entity_types<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types.extend(names.into_iter().map(Into::into));
        self
    }

    /// Add a predicate for one type; several predicates are combined with AND.
    pub fn predicate(mut self, name: impl Into<String>, predicate: Predicate) -> Self {
        self.pending(name.into()).predicates.push(predicate);
        self
    }

    /// Restrict one type with an opaque query.
    pub fn query(mut self, name: impl Into<String>, query: impl Into<String>) -> Self {
        self.pending(name.into()).query = Some(query.into());
        self
    }

    fn pending(&mut self, name: String) -> &mut PendingEntry {
        let name = name.trim().to_string();
        let index = match self.restrictions.iter().position(|e| e.name == name) {
            Some(index) => index,
            None => {
                self.restrictions.push(PendingEntry {
                    name,
                    ..Default::default()
                });
                self.restrictions.len() - 1
            }
        };
        &mut self.restrictions[index]
    }

    pub fn build(self) -> Result<IndexingScope, MassIndexError> {
        let mut entries: Vec<ScopeEntry> = Vec::new();
        for name in &self.types {
            let entity_type = EntityType::new(name)?;
            if !entries.iter().any(|e| e.entity_type == entity_type) {
                entries.push(ScopeEntry {
                    entity_type,
                    restriction: None,
                });
            }
        }
        if entries.is_empty() {
            return Err(MassIndexError::ScopeConfiguration(
                "at least one entity type is required".to_string(),
            ));
        }

        for pending in self.restrictions {
            let entity_type = EntityType::new(&pending.name)?;
            let entry = entries
                .iter_mut()
                .find(|e| e.entity_type == entity_type)
                .ok_or_else(|| {
                    MassIndexError::ScopeConfiguration(format!(
                        "restriction given for {} which is not in scope",
                        entity_type
                    ))
                })?;

            let mut predicates = pending.predicates;
            entry.restriction = match (predicates.len(), pending.query) {
                (0, None) => None,
                (0, Some(query)) => {
                    if query.trim().is_empty() {
                        return Err(MassIndexError::ScopeConfiguration(format!(
                            "empty query for {}",
                            entity_type
                        )));
                    }
                    Some(Restriction::Query(query))
                }
                (_, Some(_)) => {
                    return Err(MassIndexError::ScopeConfiguration(format!(
                        "{} is restricted by both a predicate and a query",
                        entity_type
                    )))
                }
                (1, None) => predicates.pop().map(Restriction::Predicate),
                (_, None) => Some(Restriction::Predicate(Predicate::All { predicates })),
            };

            if let Some(Restriction::Predicate(predicate)) = &entry.restriction {
                predicate.validate()?;
            }
        }

        Ok(IndexingScope { entries })
    }
}

/// Resolves the scope described by job parameters.
pub struct ScopeResolver;

impl ScopeResolver {
    /// The job-level restriction, if any, applies to every requested type.
    pub fn resolve(params: &JobParameters) -> Result<IndexingScope, MassIndexError> {
        if params.custom_query_hql.is_some() && params.custom_query_criteria.is_some() {
            return Err(MassIndexError::ScopeConfiguration(
                "customQueryHQL and customQueryCriteria are mutually exclusive".to_string(),
            ));
        }

        let mut builder = IndexingScope::builder().entity_types(params.entity_types.iter().cloned());
        if let Some(criteria) = &params.custom_query_criteria {
            let predicate = Predicate::from_json(criteria)?;
            for name in &params.entity_types {
                builder = builder.predicate(name.clone(), predicate.clone());
            }
        }
        if let Some(query) = &params.custom_query_hql {
            for name in &params.entity_types {
                builder = builder.query(name.clone(), query.clone());
            }
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn ty(name: &str) -> EntityType {
        EntityType::new(name).unwrap()
    }

    #[test]
    fn test_resolve_dedups_preserving_order() {
        let params = JobParameters::for_types(["Book", "Author", "Book", " Author "]);
        let scope = ScopeResolver::resolve(&params).unwrap();
        let names: Vec<_> = scope.entity_types().map(|t| t.as_str()).collect();
        assert_eq!(names, vec!["Book", "Author"]);
        assert!(scope.is_parallel(&ty("Book")));
        assert!(scope.restriction(&ty("Book")).is_none());
    }

    #[test]
    fn test_resolve_rejects_empty_and_dual_restriction() {
        let empty = JobParameters::for_types(Vec::<String>::new());
        assert!(matches!(
            ScopeResolver::resolve(&empty),
            Err(MassIndexError::ScopeConfiguration(_))
        ));

        let dual = JobParameters::for_types(["Book"])
            .with_custom_query("genre = 'scifi'")
            .with_criteria(r#"{"kind":"field_exists","field":"genre"}"#);
        assert!(matches!(
            ScopeResolver::resolve(&dual),
            Err(MassIndexError::ScopeConfiguration(_))
        ));
    }

    #[test]
    fn test_opaque_query_disables_parallelism() {
        let params = JobParameters::for_types(["Book", "Author"]).with_custom_query("year > 1900");
        let scope = ScopeResolver::resolve(&params).unwrap();
        for t in ["Book", "Author"] {
            assert!(!scope.is_parallel(&ty(t)));
            assert_eq!(
                scope.restriction(&ty(t)),
                Some(&Restriction::Query("year > 1900".to_string()))
            );
        }
    }

    #[test]
    fn test_criteria_is_validated() {
        let params = JobParameters::for_types(["Book"])
            .with_criteria(r#"{"kind":"key_range","min":10,"max":1}"#);
        assert!(matches!(
            ScopeResolver::resolve(&params),
            Err(MassIndexError::ScopeConfiguration(_))
        ));

        let params = JobParameters::for_types(["Book"])
            .with_criteria(r#"{"kind":"key_range","min":1,"max":10}"#);
        let scope = ScopeResolver::resolve(&params).unwrap();
        assert!(scope.is_parallel(&ty("Book")));
    }

    #[test]
    fn test_builder_per_type_restrictions() {
        let genre = Predicate::FieldEquals {
            field: "genre".to_string(),
            value: Value::from("scifi"),
        };
        let range = Predicate::KeyRange {
            min: Some(1),
            max: None,
        };
        let scope = IndexingScope::builder()
            .entity_types(["Book", "Author"])
            .predicate("Book", genre.clone())
            .predicate("Book", range.clone())
            .query("Author", "name != null")
            .build()
            .unwrap();

        assert_eq!(
            scope.restriction(&ty("Book")),
            Some(&Restriction::Predicate(Predicate::All {
                predicates: vec![genre.clone(), range]
            }))
        );
        assert!(scope.is_parallel(&ty("Book")));
        assert!(!scope.is_parallel(&ty("Author")));

        let both = IndexingScope::builder()
            .entity_type("Book")
            .predicate("Book", genre.clone())
            .query("Book", "year > 1")
            .build();
        assert!(both.is_err());

        let stray = IndexingScope::builder()
            .entity_type("Book")
            .predicate("Author", genre)
            .build();
        assert!(stray.is_err());
    }
}
