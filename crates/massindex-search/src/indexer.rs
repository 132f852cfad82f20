//! Index writer for mass indexing.
//!
//! The indexer wraps IndexWriter with shared access via Arc<Mutex>.
//! Documents are not visible until commit() is called.

use std::sync::{Arc, Mutex, MutexGuard};

use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::{Index, IndexWriter, Term};
use tracing::{debug, info};

use massindex_types::{EntityType, IndexDocument};

use crate::document::to_tantivy_doc;
use crate::error::SearchError;
use crate::index::SearchIndex;
use crate::schema::IndexSchema;

/// Manages document writes, purges and merges.
pub struct SearchIndexer {
    writer: Arc<Mutex<IndexWriter>>,
    index: Index,
    schema: IndexSchema,
}

impl SearchIndexer {
    /// Create a new indexer from a SearchIndex.
    pub fn new(index: &SearchIndex) -> Result<Self, SearchError> {
        let writer = index.writer()?;
        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            index: index.index().clone(),
            schema: index.schema().clone(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, IndexWriter>, SearchError> {
        self.writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))
    }

    /// Add documents, replacing any existing document with the same doc_id.
    pub fn add_documents(&self, documents: &[IndexDocument]) -> Result<usize, SearchError> {
        let writer = self.lock()?;

        for document in documents {
            let term = Term::from_field_text(self.schema.doc_id, &document.doc_id);
            writer.delete_term(term);
            writer.add_document(to_tantivy_doc(&self.schema, document))?;
        }

        debug!(count = documents.len(), "Indexed documents batch");
        Ok(documents.len())
    }

    /// Commit pending changes to make them searchable.
    pub fn commit(&self) -> Result<u64, SearchError> {
        let mut writer = self.lock()?;
        let opstamp = writer.commit()?;
        debug!(opstamp, "Committed index changes");
        Ok(opstamp)
    }

    /// Remove every document of a type, optionally limited to one tenant,
    /// and commit.
    pub fn purge(&self, entity_type: &EntityType, tenant_id: Option<&str>) -> Result<(), SearchError> {
        let mut writer = self.lock()?;
        let type_term = Term::from_field_text(self.schema.entity_type, entity_type.as_str());

        match tenant_id {
            None => {
                writer.delete_term(type_term);
            }
            Some(tenant) => {
                let tenant_term = Term::from_field_text(self.schema.tenant_id, tenant);
                let query = BooleanQuery::new(vec![
                    (
                        Occur::Must,
                        Box::new(TermQuery::new(type_term, IndexRecordOption::Basic))
                            as Box<dyn Query>,
                    ),
                    (
                        Occur::Must,
                        Box::new(TermQuery::new(tenant_term, IndexRecordOption::Basic)),
                    ),
                ]);
                writer.delete_query(Box::new(query))?;
            }
        }

        let opstamp = writer.commit()?;
        info!(entity_type = %entity_type, tenant = ?tenant_id, opstamp, "Purged entity type");
        Ok(())
    }

    /// Commit, merge all searchable segments into one and remove
    /// obsolete files. Returns the number of segments merged.
    pub fn optimize(&self) -> Result<usize, SearchError> {
        let mut writer = self.lock()?;
        writer.commit()?;

        let segment_ids = self.index.searchable_segment_ids()?;
        let merged = segment_ids.len();
        if merged > 1 {
            writer.merge(&segment_ids).wait()?;
        }
        writer.garbage_collect_files().wait()?;

        info!(segments = merged, "Optimized index");
        Ok(merged)
    }

    /// Number of searchable segments.
    pub fn segment_count(&self) -> Result<usize, SearchError> {
        Ok(self.index.searchable_segment_ids()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SearchIndexConfig;
    use crate::searcher::IndexSearcher;
    use tempfile::TempDir;

    fn document(ty: &str, key: u64, tenant: Option<&str>) -> IndexDocument {
        let entity_type = EntityType::new(ty).unwrap();
        IndexDocument {
            doc_id: IndexDocument::doc_id_for(&entity_type, key),
            entity_type,
            tenant_id: tenant.map(str::to_string),
            text: format!("{} number {}", ty, key),
            payload: "{}".to_string(),
        }
    }

    fn setup() -> (TempDir, SearchIndex, SearchIndexer) {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open_or_create(SearchIndexConfig::new(temp_dir.path())).unwrap();
        let indexer = SearchIndexer::new(&index).unwrap();
        (temp_dir, index, indexer)
    }

    #[test]
    fn test_add_is_replace_by_id() {
        let (_temp, index, indexer) = setup();
        indexer
            .add_documents(&[document("Book", 1, None), document("Book", 2, None)])
            .unwrap();
        indexer.add_documents(&[document("Book", 1, None)]).unwrap();
        indexer.commit().unwrap();

        let searcher = IndexSearcher::new(&index).unwrap();
        assert_eq!(searcher.count_type(&EntityType::new("Book").unwrap()).unwrap(), 2);
    }

    #[test]
    fn test_purge_by_type_and_tenant() {
        let (_temp, index, indexer) = setup();
        indexer
            .add_documents(&[
                document("Book", 1, Some("acme")),
                document("Book", 2, Some("globex")),
                document("Author", 1, Some("acme")),
            ])
            .unwrap();
        indexer.commit().unwrap();

        let book = EntityType::new("Book").unwrap();
        let author = EntityType::new("Author").unwrap();
        indexer.purge(&book, Some("acme")).unwrap();

        let searcher = IndexSearcher::new(&index).unwrap();
        assert_eq!(searcher.count_type(&book).unwrap(), 1);
        assert_eq!(searcher.count_type(&author).unwrap(), 1);

        indexer.purge(&book, None).unwrap();
        searcher.reload().unwrap();
        assert_eq!(searcher.count_type(&book).unwrap(), 0);
        assert_eq!(searcher.count_all().unwrap(), 1);
    }

    #[test]
    fn test_optimize_merges_segments() {
        let (_temp, index, indexer) = setup();
        for key in 1..=3 {
            indexer.add_documents(&[document("Book", key, None)]).unwrap();
            indexer.commit().unwrap();
        }
        assert!(indexer.segment_count().unwrap() >= 2);

        indexer.optimize().unwrap();
        assert_eq!(indexer.segment_count().unwrap(), 1);

        let searcher = IndexSearcher::new(&index).unwrap();
        assert_eq!(searcher.count_all().unwrap(), 3);
    }
}
