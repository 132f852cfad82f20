//! Read access to the entity index.

use tantivy::collector::{Count, DocSetCollector, TopDocs};
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{IndexReader, TantivyDocument, Term};
use tracing::debug;

use massindex_types::EntityType;

use crate::error::SearchError;
use crate::index::SearchIndex;
use crate::schema::IndexSchema;

/// A full-text search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub doc_id: String,
    pub entity_type: String,
    /// BM25 relevance score
    pub score: f32,
    pub payload: String,
}

/// Counting and BM25 search over committed documents.
pub struct IndexSearcher {
    reader: IndexReader,
    schema: IndexSchema,
    query_parser: QueryParser,
}

impl IndexSearcher {
    pub fn new(index: &SearchIndex) -> Result<Self, SearchError> {
        let reader = index.reader()?;
        let schema = index.schema().clone();
        let query_parser = QueryParser::for_index(index.index(), vec![schema.text]);

        Ok(Self {
            reader,
            schema,
            query_parser,
        })
    }

    /// Reload the reader to see recent commits.
    pub fn reload(&self) -> Result<(), SearchError> {
        self.reader.reload()?;
        debug!("Reloaded search reader");
        Ok(())
    }

    fn type_query(&self, entity_type: &EntityType) -> TermQuery {
        TermQuery::new(
            Term::from_field_text(self.schema.entity_type, entity_type.as_str()),
            IndexRecordOption::Basic,
        )
    }

    fn count(&self, query: &dyn Query) -> Result<u64, SearchError> {
        let count = self.reader.searcher().search(query, &Count)?;
        Ok(count as u64)
    }

    pub fn count_all(&self) -> Result<u64, SearchError> {
        self.count(&AllQuery)
    }

    pub fn count_type(&self, entity_type: &EntityType) -> Result<u64, SearchError> {
        self.count(&self.type_query(entity_type))
    }

    pub fn count_tenant(&self, entity_type: &EntityType, tenant_id: &str) -> Result<u64, SearchError> {
        let tenant = TermQuery::new(
            Term::from_field_text(self.schema.tenant_id, tenant_id),
            IndexRecordOption::Basic,
        );
        let query = BooleanQuery::new(vec![
            (Occur::Must, Box::new(self.type_query(entity_type)) as Box<dyn Query>),
            (Occur::Must, Box::new(tenant)),
        ]);
        self.count(&query)
    }

    /// Sorted document ids of one type.
    pub fn doc_ids(&self, entity_type: &EntityType) -> Result<Vec<String>, SearchError> {
        let searcher = self.reader.searcher();
        let addresses = searcher.search(&self.type_query(entity_type), &DocSetCollector)?;

        let mut ids = Vec::with_capacity(addresses.len());
        for address in addresses {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(id) = doc.get_first(self.schema.doc_id).and_then(|v| v.as_str()) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// BM25 search over the text field.
    pub fn search(&self, query_str: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let query = self.query_parser.parse_query(query_str)?;
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let text = |field: Field| {
                doc.get_first(field)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            hits.push(SearchHit {
                doc_id: text(self.schema.doc_id),
                entity_type: text(self.schema.entity_type),
                score,
                payload: text(self.schema.payload),
            });
        }
        Ok(hits)
    }
}
