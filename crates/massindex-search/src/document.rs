//! Mapping from index documents to Tantivy documents.

use tantivy::doc;
use tantivy::TantivyDocument;

use massindex_types::IndexDocument;

use crate::schema::IndexSchema;

/// Convert an [`IndexDocument`] to a Tantivy document.
///
/// A missing tenant is stored as the empty string.
pub fn to_tantivy_doc(schema: &IndexSchema, document: &IndexDocument) -> TantivyDocument {
    doc!(
        schema.entity_type => document.entity_type.as_str(),
        schema.doc_id => document.doc_id.clone(),
        schema.tenant_id => document.tenant_id.clone().unwrap_or_default(),
        schema.text => document.text.clone(),
        schema.payload => document.payload.clone()
    )
}
