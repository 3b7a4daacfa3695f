//! Lexical backend contract and the Tantivy-backed BM25 implementation.
//!
//! The core does not prescribe tokenization; it only requires that the
//! backend return BM25-family scores in descending order, ties broken by
//! insertion order, over the same `doc_id`s the vector index uses.

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, TantivyDocument};

use crate::error::{Error, Result};
use crate::types::Hit;

/// Abstraction over a BM25-family scorer with top-k search.
pub trait LexicalBackend: Send + Sync {
    fn search(&self, canon_query: &str, k: usize) -> Result<Vec<Hit>>;
}

/// A Tantivy index over `(doc_id, canonical_content)` pairs, built once from
/// a fixed corpus ordering that agrees with the vector index's insertion
/// order. Not incrementally mutable after [`TantivyBackend::build`].
pub struct TantivyBackend {
    index: Index,
    reader: IndexReader,
    doc_id_field: tantivy::schema::Field,
    content_field: tantivy::schema::Field,
}

impl TantivyBackend {
    /// Build an index from ordered `(doc_id, canonical_content)` pairs.
    /// `doc_id`s must already be unique; this is the vector index's job to
    /// enforce upstream, not this backend's.
    pub fn build(documents: &[(String, String)]) -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let doc_id_field = schema_builder.add_text_field("doc_id", STRING | STORED);
        let content_field = schema_builder.add_text_field("content", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let mut writer = index
            .writer(50_000_000)
            .map_err(|e| Error::Lexical(e.to_string()))?;

        for (doc_id, content) in documents {
            writer
                .add_document(doc!(
                    doc_id_field => doc_id.clone(),
                    content_field => content.clone(),
                ))
                .map_err(|e| Error::Lexical(e.to_string()))?;
        }
        writer.commit().map_err(|e| Error::Lexical(e.to_string()))?;

        let reader = index.reader().map_err(|e| Error::Lexical(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            doc_id_field,
            content_field,
        })
    }
}

impl LexicalBackend for TantivyBackend {
    fn search(&self, canon_query: &str, k: usize) -> Result<Vec<Hit>> {
        if canon_query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let query = query_parser
            .parse_query(canon_query)
            .map_err(|e| Error::Lexical(e.to_string()))?;
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(k))
            .map_err(|e| Error::Lexical(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| Error::Lexical(e.to_string()))?;
            let doc_id = retrieved
                .get_first(self.doc_id_field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            hits.push(Hit { doc_id, score });
        }
        Ok(hits)
    }
}
