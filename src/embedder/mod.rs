//! Embedder contract: the capability interface the orchestrator and vector
//! index use to turn text into vectors, plus the deterministic fallback.

mod hash;

pub use hash::HashEmbedder;

use crate::error::{Error, Result};

/// A vectorizer. Implementations are expected to be stateless with respect
/// to queries (same input -> identical output within a process) and safe to
/// share across concurrent callers.
pub trait Embedder: Send + Sync {
    /// Stable identifier recorded in persisted indexes and compared on load.
    fn model_id(&self) -> &str;

    /// Output vector length. Every vector this embedder produces has this
    /// many components.
    fn dimension(&self) -> usize;

    /// Embed a single piece of text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts. The default calls [`Embedder::embed`] per
    /// item; implementations backed by a model that batches efficiently
    /// should override this.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// A factory that may or may not be able to produce an embedder (e.g. a
/// model file is missing, or an optional backend wasn't compiled in).
pub type EmbedderFactory = Box<dyn Fn() -> Option<Box<dyn Embedder>> + Send + Sync>;

/// Build an embedder by trying each candidate factory in order and keeping
/// the first one that succeeds. A dependency-free hash-based fallback is
/// always appended last, so this never fails to produce an embedder.
///
/// This replaces the dynamic "probe for whatever's importable" pattern with
/// an explicit, ordered list the caller controls.
pub fn build_embedder(candidates: Vec<EmbedderFactory>, fallback_dimension: usize) -> Box<dyn Embedder> {
    for factory in candidates {
        if let Some(embedder) = factory() {
            return embedder;
        }
    }
    Box::new(HashEmbedder::new(fallback_dimension))
}

/// Validate that an embedder's output matches its declared dimension;
/// embedders should call this from their own `embed`/`embed_batch` rather
/// than trust a model's output length.
pub(crate) fn check_dimension(embedder_id: &str, expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::Embedder(format!(
            "{embedder_id} produced a vector of length {}, expected {expected}",
            vector.len()
        )));
    }
    Ok(())
}
