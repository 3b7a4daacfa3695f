//! Reserved reranker interface.
//!
//! No cross-encoder or late-interaction reranker ships in this crate, and
//! the orchestrator does not call this trait anywhere. An implementer that
//! wants a third phase after REFINED wires it externally; adding it inside
//! the orchestrator speculatively would mean every caller pays for a phase
//! nobody asked for.

use crate::error::Result;

/// Scores `(query, document)` pairs directly, as a cross-encoder or
/// late-interaction model would. Distinct from [`crate::embedder::Embedder`]:
/// a reranker sees both sides of the pair at once rather than producing
/// independent vectors.
pub trait Reranker: Send + Sync {
    fn score_pairs(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}
