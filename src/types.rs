//! Shared result types that flow from the lexical/vector backends through
//! fusion and out of the orchestrator.

/// A single scored document from one backend (lexical or vector).
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub doc_id: String,
    pub score: f32,
}

/// A document after RRF fusion (and, in the REFINED phase, blending).
#[derive(Debug, Clone, PartialEq)]
pub struct RankedHit {
    pub doc_id: String,
    pub rrf_score: f64,
    pub lexical_score: Option<f32>,
    pub vector_score: Option<f32>,
    pub in_both: bool,
}

/// Which stage of the two-tier search produced a [`SearchResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initial,
    Refined,
}

/// One emission from the orchestrator: a complete, ordered hit list for one
/// phase. Never emitted partially.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub phase: Phase,
    pub hits: Vec<RankedHit>,
}
