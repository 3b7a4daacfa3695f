//! The two-tier orchestrator: a pull-based, at-most-two-emission producer
//! of INITIAL then REFINED search results.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use crate::canonicalize::canonicalize;
use crate::classify::{classify, QueryClass};
use crate::config::TwoTierConfig;
use crate::embedder::Embedder;
use crate::error::Result;
use crate::fusion::{self, FusionWeights};
use crate::lexical::LexicalBackend;
use crate::types::{Hit, Phase, RankedHit, SearchResult};
use crate::vector_index::{Distance, VectorIndex};

/// Cooperative cancellation shared between a caller and an in-flight search.
/// Checked at phase boundaries; never forcibly interrupts a running thread.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Resolves a document id to its canonical text, for re-embedding REFINED
/// candidates whose stored vector wasn't produced by the quality embedder.
/// The core holds no document store of its own; this callback is the
/// caller's bridge to wherever that text actually lives.
pub type TextResolver = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Immutable context shared by every search run against one corpus.
pub struct TwoTierOrchestrator {
    vector_index: Arc<VectorIndex>,
    fast_embedder: Arc<dyn Embedder>,
    quality_embedder: Option<Arc<dyn Embedder>>,
    lexical_backend: Option<Arc<dyn LexicalBackend>>,
    config: TwoTierConfig,
    resolve_text: TextResolver,
}

impl TwoTierOrchestrator {
    pub fn new(
        vector_index: Arc<VectorIndex>,
        fast_embedder: Arc<dyn Embedder>,
        quality_embedder: Option<Arc<dyn Embedder>>,
        lexical_backend: Option<Arc<dyn LexicalBackend>>,
        config: TwoTierConfig,
        resolve_text: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            vector_index,
            fast_embedder,
            quality_embedder,
            lexical_backend,
            config,
            resolve_text: Arc::new(resolve_text),
        }
    }

    /// Start a search. Nothing runs until the returned iterator is polled:
    /// the first `next()` produces INITIAL (or fails the call outright on a
    /// fast-path error); the second, if present, produces REFINED.
    pub fn search(&self, query: &str, k: usize, cancel: CancellationToken) -> TwoTierSearch {
        TwoTierSearch {
            vector_index: self.vector_index.clone(),
            fast_embedder: self.fast_embedder.clone(),
            quality_embedder: self.quality_embedder.clone(),
            lexical_backend: self.lexical_backend.clone(),
            config: self.config.clone(),
            resolve_text: self.resolve_text.clone(),
            cancel,
            query: query.to_string(),
            k,
            stage: Stage::Initial,
        }
    }
}

enum Stage {
    Initial,
    Refined {
        canon_query: String,
        initial_hits: Vec<RankedHit>,
    },
    Done,
}

/// The lazy INITIAL/REFINED sequence for one search call. Implements
/// [`Iterator`] rather than a generator: the state machine has exactly two
/// live states beyond its starting one.
pub struct TwoTierSearch {
    vector_index: Arc<VectorIndex>,
    fast_embedder: Arc<dyn Embedder>,
    quality_embedder: Option<Arc<dyn Embedder>>,
    lexical_backend: Option<Arc<dyn LexicalBackend>>,
    config: TwoTierConfig,
    resolve_text: TextResolver,
    cancel: CancellationToken,
    query: String,
    k: usize,
    stage: Stage,
}

impl Iterator for TwoTierSearch {
    type Item = Result<SearchResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancel.is_cancelled() {
            self.stage = Stage::Done;
            return None;
        }

        match std::mem::replace(&mut self.stage, Stage::Done) {
            Stage::Initial => self.run_initial(),
            Stage::Refined {
                canon_query,
                initial_hits,
            } => self.run_refined(canon_query, initial_hits),
            Stage::Done => None,
        }
    }
}

impl TwoTierSearch {
    fn run_initial(&mut self) -> Option<Result<SearchResult>> {
        let canon_query = canonicalize(&self.query);
        let class = classify(&canon_query);

        let Some((w_lex, w_sem)) = class.fusion_weights() else {
            // Empty query: short-circuit to a zero-hit INITIAL, no REFINED.
            return Some(Ok(SearchResult {
                phase: Phase::Initial,
                hits: Vec::new(),
            }));
        };

        let candidate_k = self.k * self.config.candidate_multiplier;
        let vector_index = &self.vector_index;
        let fast_embedder = &self.fast_embedder;
        let lexical_backend = &self.lexical_backend;
        let canon_ref = &canon_query;

        let (vector_result, lexical_result): (Result<Vec<Hit>>, Result<Vec<Hit>>) = rayon::join(
            || -> Result<Vec<Hit>> {
                let query_vector = fast_embedder.embed(canon_ref)?;
                vector_index.search(&query_vector, candidate_k)
            },
            || -> Result<Vec<Hit>> {
                match lexical_backend {
                    Some(backend) => backend.search(canon_ref, candidate_k),
                    None => Ok(Vec::new()),
                }
            },
        );

        let vector_hits = match vector_result {
            Ok(hits) => hits,
            Err(e) => return Some(Err(e)),
        };
        let lexical_hits = match lexical_result {
            Ok(hits) => hits,
            Err(e) => return Some(Err(e)),
        };

        let weights = FusionWeights {
            lexical: w_lex,
            semantic: w_sem,
        };
        let mut fused = fusion::rrf_fuse(&lexical_hits, &vector_hits, weights, self.config.rrf_k);
        fused.truncate(self.k);

        if self.cancel.is_cancelled() {
            return None;
        }

        let emit_refined = !self.config.fast_only && self.quality_embedder.is_some();
        if emit_refined {
            self.stage = Stage::Refined {
                canon_query,
                initial_hits: fused.clone(),
            };
        } else {
            self.stage = Stage::Done;
        }

        Some(Ok(SearchResult {
            phase: Phase::Initial,
            hits: fused,
        }))
    }

    fn run_refined(
        &mut self,
        canon_query: String,
        initial_hits: Vec<RankedHit>,
    ) -> Option<Result<SearchResult>> {
        let quality_embedder = self.quality_embedder.clone()?;
        let vector_index = self.vector_index.clone();
        let resolve_text = self.resolve_text.clone();
        let distance = vector_index.distance();
        let candidates = initial_hits.clone();

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let outcome = compute_quality_scores(
                &*quality_embedder,
                &vector_index,
                &resolve_text,
                &canon_query,
                &candidates,
                distance,
            );
            let _ = tx.send(outcome);
        });

        let deadline = Duration::from_millis(self.config.quality_timeout_ms);
        match rx.recv_timeout(deadline) {
            Ok(Ok(scores)) => {
                if self.cancel.is_cancelled() {
                    return None;
                }
                let blended = fusion::blend_quality(&initial_hits, &scores, self.config.quality_weight);
                Some(Ok(SearchResult {
                    phase: Phase::Refined,
                    hits: blended,
                }))
            }
            // Quality-path EmbedderError suppresses REFINED but never fails
            // the call; INITIAL was already delivered.
            Ok(Err(_)) => None,
            // Deadline elapsed; the worker thread is left to finish and its
            // result is dropped when `rx` goes out of scope.
            Err(_) => None,
        }
    }
}

fn compute_quality_scores(
    quality_embedder: &dyn Embedder,
    vector_index: &VectorIndex,
    resolve_text: &TextResolver,
    canon_query: &str,
    candidates: &[RankedHit],
    distance: Distance,
) -> Result<HashMap<String, f32>> {
    let query_vector = quality_embedder.embed(canon_query)?;

    let mut to_embed: Vec<(String, String)> = Vec::new();
    let mut scores = HashMap::with_capacity(candidates.len());

    for candidate in candidates {
        if vector_index.embedder_id() == quality_embedder.model_id() {
            if let Some(existing) = vector_index.vector_for(&candidate.doc_id) {
                scores.insert(candidate.doc_id.clone(), score_against(distance, &query_vector, &existing));
                continue;
            }
        }
        if let Some(text) = resolve_text(&candidate.doc_id) {
            to_embed.push((candidate.doc_id.clone(), text));
        }
    }

    if !to_embed.is_empty() {
        let texts: Vec<String> = to_embed.iter().map(|(_, t)| t.clone()).collect();
        let embedded = quality_embedder.embed_batch(&texts)?;
        for ((doc_id, _), vector) in to_embed.iter().zip(embedded.iter()) {
            scores.insert(doc_id.clone(), score_against(distance, &query_vector, vector));
        }
    }

    Ok(scores)
}

fn score_against(distance: Distance, query: &[f32], candidate: &[f32]) -> f32 {
    match distance {
        Distance::Cosine => cosine_similarity(query, candidate),
        Distance::Dot => query.iter().zip(candidate).map(|(a, b)| a * b).sum(),
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
