//! Reciprocal Rank Fusion and the two-tier score blend.
//!
//! Both produce a deterministic total order over candidates via the same
//! four-level tie-break cascade: higher combined score, `in_both` over
//! `in_one`, higher lexical raw score, then lexicographically smaller
//! `doc_id`.

use std::collections::HashMap;

use crate::types::{Hit, RankedHit};

/// Per-side weights chosen by query class (see [`crate::classify`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub lexical: f64,
    pub semantic: f64,
}

/// Fuse a lexical and a vector ranked list by Reciprocal Rank Fusion.
/// Both inputs are expected already truncated to `k * candidate_multiplier`
/// by the caller. The result is unranked-until-sorted by this function;
/// the caller truncates to `k` afterward.
pub fn rrf_fuse(lexical: &[Hit], vector: &[Hit], weights: FusionWeights, rrf_k: f64) -> Vec<RankedHit> {
    let mut table: HashMap<String, RankedHit> = HashMap::new();

    for (i, hit) in lexical.iter().enumerate() {
        let rank = (i + 1) as f64;
        let entry = table.entry(hit.doc_id.clone()).or_insert_with(|| blank(&hit.doc_id));
        entry.rrf_score += weights.lexical / (rrf_k + rank);
        entry.lexical_score = Some(hit.score);
    }

    for (i, hit) in vector.iter().enumerate() {
        let rank = (i + 1) as f64;
        let entry = table.entry(hit.doc_id.clone()).or_insert_with(|| blank(&hit.doc_id));
        entry.rrf_score += weights.semantic / (rrf_k + rank);
        entry.vector_score = Some(hit.score);
    }

    let mut hits: Vec<RankedHit> = table
        .into_values()
        .map(|mut h| {
            h.in_both = h.lexical_score.is_some() && h.vector_score.is_some();
            h
        })
        .collect();

    tie_break_sort(&mut hits);
    hits
}

/// Re-score the INITIAL top-k by blending normalized quality scores with
/// normalized fast vector scores, then re-apply the same tie-break cascade.
/// `quality_scores` maps `doc_id -> quality-embedder cosine/dot score`;
/// candidates absent from it (should not normally happen) are treated as 0.
pub fn blend_quality(
    initial_top_k: &[RankedHit],
    quality_scores: &HashMap<String, f32>,
    quality_weight: f64,
) -> Vec<RankedHit> {
    let fast: Vec<f32> = initial_top_k.iter().map(|c| c.vector_score.unwrap_or(0.0)).collect();
    let quality: Vec<f32> = initial_top_k
        .iter()
        .map(|c| *quality_scores.get(&c.doc_id).unwrap_or(&0.0))
        .collect();

    let norm_fast = min_max_normalize(&fast);
    let norm_quality = min_max_normalize(&quality);

    let mut blended: Vec<RankedHit> = initial_top_k
        .iter()
        .zip(norm_fast.iter().zip(norm_quality.iter()))
        .map(|(c, (&nf, &nq))| RankedHit {
            doc_id: c.doc_id.clone(),
            rrf_score: quality_weight * nq as f64 + (1.0 - quality_weight) * nf as f64,
            lexical_score: c.lexical_score,
            vector_score: c.vector_score,
            in_both: c.in_both,
        })
        .collect();

    tie_break_sort(&mut blended);
    blended
}

/// Min-max normalization across a candidate set. A constant (or empty) set
/// maps every value to 0.5 — ill-defined spread carries no ranking signal.
fn min_max_normalize(values: &[f32]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if (max - min).abs() < f32::EPSILON {
        return vec![0.5; values.len()];
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}

fn blank(doc_id: &str) -> RankedHit {
    RankedHit {
        doc_id: doc_id.to_string(),
        rrf_score: 0.0,
        lexical_score: None,
        vector_score: None,
        in_both: false,
    }
}

fn tie_break_sort(hits: &mut [RankedHit]) {
    hits.sort_by(|a, b| {
        b.rrf_score
            .total_cmp(&a.rrf_score)
            .then_with(|| b.in_both.cmp(&a.in_both))
            .then_with(|| {
                let al = a.lexical_score.unwrap_or(0.0);
                let bl = b.lexical_score.unwrap_or(0.0);
                bl.total_cmp(&al)
            })
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
}
