//! Exact top-k dense vector index: an append-only f16 matrix keyed by
//! document id, with cosine or dot scoring.

use std::collections::HashMap;

use half::f16;
use wide::f32x8;

use crate::error::{Error, Result};
use crate::types::Hit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Distance {
    Cosine,
    Dot,
}

impl Distance {
    pub fn as_str(self) -> &'static str {
        match self {
            Distance::Cosine => "cosine",
            Distance::Dot => "dot",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "cosine" => Some(Distance::Cosine),
            "dot" => Some(Distance::Dot),
            _ => None,
        }
    }
}

/// An append-only `(count, dimension)` matrix of f16 vectors, keyed by
/// document id. Mutations are serialized by the caller; reads (searches) may
/// run concurrently with each other.
pub struct VectorIndex {
    dimension: usize,
    distance: Distance,
    embedder_id: String,
    doc_ids: Vec<String>,
    row_of: HashMap<String, usize>,
    // Row-major, `doc_ids.len() * dimension` f16 values.
    rows: Vec<f16>,
}

impl VectorIndex {
    pub fn new(dimension: usize, distance: Distance, embedder_id: impl Into<String>) -> Self {
        Self {
            dimension,
            distance,
            embedder_id: embedder_id.into(),
            doc_ids: Vec::new(),
            row_of: HashMap::new(),
            rows: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn distance(&self) -> Distance {
        self.distance
    }

    pub fn embedder_id(&self) -> &str {
        &self.embedder_id
    }

    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    pub fn doc_ids(&self) -> &[String] {
        &self.doc_ids
    }

    /// Append a vector for `doc_id`. Fails (with no state mutated) if the id
    /// is already present or the vector's length disagrees with `dimension`.
    pub fn add(&mut self, doc_id: impl Into<String>, vector: &[f32]) -> Result<()> {
        let doc_id = doc_id.into();
        if self.row_of.contains_key(&doc_id) {
            return Err(Error::DuplicateId(doc_id));
        }
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }

        let stored = match self.distance {
            Distance::Cosine => normalize(vector),
            Distance::Dot => vector.to_vec(),
        };

        let row = self.doc_ids.len();
        self.rows.extend(stored.iter().map(|&x| f16::from_f32(x)));
        self.row_of.insert(doc_id.clone(), row);
        self.doc_ids.push(doc_id);
        Ok(())
    }

    /// Exact top-k by score, descending, ties broken by ascending insertion
    /// order (row index). Runs in O(count * dimension).
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let prepared_query = match self.distance {
            Distance::Cosine => normalize(query),
            Distance::Dot => query.to_vec(),
        };

        let mut scored: Vec<(usize, f32)> = (0..self.doc_ids.len())
            .map(|row| (row, dot(&prepared_query, self.row_f32(row).as_slice())))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k.min(scored.len()));

        Ok(scored
            .into_iter()
            .map(|(row, score)| Hit {
                doc_id: self.doc_ids[row].clone(),
                score,
            })
            .collect())
    }

    /// The stored (f32-dequantized) vector for `doc_id`, if present. Used by
    /// the orchestrator to decide whether a candidate's existing vector can
    /// be reused for the quality phase (same `embedder_id`) instead of
    /// re-embedding its text.
    pub fn vector_for(&self, doc_id: &str) -> Option<Vec<f32>> {
        self.row_of.get(doc_id).map(|&row| self.row_f32(row))
    }

    fn row_f32(&self, row: usize) -> Vec<f32> {
        let start = row * self.dimension;
        self.rows[start..start + self.dimension]
            .iter()
            .map(|v| v.to_f32())
            .collect()
    }

    pub(crate) fn raw_rows(&self) -> &[f16] {
        &self.rows
    }

    pub(crate) fn from_parts(
        dimension: usize,
        distance: Distance,
        embedder_id: String,
        doc_ids: Vec<String>,
        rows: Vec<f16>,
    ) -> Result<Self> {
        if rows.len() != doc_ids.len() * dimension {
            return Err(Error::ShapeMismatch(format!(
                "expected {} f16 values for {} docs of dimension {dimension}, got {}",
                doc_ids.len() * dimension,
                doc_ids.len(),
                rows.len()
            )));
        }
        let row_of = doc_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        Ok(Self {
            dimension,
            distance,
            embedder_id,
            doc_ids,
            row_of,
            rows,
        })
    }

    pub fn save(&self, path_stem: &std::path::Path) -> Result<()> {
        crate::persistence::save_index(path_stem, self)
    }

    pub fn load(path_stem: &std::path::Path) -> Result<Self> {
        crate::persistence::load_index(path_stem, None)
    }

    /// Load a persisted index, failing with `Error::EmbedderMismatch` if it
    /// was built with a different embedder than `expected_embedder_id`.
    pub fn load_checked(path_stem: &std::path::Path, expected_embedder_id: &str) -> Result<Self> {
        crate::persistence::load_index(path_stem, Some(expected_embedder_id))
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        v.to_vec()
    } else {
        v.iter().map(|x| x / norm).collect()
    }
}

/// Dot product over 8-wide SIMD lanes with a scalar tail for the remainder.
fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let lanes = a.len() / 8;
    let mut acc = f32x8::splat(0.0);
    for i in 0..lanes {
        let av: [f32; 8] = a[i * 8..i * 8 + 8].try_into().unwrap();
        let bv: [f32; 8] = b[i * 8..i * 8 + 8].try_into().unwrap();
        acc += f32x8::from(av) * f32x8::from(bv);
    }
    let mut total: f32 = acc.reduce_add();
    for i in lanes * 8..a.len() {
        total += a[i] * b[i];
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_duplicate_id() {
        let mut idx = VectorIndex::new(2, Distance::Cosine, "fnv1a-2");
        idx.add("a", &[1.0, 0.0]).unwrap();
        let err = idx.add("a", &[0.0, 1.0]).unwrap_err();
        assert!(matches!(err, Error::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn add_rejects_dimension_mismatch() {
        let mut idx = VectorIndex::new(3, Distance::Cosine, "fnv1a-3");
        let err = idx.add("a", &[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, got: 2 }));
    }

    #[test]
    fn search_rejects_dimension_mismatch() {
        let mut idx = VectorIndex::new(3, Distance::Cosine, "fnv1a-3");
        idx.add("a", &[1.0, 0.0, 0.0]).unwrap();
        let err = idx.search(&[1.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, got: 2 }));
    }

    #[test]
    fn exact_top_k_cosine() {
        let mut idx = VectorIndex::new(2, Distance::Cosine, "fnv1a-2");
        idx.add("a", &[1.0, 0.0]).unwrap();
        idx.add("b", &[0.0, 1.0]).unwrap();
        idx.add("c", &[0.9, 0.1]).unwrap();
        let hits = idx.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc_id, "a");
        assert_eq!(hits[1].doc_id, "c");
    }

    #[test]
    fn ties_broken_by_insertion_order() {
        let mut idx = VectorIndex::new(2, Distance::Dot, "fnv1a-2");
        idx.add("first", &[1.0, 0.0]).unwrap();
        idx.add("second", &[1.0, 0.0]).unwrap();
        let hits = idx.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].doc_id, "first");
        assert_eq!(hits[1].doc_id, "second");
    }

    #[test]
    fn k_larger_than_count_returns_all() {
        let mut idx = VectorIndex::new(1, Distance::Dot, "fnv1a-1");
        idx.add("only", &[5.0]).unwrap();
        let hits = idx.search(&[1.0], 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn zero_vector_is_stored_and_scores_zero() {
        let mut idx = VectorIndex::new(2, Distance::Cosine, "fnv1a-2");
        idx.add("zero", &[0.0, 0.0]).unwrap();
        idx.add("unit", &[1.0, 0.0]).unwrap();
        let hits = idx.search(&[1.0, 0.0], 2).unwrap();
        let zero_hit = hits.iter().find(|h| h.doc_id == "zero").unwrap();
        assert_eq!(zero_hit.score, 0.0);
    }

    #[test]
    fn vector_for_returns_dequantized_row() {
        let mut idx = VectorIndex::new(2, Distance::Dot, "fnv1a-2");
        idx.add("a", &[3.0, 4.0]).unwrap();
        let v = idx.vector_for("a").unwrap();
        assert!((v[0] - 3.0).abs() < 1e-2);
        assert!((v[1] - 4.0).abs() < 1e-2);
        assert!(idx.vector_for("missing").is_none());
    }

    #[test]
    fn dot_product_matches_naive_for_non_multiple_of_eight() {
        let a: Vec<f32> = (0..11).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..11).map(|i| (i as f32) * 0.5).collect();
        let naive: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!((dot(&a, &b) - naive).abs() < 1e-3);
    }
}
