//! Two-tier search configuration.
//!
//! Mirrors the shape the original two-tier searcher used for its tunables,
//! generalized to the fused lexical+vector engine: weights, RRF constant,
//! candidate fan-out, and the quality-phase deadline. Values are immutable
//! once a search starts; environment overrides are resolved once at the
//! system boundary, never read from inside the core search path.

#[derive(Debug, Clone, PartialEq)]
pub struct TwoTierConfig {
    /// Blend weight given to the quality-tier score in REFINED (default 0.7).
    pub quality_weight: f64,
    /// RRF smoothing constant (default 60.0).
    pub rrf_k: f64,
    /// Candidates fetched per side as a multiple of `k` (default 3).
    pub candidate_multiplier: usize,
    /// Skip the quality phase entirely, emitting only INITIAL.
    pub fast_only: bool,
    /// Deadline for the quality phase in milliseconds (default 500).
    pub quality_timeout_ms: u64,
}

impl Default for TwoTierConfig {
    fn default() -> Self {
        Self {
            quality_weight: 0.7,
            rrf_k: 60.0,
            candidate_multiplier: 3,
            fast_only: false,
            quality_timeout_ms: 500,
        }
    }
}

impl TwoTierConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults (and logging) for any value that is missing or out of range.
    ///
    /// Recognized variables: `HYBRIDSEARCH_QUALITY_WEIGHT`, `HYBRIDSEARCH_RRF_K`,
    /// `HYBRIDSEARCH_CANDIDATE_MULTIPLIER`, `HYBRIDSEARCH_FAST_ONLY`,
    /// `HYBRIDSEARCH_QUALITY_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(val) = dotenvy::var("HYBRIDSEARCH_QUALITY_WEIGHT") {
            match val.parse::<f64>() {
                Ok(w) if (0.0..=1.0).contains(&w) => cfg.quality_weight = w,
                _ => tracing::warn!(
                    value = %val,
                    "HYBRIDSEARCH_QUALITY_WEIGHT out of range [0,1], using default {}",
                    cfg.quality_weight
                ),
            }
        }

        if let Ok(val) = dotenvy::var("HYBRIDSEARCH_RRF_K") {
            match val.parse::<f64>() {
                Ok(k) if k > 0.0 => cfg.rrf_k = k,
                _ => tracing::warn!(
                    value = %val,
                    "HYBRIDSEARCH_RRF_K must be > 0, using default {}",
                    cfg.rrf_k
                ),
            }
        }

        if let Ok(val) = dotenvy::var("HYBRIDSEARCH_CANDIDATE_MULTIPLIER") {
            match val.parse::<usize>() {
                Ok(m) if m >= 1 => cfg.candidate_multiplier = m,
                _ => tracing::warn!(
                    value = %val,
                    "HYBRIDSEARCH_CANDIDATE_MULTIPLIER must be >= 1, using default {}",
                    cfg.candidate_multiplier
                ),
            }
        }

        if let Ok(val) = dotenvy::var("HYBRIDSEARCH_FAST_ONLY") {
            cfg.fast_only = val != "0" && val.to_lowercase() != "false";
        }

        if let Ok(val) = dotenvy::var("HYBRIDSEARCH_QUALITY_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) => cfg.quality_timeout_ms = ms,
                _ => tracing::warn!(
                    value = %val,
                    "HYBRIDSEARCH_QUALITY_TIMEOUT_MS must be a non-negative integer, using default {}",
                    cfg.quality_timeout_ms
                ),
            }
        }

        cfg
    }

    /// Configuration variant that skips the quality phase entirely.
    pub fn fast_only() -> Self {
        Self {
            fast_only: true,
            ..Self::default()
        }
    }
}
