//! Error taxonomy for the hybrid retrieval core.
//!
//! Errors are split along the propagation policy in the design doc: validation
//! and compatibility failures are synchronous and fail the enclosing call;
//! embedder failures on the quality path are swallowed by the orchestrator
//! rather than surfaced here (see [`crate::orchestrator`]).

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("duplicate document id: {0}")]
    DuplicateId(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("unknown index: {0}")]
    UnknownIndex(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing persisted index file: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("unsupported index format version: {0}")]
    VersionMismatch(u32),

    #[error("persisted index shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("embedder mismatch: index was built with {expected}, got {got}")]
    EmbedderMismatch { expected: String, got: String },

    #[error("corrupt persisted index: {0}")]
    Corrupt(String),

    #[error("embedder failed to produce a vector: {0}")]
    Embedder(String),

    #[error("lexical backend failed: {0}")]
    Lexical(String),
}

pub type Result<T> = std::result::Result<T, Error>;
