//! Thin command surface: `index`, `search`, `info`. Resolves index names to
//! files, wires the hash embedder and the Tantivy lexical backend, and
//! formats output. No orchestrator behavior is duplicated here.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::canonicalize::canonicalize;
use crate::config::TwoTierConfig;
use crate::embedder::{Embedder, HashEmbedder};
use crate::error::{Error, Result};
use crate::lexical::TantivyBackend;
use crate::orchestrator::{CancellationToken, TwoTierOrchestrator};
use crate::types::Phase;
use crate::vector_index::{Distance, VectorIndex};

/// The hash embedder's output width for CLI-built indexes. No model
/// download or hosting is in scope, so this is the only embedder the CLI
/// ever wires up.
const HASH_DIMENSION: usize = 256;

/// `model_id` of the only embedder the CLI ever builds an index with. Known
/// statically, so a load can check it before the index's own dimension is
/// available.
fn hash_embedder_id() -> String {
    format!("fnv1a-{HASH_DIMENSION}")
}

#[derive(Parser, Debug)]
#[command(name = "hsearch", version, about = "Hybrid BM25 + vector search over a document corpus")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read documents from stdin (one per line), build and save an index.
    Index {
        name: String,
    },
    /// Load an index and run a search against it.
    Search {
        name: String,
        query: String,
        #[arg(long, default_value_t = 10)]
        k: usize,
    },
    /// Print an index's metadata.
    Info {
        name: String,
    },
}

/// A document line's canonical text, persisted alongside the vector index
/// so the lexical backend and the REFINED text-resolution callback can be
/// rebuilt on load. The core's own persisted format (`<name>.npz`/`.json`)
/// has no place for raw text, so this is a CLI-only sidecar, not part of
/// the library's on-disk contract.
#[derive(Debug, Serialize, Deserialize)]
struct DocRecord {
    doc_id: String,
    text: String,
}

fn docs_sidecar_path(name: &str) -> PathBuf {
    PathBuf::from(format!("{name}.docs.jsonl"))
}

fn write_docs_sidecar(name: &str, docs: &[(String, String)]) -> Result<()> {
    let mut out = String::new();
    for (doc_id, text) in docs {
        let record = DocRecord {
            doc_id: doc_id.clone(),
            text: text.clone(),
        };
        out.push_str(&serde_json::to_string(&record).map_err(|e| Error::Corrupt(e.to_string()))?);
        out.push('\n');
    }
    fs::write(docs_sidecar_path(name), out)?;
    Ok(())
}

fn read_docs_sidecar(name: &str) -> Result<Vec<(String, String)>> {
    let path = docs_sidecar_path(name);
    if !path.exists() {
        return Err(Error::MissingFile(path));
    }
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let record: DocRecord = serde_json::from_str(line).map_err(|e| Error::Corrupt(e.to_string()))?;
            Ok((record.doc_id, record.text))
        })
        .collect()
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Index { name } => index_command(&name)?,
        Commands::Search { name, query, k } => search_command(&name, &query, k)?,
        Commands::Info { name } => info_command(&name)?,
    }
    Ok(())
}

fn index_command(name: &str) -> Result<()> {
    let stdin = io::stdin();
    let embedder = HashEmbedder::new(HASH_DIMENSION);
    let mut vector_index = VectorIndex::new(HASH_DIMENSION, Distance::Cosine, embedder.model_id().to_string());
    let mut docs: Vec<(String, String)> = Vec::new();

    for (i, line) in stdin.lock().lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let (doc_id, content) = match line.split_once('\t') {
            Some((id, rest)) => (id.to_string(), rest.to_string()),
            None => (format!("doc-{i}"), line),
        };
        let canon = canonicalize(&content);
        let vector = embedder.embed(&canon)?;
        vector_index.add(doc_id.clone(), &vector)?;
        docs.push((doc_id, canon));
    }

    vector_index.save(&PathBuf::from(name))?;
    write_docs_sidecar(name, &docs)?;

    tracing::info!(name, count = vector_index.len(), "index built and saved");
    Ok(())
}

fn require_known_index(name: &str) -> Result<PathBuf> {
    let stem = PathBuf::from(name);
    if !crate::persistence::index_exists(&stem) {
        return Err(Error::UnknownIndex(name.to_string()));
    }
    Ok(stem)
}

fn load_for_search(name: &str) -> Result<(VectorIndex, TantivyBackend, HashMap<String, String>)> {
    let stem = require_known_index(name)?;
    let vector_index = VectorIndex::load_checked(&stem, &hash_embedder_id())?;
    let docs = read_docs_sidecar(name)?;
    let lexical = TantivyBackend::build(&docs)?;
    let texts: HashMap<String, String> = docs.into_iter().collect();
    Ok((vector_index, lexical, texts))
}

fn search_command(name: &str, query: &str, k: usize) -> Result<()> {
    let (vector_index, lexical, texts) = load_for_search(name)?;

    let orchestrator = TwoTierOrchestrator::new(
        Arc::new(vector_index),
        Arc::new(HashEmbedder::new(HASH_DIMENSION)),
        None,
        Some(Arc::new(lexical)),
        TwoTierConfig::from_env(),
        move |doc_id: &str| texts.get(doc_id).cloned(),
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for result in orchestrator.search(query, k, CancellationToken::new()) {
        let result = result?;
        let label = match result.phase {
            Phase::Initial => "INITIAL",
            Phase::Refined => "REFINED",
        };
        writeln!(out, "== {label} ==")?;
        for hit in &result.hits {
            writeln!(out, "{}\t{:.6}", hit.doc_id, hit.rrf_score)?;
        }
    }
    Ok(())
}

fn info_command(name: &str) -> Result<()> {
    let stem = require_known_index(name)?;
    let vector_index = VectorIndex::load(&stem)?;
    println!("dimension: {}", vector_index.dimension());
    println!("count: {}", vector_index.len());
    println!("embedder_id: {}", vector_index.embedder_id());
    println!("distance: {}", vector_index.distance().as_str());
    Ok(())
}
