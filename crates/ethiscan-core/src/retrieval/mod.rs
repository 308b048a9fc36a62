//! Hybrid lexical + semantic retrieval over a fixed document corpus.
//!
//! - `corpus`: document discovery and page extraction (PDF and text)
//! - `chunker`: recursive, overlapping text windows
//! - `lexical`: BM25 keyword index on tantivy
//! - `embedding` / `semantic`: sentence embeddings and persistent vector index
//! - `fusion`: weighted reciprocal rank fusion
//! - `hybrid`: the retriever and its factory
//!
//! Indexes are built once per corpus before a run and are read-only while
//! the pipeline executes.

mod chunker;
mod corpus;
mod embedding;
mod fusion;
mod hybrid;
mod lexical;
mod semantic;

pub use chunker::TextSplitter;
pub use corpus::{
    discover_documents, infer_section_label, CorpusProvider, FileCorpusProvider, InMemoryCorpus,
    PageText, PdfCorpusProvider, TextCorpusProvider, NO_SECTION,
};
#[cfg(feature = "fastembed")]
pub use embedding::MiniLmEmbedder;
pub use embedding::{load_embedder, Embedder, EmbeddingModel, HashingEmbedder, MINILM_DIMENSION};
pub use fusion::{weighted_rrf, RankedList};
pub use hybrid::{HybridRetriever, IndexStats, RetrieverFactory, RetrieverMode};
pub use lexical::Bm25Index;
pub use semantic::SemanticIndex;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from index construction and lookup.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Failed to read document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to extract text from PDF {path}: {message}")]
    Pdf { path: PathBuf, message: String },

    #[error("Lexical index failed: {0}")]
    Lexical(#[from] tantivy::TantivyError),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Corpus has no indexable text")]
    EmptyCorpus,

    #[error("Vector index persistence failed: {0}")]
    Persist(String),

    #[error("Invalid corpus pattern: {0}")]
    Pattern(String),
}

/// Where a passage came from inside its document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Zero-based page index
    pub page: usize,
    /// Byte offset of the passage within the page text
    pub offset: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {}, offset {}", self.page, self.offset)
    }
}

/// A retrieved text fragment with source attribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source_document: String,
    pub location: Location,
    pub section_label: String,
}

impl Passage {
    /// Identity used for deduplication across sub-retrievers.
    pub fn identity(&self) -> (&str, &str) {
        (&self.source_document, &self.text)
    }
}

/// Anything that can answer "top-k passages for this query".
///
/// Lookups never fail from the caller's point of view: internal errors are
/// logged and produce an empty result.
pub trait PassageRetriever: Send + Sync {
    fn retrieve(&self, query: &str, k: usize) -> Vec<Passage>;

    fn mode(&self) -> RetrieverMode;
}

/// Retriever construction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub lexical_chunk_size: usize,
    pub lexical_chunk_overlap: usize,
    pub semantic_chunk_size: usize,
    pub semantic_chunk_overlap: usize,

    /// Fusion weight of the semantic list
    pub semantic_weight: f64,
    /// Fusion weight of the lexical list
    pub lexical_weight: f64,
    /// Reciprocal rank smoothing constant
    pub rrf_constant: f64,

    pub default_k: usize,

    /// Where semantic indexes are persisted; `None` keeps them in memory
    pub persist_dir: Option<PathBuf>,

    /// Embedder for the semantic index. Its output size sets the index
    /// dimension.
    pub embedding_model: EmbeddingModel,

    /// Download cache for model files; fastembed's default when unset
    pub model_cache_dir: Option<PathBuf>,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            lexical_chunk_size: 500,
            lexical_chunk_overlap: 100,
            semantic_chunk_size: 250,
            semantic_chunk_overlap: 50,
            semantic_weight: 0.6,
            lexical_weight: 0.4,
            rrf_constant: 60.0,
            default_k: 3,
            persist_dir: Some(PathBuf::from("./vectorstore")),
            embedding_model: EmbeddingModel::default(),
            model_cache_dir: None,
        }
    }
}
