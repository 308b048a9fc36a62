//! Text embedding.
//!
//! The semantic index embeds with all-MiniLM-L6-v2 (384 dimensions) when the
//! crate is built with the `fastembed` feature. [`HashingEmbedder`] is the
//! fallback for builds without it and for hosts where the model cannot be
//! loaded.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::RetrievalError;

/// Maps text to dense vectors.
pub trait Embedder: Send + Sync {
    /// Stable name, recorded in persisted indexes.
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;

    fn embed_one(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        self.embed(&[text.to_string()])?
            .pop()
            .ok_or_else(|| RetrievalError::Embedding("Embedder returned no vector".to_string()))
    }
}

/// Which embedder the semantic index uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingModel {
    /// Sentence-transformers all-MiniLM-L6-v2
    #[default]
    #[serde(rename = "all-MiniLM-L6-v2")]
    AllMiniLmL6V2,
    /// Feature hashing; no model files
    #[serde(rename = "hashing")]
    Hashing,
}

impl EmbeddingModel {
    pub fn dimension(&self) -> usize {
        MINILM_DIMENSION
    }
}

impl fmt::Display for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingModel::AllMiniLmL6V2 => write!(f, "all-MiniLM-L6-v2"),
            EmbeddingModel::Hashing => write!(f, "hashing"),
        }
    }
}

/// Output size of all-MiniLM-L6-v2; the hashing fallback matches it.
pub const MINILM_DIMENSION: usize = 384;

/// Load the configured embedder, falling back to [`HashingEmbedder`] when
/// the model is unavailable.
pub fn load_embedder(model: EmbeddingModel, cache_dir: Option<&Path>) -> Arc<dyn Embedder> {
    match model {
        EmbeddingModel::Hashing => Arc::new(HashingEmbedder::new(model.dimension())),
        EmbeddingModel::AllMiniLmL6V2 => load_minilm(cache_dir),
    }
}

#[cfg(feature = "fastembed")]
fn load_minilm(cache_dir: Option<&Path>) -> Arc<dyn Embedder> {
    match MiniLmEmbedder::load(cache_dir) {
        Ok(embedder) => {
            tracing::info!(model = %embedder.name(), "Embedding model loaded");
            Arc::new(embedder)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Embedding model unavailable; using hashing embedder");
            Arc::new(HashingEmbedder::new(MINILM_DIMENSION))
        }
    }
}

#[cfg(not(feature = "fastembed"))]
fn load_minilm(_cache_dir: Option<&Path>) -> Arc<dyn Embedder> {
    tracing::warn!("Built without the `fastembed` feature; using hashing embedder");
    Arc::new(HashingEmbedder::new(MINILM_DIMENSION))
}

#[cfg(feature = "fastembed")]
pub use minilm::MiniLmEmbedder;

#[cfg(feature = "fastembed")]
mod minilm {
    use std::path::Path;
    use std::sync::Mutex;

    use fastembed::{EmbeddingModel as FastModel, InitOptions, TextEmbedding};

    use super::{Embedder, RetrievalError, MINILM_DIMENSION};

    /// all-MiniLM-L6-v2 through ONNX Runtime.
    ///
    /// The model is fetched into `cache_dir` on first use.
    pub struct MiniLmEmbedder {
        // `embed` needs exclusive access to the ONNX session
        model: Mutex<TextEmbedding>,
    }

    impl MiniLmEmbedder {
        pub fn load(cache_dir: Option<&Path>) -> Result<Self, RetrievalError> {
            let mut options =
                InitOptions::new(FastModel::AllMiniLML6V2).with_show_download_progress(false);
            if let Some(dir) = cache_dir {
                options = options.with_cache_dir(dir.to_path_buf());
            }

            let model = TextEmbedding::try_new(options)
                .map_err(|e| RetrievalError::Embedding(format!("loading all-MiniLM-L6-v2: {e}")))?;
            Ok(Self {
                model: Mutex::new(model),
            })
        }
    }

    impl Embedder for MiniLmEmbedder {
        fn name(&self) -> &str {
            "all-MiniLM-L6-v2"
        }

        fn dimension(&self) -> usize {
            MINILM_DIMENSION
        }

        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            let mut model = self
                .model
                .lock()
                .map_err(|e| RetrievalError::Embedding(format!("model lock poisoned: {e}")))?;
            model
                .embed(texts.to_vec(), None)
                .map_err(|e| RetrievalError::Embedding(e.to_string()))
        }
    }

    impl std::fmt::Debug for MiniLmEmbedder {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("MiniLmEmbedder(all-MiniLM-L6-v2)")
        }
    }
}

/// Deterministic feature-hashing embedder.
///
/// Hashes word tokens and character trigrams into signed buckets, then
/// L2-normalizes. It only captures surface overlap, so it stands in for a
/// real model rather than replacing one.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    name: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            name: format!("hashing-{}", dimension),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let words = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase);
        for word in words {
            self.add_feature(&mut vector, &word, 1.0);

            let chars: Vec<char> = word.chars().collect();
            if chars.len() > 3 {
                for window in chars.windows(3) {
                    let trigram: String = window.iter().collect();
                    self.add_feature(&mut vector, &trigram, 0.5);
                }
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = blake3::hash(feature.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        let hash = u64::from_le_bytes(head);

        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(MINILM_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

/// Cosine similarity. Zero for mismatched or zero vectors.
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
