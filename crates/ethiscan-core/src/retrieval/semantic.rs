//! Persistent vector index.
//!
//! Stored as a single JSON file. A stored index is reused only when its
//! fingerprint (embedder, dimension and passage set) matches the one being
//! built; otherwise passages are re-embedded and the file is replaced.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use super::embedding::{cosine, Embedder};
use super::{Passage, RetrievalError};

const INDEX_FILE: &str = "semantic_index.json";

#[derive(Serialize, Deserialize)]
struct StoredIndex {
    fingerprint: String,
    embedder: String,
    dimension: usize,
    passages: Vec<Passage>,
    vectors: Vec<Vec<f32>>,
}

/// Embedded passages searchable by cosine similarity.
pub struct SemanticIndex {
    passages: Vec<Passage>,
    vectors: Vec<Vec<f32>>,
    embedder: Arc<dyn Embedder>,
    reused: bool,
}

impl std::fmt::Debug for SemanticIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticIndex")
            .field("passages", &self.passages.len())
            .field("embedder", &self.embedder.name())
            .field("reused", &self.reused)
            .finish()
    }
}

impl SemanticIndex {
    /// Build an index, reusing the one persisted under `persist_dir` when it
    /// matches.
    ///
    /// Failing to write the index is logged, not fatal.
    pub fn build(
        passages: Vec<Passage>,
        embedder: Arc<dyn Embedder>,
        persist_dir: Option<&Path>,
    ) -> Result<Self, RetrievalError> {
        if passages.is_empty() {
            return Err(RetrievalError::EmptyCorpus);
        }

        let fingerprint = fingerprint(embedder.as_ref(), &passages);

        if let Some(dir) = persist_dir {
            match load_stored(dir, &fingerprint) {
                Ok(Some(stored)) => {
                    tracing::info!(
                        path = %dir.display(),
                        passages = stored.passages.len(),
                        "Reusing persisted vector index"
                    );
                    return Ok(Self {
                        passages: stored.passages,
                        vectors: stored.vectors,
                        embedder,
                        reused: true,
                    });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Ignoring unreadable vector index"),
            }
        }

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let vectors = embedder.embed(&texts)?;
        if vectors.len() != passages.len() {
            return Err(RetrievalError::Embedding(format!(
                "Expected {} vectors, got {}",
                passages.len(),
                vectors.len()
            )));
        }

        let index = Self {
            passages,
            vectors,
            embedder,
            reused: false,
        };

        if let Some(dir) = persist_dir {
            if let Err(e) = index.save(dir, &fingerprint) {
                tracing::warn!(error = %e, "Vector index kept in memory only");
            }
        }

        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Whether the vectors were loaded from disk.
    pub fn was_reused(&self) -> bool {
        self.reused
    }

    /// Top-k passages by cosine similarity. Ties keep corpus order.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>, RetrievalError> {
        let query_vector = self.embedder.embed_one(query)?;

        let mut ranked: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine(&query_vector, v)))
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        Ok(ranked
            .into_iter()
            .take(k)
            .map(|(i, _)| self.passages[i].clone())
            .collect())
    }

    fn save(&self, dir: &Path, fingerprint: &str) -> Result<(), RetrievalError> {
        std::fs::create_dir_all(dir).map_err(|e| RetrievalError::Persist(e.to_string()))?;

        let stored = StoredIndex {
            fingerprint: fingerprint.to_string(),
            embedder: self.embedder.name().to_string(),
            dimension: self.embedder.dimension(),
            passages: self.passages.clone(),
            vectors: self.vectors.clone(),
        };
        let json =
            serde_json::to_vec(&stored).map_err(|e| RetrievalError::Persist(e.to_string()))?;
        std::fs::write(dir.join(INDEX_FILE), json)
            .map_err(|e| RetrievalError::Persist(e.to_string()))
    }
}

fn load_stored(dir: &Path, fingerprint: &str) -> Result<Option<StoredIndex>, RetrievalError> {
    let path = dir.join(INDEX_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let bytes = std::fs::read(&path).map_err(|e| RetrievalError::Persist(e.to_string()))?;
    let stored: StoredIndex =
        serde_json::from_slice(&bytes).map_err(|e| RetrievalError::Persist(e.to_string()))?;

    if stored.fingerprint != fingerprint || stored.vectors.len() != stored.passages.len() {
        tracing::debug!(path = %path.display(), "Persisted vector index is stale");
        return Ok(None);
    }
    Ok(Some(stored))
}

/// blake3 digest of the embedder identity and every passage, in order.
/// Each variable-length field is length-prefixed.
fn fingerprint(embedder: &dyn Embedder, passages: &[Passage]) -> String {
    fn field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }

    let mut hasher = blake3::Hasher::new();
    field(&mut hasher, embedder.name().as_bytes());
    hasher.update(&(embedder.dimension() as u64).to_le_bytes());
    for passage in passages {
        field(&mut hasher, passage.source_document.as_bytes());
        hasher.update(&(passage.location.page as u64).to_le_bytes());
        hasher.update(&(passage.location.offset as u64).to_le_bytes());
        field(&mut hasher, passage.section_label.as_bytes());
        field(&mut hasher, passage.text.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}
