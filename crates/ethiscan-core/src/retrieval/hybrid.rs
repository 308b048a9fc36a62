//! Hybrid retriever and its factory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::chunker::TextSplitter;
use super::corpus::{CorpusProvider, FileCorpusProvider, PageText};
use super::embedding::{load_embedder, Embedder};
use super::fusion::{weighted_rrf, RankedList};
use super::lexical::Bm25Index;
use super::semantic::SemanticIndex;
use super::{Location, Passage, PassageRetriever, RetrieverConfig};

/// Which sub-retrievers are serving queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieverMode {
    Hybrid,
    LexicalOnly,
    SemanticOnly,
}

impl RetrieverMode {
    /// True when one of the two sub-retrievers could not be built.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, RetrieverMode::Hybrid)
    }
}

impl fmt::Display for RetrieverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrieverMode::Hybrid => write!(f, "hybrid"),
            RetrieverMode::LexicalOnly => write!(f, "lexical-only"),
            RetrieverMode::SemanticOnly => write!(f, "semantic-only"),
        }
    }
}

/// Lexical and semantic retrieval fused with weighted RRF.
#[derive(Debug)]
pub struct HybridRetriever {
    lexical: Option<Bm25Index>,
    semantic: Option<SemanticIndex>,
    lexical_weight: f64,
    semantic_weight: f64,
    rrf_constant: f64,
    default_k: usize,
}

impl HybridRetriever {
    /// Assemble a retriever from prebuilt indexes. `None` when neither exists.
    pub fn from_parts(
        lexical: Option<Bm25Index>,
        semantic: Option<SemanticIndex>,
        config: &RetrieverConfig,
    ) -> Option<Self> {
        if lexical.is_none() && semantic.is_none() {
            return None;
        }
        Some(Self {
            lexical,
            semantic,
            lexical_weight: config.lexical_weight,
            semantic_weight: config.semantic_weight,
            rrf_constant: config.rrf_constant,
            default_k: config.default_k,
        })
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Passage counts per index, and whether the semantic index was reloaded.
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            lexical_passages: self.lexical.as_ref().map_or(0, Bm25Index::len),
            semantic_passages: self.semantic.as_ref().map_or(0, SemanticIndex::len),
            semantic_reused: self
                .semantic
                .as_ref()
                .map_or(false, SemanticIndex::was_reused),
        }
    }
}

/// Size summary of a built retriever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub lexical_passages: usize,
    pub semantic_passages: usize,
    pub semantic_reused: bool,
}

impl PassageRetriever for HybridRetriever {
    fn retrieve(&self, query: &str, k: usize) -> Vec<Passage> {
        if k == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        let mut lists = Vec::with_capacity(2);

        // A failed lookup drops that list; the query is answered from the other.
        if let Some(semantic) = &self.semantic {
            match semantic.search(query, k) {
                Ok(passages) => lists.push(RankedList {
                    weight: self.semantic_weight,
                    passages,
                }),
                Err(e) => tracing::warn!(
                    error = %e,
                    query = %query,
                    "Semantic lookup failed; using lexical ranking only"
                ),
            }
        }

        if let Some(lexical) = &self.lexical {
            match lexical.search(query, k) {
                Ok(passages) => lists.push(RankedList {
                    weight: self.lexical_weight,
                    passages,
                }),
                Err(e) => tracing::warn!(
                    error = %e,
                    query = %query,
                    "Lexical lookup failed; using semantic ranking only"
                ),
            }
        }

        weighted_rrf(&lists, self.rrf_constant, k)
    }

    fn mode(&self) -> RetrieverMode {
        match (&self.lexical, &self.semantic) {
            (Some(_), Some(_)) => RetrieverMode::Hybrid,
            (Some(_), None) => RetrieverMode::LexicalOnly,
            _ => RetrieverMode::SemanticOnly,
        }
    }
}

/// Builds a [`HybridRetriever`] for a document corpus.
pub struct RetrieverFactory {
    provider: Arc<dyn CorpusProvider>,
    embedder: Arc<dyn Embedder>,
    config: RetrieverConfig,
}

impl RetrieverFactory {
    /// Factory reading PDF and text files, embedding with the configured
    /// model.
    pub fn new(config: RetrieverConfig) -> Self {
        let embedder = load_embedder(config.embedding_model, config.model_cache_dir.as_deref());
        Self {
            provider: Arc::new(FileCorpusProvider::new()),
            embedder,
            config,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn CorpusProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Build a retriever, or `None` when no index could be built.
    ///
    /// Unreadable documents are skipped. If only one index builds the
    /// retriever runs degraded on it. Every reason for `None` or
    /// degradation is logged.
    pub fn build(&self, corpus_id: &str, documents: &[PathBuf]) -> Option<HybridRetriever> {
        if documents.is_empty() {
            tracing::info!(corpus = %corpus_id, "No documents supplied; retrieval disabled");
            return None;
        }

        let pages = self.load_pages(documents);
        if pages.is_empty() {
            tracing::warn!(corpus = %corpus_id, "No readable document text; retrieval disabled");
            return None;
        }

        let lexical_passages = chunk_pages(
            &pages,
            &TextSplitter::new(self.config.lexical_chunk_size, self.config.lexical_chunk_overlap),
        );
        let semantic_passages = chunk_pages(
            &pages,
            &TextSplitter::new(self.config.semantic_chunk_size, self.config.semantic_chunk_overlap),
        );

        let lexical = if lexical_passages.is_empty() {
            tracing::warn!(corpus = %corpus_id, "Lexical index has no passages");
            None
        } else {
            match Bm25Index::new(lexical_passages) {
                Ok(index) => Some(index),
                Err(e) => {
                    tracing::warn!(corpus = %corpus_id, error = %e, "Lexical index unavailable");
                    None
                }
            }
        };

        let persist_dir = self
            .config
            .persist_dir
            .as_ref()
            .map(|dir| dir.join(sanitize_corpus_id(corpus_id)));

        let semantic = match SemanticIndex::build(
            semantic_passages,
            self.embedder.clone(),
            persist_dir.as_deref(),
        ) {
            Ok(index) => Some(index),
            Err(e) => {
                tracing::warn!(corpus = %corpus_id, error = %e, "Semantic index unavailable");
                None
            }
        };

        let retriever = HybridRetriever::from_parts(lexical, semantic, &self.config);
        match &retriever {
            Some(r) => tracing::info!(
                corpus = %corpus_id,
                documents = documents.len(),
                mode = %r.mode(),
                "Retriever ready"
            ),
            None => tracing::warn!(corpus = %corpus_id, "No index could be built; retrieval disabled"),
        }
        retriever
    }

    /// The first `limit` semantic-size chunks of the corpus, with attribution.
    pub fn preview(&self, documents: &[PathBuf], limit: usize) -> Vec<Passage> {
        let pages = self.load_pages(documents);
        let splitter =
            TextSplitter::new(self.config.semantic_chunk_size, self.config.semantic_chunk_overlap);
        let mut passages = chunk_pages(&pages, &splitter);
        passages.truncate(limit);
        passages
    }

    fn load_pages(&self, documents: &[PathBuf]) -> Vec<(String, PageText)> {
        let mut pages = Vec::new();
        for document in documents {
            match self.provider.load(document) {
                Ok(loaded) => {
                    let source = source_name(document);
                    tracing::debug!(document = %source, pages = loaded.len(), "Loaded document");
                    pages.extend(loaded.into_iter().map(|page| (source.clone(), page)));
                }
                Err(e) => {
                    tracing::warn!(document = %document.display(), error = %e, "Skipping document");
                }
            }
        }
        pages
    }
}

fn source_name(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Split pages into attributed passages.
fn chunk_pages(pages: &[(String, PageText)], splitter: &TextSplitter) -> Vec<Passage> {
    let mut passages = Vec::new();

    for (source, page) in pages {
        let mut cursor = 0usize;
        for chunk in splitter.split(&page.text) {
            let offset = page.text[cursor..]
                .find(&chunk)
                .map(|pos| cursor + pos)
                .or_else(|| page.text.find(&chunk))
                .unwrap_or(0);

            cursor = page.text[offset..]
                .chars()
                .next()
                .map(|c| offset + c.len_utf8())
                .unwrap_or(offset);

            passages.push(Passage {
                text: chunk,
                source_document: source.clone(),
                location: Location {
                    page: page.page,
                    offset,
                },
                section_label: page.section_label.clone(),
            });
        }
    }

    passages
}

fn sanitize_corpus_id(corpus_id: &str) -> String {
    let cleaned: String = corpus_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}
