//! Retriever behaviour across index failures and repeated builds.

use std::path::PathBuf;
use std::sync::Arc;

use ethiscan_core::retrieval::{
    weighted_rrf, Embedder, EmbeddingModel, InMemoryCorpus, Passage, PassageRetriever, RankedList,
    RetrievalError, RetrieverConfig, RetrieverFactory, RetrieverMode, TextSplitter,
};
use proptest::prelude::*;

const PRIVACY_POLICY: &str = "Privacy Policy
Daglo collects voice recordings, transcripts and account email addresses.

Recordings are retained for three years after the last login. Users may request deletion at any time through the settings page.
\x0c
Third Parties
Transcripts may be shared with cloud processing partners located outside Korea. Partners are bound by confidentiality agreements.";

const TERMS: &str = "Terms of Service
The company may change these terms without notice. Continued use constitutes acceptance.

The company is not liable for any damages arising from transcription errors, including lost business.";

/// An embedder that cannot produce vectors.
struct BrokenEmbedder;

impl Embedder for BrokenEmbedder {
    fn name(&self) -> &str {
        "broken"
    }

    fn dimension(&self) -> usize {
        8
    }

    fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Err(RetrievalError::Embedding("model weights missing".to_string()))
    }
}

fn corpus() -> InMemoryCorpus {
    InMemoryCorpus::new()
        .with_document("privacy.txt", PRIVACY_POLICY)
        .with_document("terms.txt", TERMS)
}

fn documents() -> Vec<PathBuf> {
    vec![PathBuf::from("privacy.txt"), PathBuf::from("terms.txt")]
}

fn config() -> RetrieverConfig {
    RetrieverConfig {
        persist_dir: None,
        embedding_model: EmbeddingModel::Hashing,
        ..Default::default()
    }
}

#[test]
fn test_lexical_only_when_semantic_index_fails() {
    let factory = RetrieverFactory::new(config())
        .with_provider(Arc::new(corpus()))
        .with_embedder(Arc::new(BrokenEmbedder));

    let retriever = factory.build("daglo", &documents()).expect("lexical index builds");
    assert_eq!(retriever.mode(), RetrieverMode::LexicalOnly);
    assert!(retriever.mode().is_degraded());

    let results = retriever.retrieve("recordings retained deletion", 3);
    assert!(!results.is_empty());
    assert_eq!(results[0].source_document, "privacy.txt");
    assert!(results[0].text.contains("retained"));
}

#[test]
fn test_hybrid_results_are_deterministic() {
    let build = || {
        RetrieverFactory::new(config())
            .with_provider(Arc::new(corpus()))
            .build("daglo", &documents())
            .unwrap()
    };

    let first = build();
    let second = build();
    assert_eq!(first.mode(), RetrieverMode::Hybrid);

    for query in [
        "sharing of user data with third parties",
        "liability for damages",
        "데이터 보관 기간",
    ] {
        let a = first.retrieve(query, 3);
        let b = second.retrieve(query, 3);
        assert_eq!(a, b, "query {:?} differs between builds", query);
        assert_eq!(a, first.retrieve(query, 3));
    }
}

#[test]
fn test_passages_carry_attribution() {
    let retriever = RetrieverFactory::new(config())
        .with_provider(Arc::new(corpus()))
        .build("daglo", &documents())
        .unwrap();

    let results = retriever.retrieve("cloud processing partners outside Korea", 3);
    let partner = results
        .iter()
        .find(|p| p.text.contains("cloud processing partners"))
        .expect("partner clause retrieved");

    assert_eq!(partner.source_document, "privacy.txt");
    assert_eq!(partner.location.page, 1);
    assert_eq!(partner.section_label, "Third Parties");
}

#[test]
fn test_persisted_corpus_reloads_identically() {
    let dir = tempfile::tempdir().unwrap();
    let config = RetrieverConfig {
        persist_dir: Some(dir.path().to_path_buf()),
        embedding_model: EmbeddingModel::Hashing,
        ..Default::default()
    };

    let build = || {
        RetrieverFactory::new(config.clone())
            .with_provider(Arc::new(corpus()))
            .build("https://daglo.ai", &documents())
            .unwrap()
    };

    let fresh = build().retrieve("voice recordings", 3);
    assert!(dir.path().join("https___daglo_ai").exists());
    let reloaded = build().retrieve("voice recordings", 3);
    assert_eq!(fresh, reloaded);
}

fn passage(text: String) -> Passage {
    Passage {
        text,
        source_document: "p.txt".to_string(),
        location: Default::default(),
        section_label: "N/A".to_string(),
    }
}

proptest! {
    #[test]
    fn prop_chunks_respect_size(
        text in "[a-z .\n]{0,400}",
        size in 5usize..60,
        overlap in 0usize..30,
    ) {
        let splitter = TextSplitter::new(size, overlap);
        for chunk in splitter.split(&text) {
            prop_assert!(chunk.chars().count() <= splitter.chunk_size());
            prop_assert!(!chunk.is_empty());
            prop_assert!(text.contains(&chunk));
        }
    }

    #[test]
    fn prop_fusion_is_bounded_and_unique(
        semantic in prop::collection::vec("[a-d]{1,2}", 0..6),
        lexical in prop::collection::vec("[a-d]{1,2}", 0..6),
        k in 0usize..8,
    ) {
        let lists = [
            RankedList { weight: 0.6, passages: semantic.into_iter().map(passage).collect() },
            RankedList { weight: 0.4, passages: lexical.into_iter().map(passage).collect() },
        ];
        let fused = weighted_rrf(&lists, 60.0, k);

        prop_assert!(fused.len() <= k);
        let mut seen = std::collections::HashSet::new();
        for p in &fused {
            prop_assert!(seen.insert(p.text.clone()));
        }
        prop_assert_eq!(fused.clone(), weighted_rrf(&lists, 60.0, k));
    }
}
