//! BM25 keyword index on tantivy.
//!
//! Passages live in an in-RAM tantivy index with one tokenized text field.
//! The default tokenizer splits on non-alphanumeric characters and
//! lowercases, which handles Hangul as well as Latin text.

use std::cmp::Ordering;

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

use super::{Passage, RetrievalError};

const FIELD_TEXT: &str = "text";
const FIELD_ORDINAL: &str = "ordinal";
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// In-memory BM25 index over a fixed set of passages.
pub struct Bm25Index {
    passages: Vec<Passage>,
    index: Index,
    reader: IndexReader,
    text: Field,
    ordinal: Field,
}

impl std::fmt::Debug for Bm25Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bm25Index")
            .field("passages", &self.passages.len())
            .finish()
    }
}

impl Bm25Index {
    pub fn new(passages: Vec<Passage>) -> Result<Self, RetrievalError> {
        let mut builder = Schema::builder();
        let text = builder.add_text_field(FIELD_TEXT, TEXT);
        let ordinal = builder.add_u64_field(FIELD_ORDINAL, STORED);
        let index = Index::create_in_ram(builder.build());

        // One indexing thread keeps the corpus in a single segment.
        let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        for (i, passage) in passages.iter().enumerate() {
            writer.add_document(doc!(text => passage.text.as_str(), ordinal => i as u64))?;
        }
        writer.commit()?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            passages,
            index,
            reader,
            text,
            ordinal,
        })
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Passages matching any query term, with their BM25 scores, best first.
    ///
    /// Query syntax characters are tolerated. Ties keep corpus order.
    pub fn scored(&self, query: &str) -> Result<Vec<(usize, f32)>, RetrievalError> {
        if self.passages.is_empty() {
            return Ok(Vec::new());
        }

        let parser = QueryParser::for_index(&self.index, vec![self.text]);
        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!(query = %query, errors = errors.len(), "Lenient query parse");
        }

        let searcher = self.reader.searcher();
        let hits = searcher.search(&parsed, &TopDocs::with_limit(self.passages.len()))?;

        let mut scored = Vec::with_capacity(hits.len());
        for (score, address) in hits {
            let stored: TantivyDocument = searcher.doc(address)?;
            let position = stored
                .get_first(self.ordinal)
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .filter(|&i| i < self.passages.len());
            if let (Some(i), true) = (position, score > 0.0) {
                scored.push((i, score));
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        Ok(scored)
    }

    /// Top-k passages with a positive score.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>, RetrievalError> {
        Ok(self
            .scored(query)?
            .into_iter()
            .take(k)
            .map(|(i, _)| self.passages[i].clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Location;

    fn passage(text: &str) -> Passage {
        Passage {
            text: text.to_string(),
            source_document: "doc.txt".to_string(),
            location: Location { page: 0, offset: 0 },
            section_label: "N/A".to_string(),
        }
    }

    fn index(texts: &[&str]) -> Bm25Index {
        Bm25Index::new(texts.iter().map(|t| passage(t)).collect()).unwrap()
    }

    #[test]
    fn test_keyword_match_ranks_first() {
        let index = index(&[
            "The service translates speech to text.",
            "User data is retained for five years after account deletion.",
            "Pricing is available on the website.",
        ]);

        let results = index.search("data retention years", 2).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].text.contains("retained"));
    }

    #[test]
    fn test_rarer_term_outweighs_common_one() {
        let index = index(&[
            "data is collected",
            "data is shared with advertisers",
            "data is encrypted",
        ]);

        let scored = index.scored("data advertisers").unwrap();
        assert_eq!(scored.len(), 3);
        assert_eq!(scored[0].0, 1);
        assert!(scored[0].1 > scored[1].1);
    }

    #[test]
    fn test_hangul_terms_match() {
        let index = index(&["개인정보 처리방침 안내", "서비스 이용약관"]);
        let results = index.search("개인정보 보관", 3).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].text.starts_with("개인정보"));
    }

    #[test]
    fn test_query_syntax_is_tolerated() {
        let index = index(&["opt-out of marketing emails", "retention: 3 years"]);
        for query in ["retention: (years", "\"unbalanced AND", "opt-out?", ":::"] {
            assert!(index.search(query, 3).is_ok(), "{query}");
        }
        assert_eq!(index.search("marketing opt-out", 3).unwrap().len(), 1);
    }

    #[test]
    fn test_no_matching_terms() {
        let index = index(&["alpha beta", "gamma delta"]);
        assert!(index.search("omega", 3).unwrap().is_empty());
    }

    #[test]
    fn test_ties_keep_corpus_order() {
        let index = index(&["consent form", "other words", "consent form"]);
        let scored = index.scored("consent").unwrap();
        assert_eq!(scored.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_empty_index() {
        let index = Bm25Index::new(vec![]).unwrap();
        assert!(index.is_empty());
        assert!(index.search("anything", 3).unwrap().is_empty());
    }
}
