//! Weighted reciprocal rank fusion.
//!
//! `score(p) = Σ weight_i / (rank_i(p) + c)` with 1-based ranks. Passages
//! with equal identity are merged. Equal scores keep first-seen order, so
//! the output is a pure function of the input lists.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::Passage;

/// One ranked input list and its fusion weight.
#[derive(Debug, Clone)]
pub struct RankedList {
    pub weight: f64,
    pub passages: Vec<Passage>,
}

/// Fuse ranked lists and keep the top `k`.
pub fn weighted_rrf(lists: &[RankedList], rrf_constant: f64, k: usize) -> Vec<Passage> {
    let mut slots: HashMap<(String, String), usize> = HashMap::new();
    let mut fused: Vec<(Passage, f64)> = Vec::new();

    for list in lists {
        for (rank, passage) in list.passages.iter().enumerate() {
            let contribution = list.weight / ((rank + 1) as f64 + rrf_constant);
            let key = (passage.source_document.clone(), passage.text.clone());

            match slots.get(&key) {
                Some(&slot) => fused[slot].1 += contribution,
                None => {
                    slots.insert(key, fused.len());
                    fused.push((passage.clone(), contribution));
                }
            }
        }
    }

    // Stable sort: first-seen order breaks ties.
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    fused.into_iter().take(k).map(|(passage, _)| passage).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Location;

    fn p(text: &str) -> Passage {
        Passage {
            text: text.to_string(),
            source_document: "d".to_string(),
            location: Location { page: 0, offset: 0 },
            section_label: "N/A".to_string(),
        }
    }

    fn texts(passages: &[Passage]) -> Vec<&str> {
        passages.iter().map(|p| p.text.as_str()).collect()
    }

    #[test]
    fn test_shared_passage_wins() {
        let semantic = RankedList {
            weight: 0.6,
            passages: vec![p("a"), p("b"), p("c")],
        };
        let lexical = RankedList {
            weight: 0.4,
            passages: vec![p("c"), p("d")],
        };

        let fused = weighted_rrf(&[semantic, lexical], 60.0, 3);
        assert_eq!(texts(&fused), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_weights_break_rank_ties() {
        let semantic = RankedList {
            weight: 0.6,
            passages: vec![p("s")],
        };
        let lexical = RankedList {
            weight: 0.4,
            passages: vec![p("l")],
        };
        let fused = weighted_rrf(&[lexical, semantic], 60.0, 2);
        assert_eq!(texts(&fused), vec!["s", "l"]);
    }

    #[test]
    fn test_equal_scores_keep_first_seen_order() {
        let a = RankedList {
            weight: 0.5,
            passages: vec![p("x")],
        };
        let b = RankedList {
            weight: 0.5,
            passages: vec![p("y")],
        };
        assert_eq!(texts(&weighted_rrf(&[a, b], 60.0, 2)), vec!["x", "y"]);
    }

    #[test]
    fn test_same_text_different_source_is_distinct() {
        let mut other = p("a");
        other.source_document = "e".to_string();
        let list = RankedList {
            weight: 1.0,
            passages: vec![p("a"), other],
        };
        assert_eq!(weighted_rrf(&[list], 60.0, 5).len(), 2);
    }

    #[test]
    fn test_single_list_keeps_its_order() {
        let list = RankedList {
            weight: 0.4,
            passages: vec![p("1"), p("2"), p("3")],
        };
        assert_eq!(texts(&weighted_rrf(&[list], 60.0, 2)), vec!["1", "2"]);
    }
}
