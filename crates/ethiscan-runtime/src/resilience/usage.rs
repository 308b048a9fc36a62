//! Token usage accounting for LLM calls.
//!
//! Usage is tracked per pipeline stage and in total, so the CLI can report
//! what a run cost.

use ethiscan_core::Stage;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::providers::TokenUsage;

/// Accumulated LLM usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub total_tokens: u32,

    /// Prompt/input tokens
    pub prompt_tokens: u32,

    /// Completion/output tokens
    pub completion_tokens: u32,

    /// Number of LLM calls that reached the provider
    pub llm_calls: u32,

    /// Answers served from the response cache
    pub cache_hits: u32,

    /// Estimated cost in USD
    pub estimated_cost: f64,
}

impl LlmUsage {
    /// Add token usage from a provider response.
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total();
        self.llm_calls += 1;
        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // USD per million tokens
        let (input_rate, output_rate) = match model {
            m if m.contains("gpt-4o-mini") => (0.15, 0.6),
            m if m.contains("gpt-4o") => (2.5, 10.0),
            m if m.contains("haiku") => (1.0, 5.0),
            m if m.contains("opus") => (5.0, 25.0),
            m if m.contains("sonnet") => (3.0, 15.0),
            _ => (0.15, 0.6),
        };

        let input_cost = (usage.prompt_tokens as f64 / 1_000_000.0) * input_rate;
        let output_cost = (usage.completion_tokens as f64 / 1_000_000.0) * output_rate;
        input_cost + output_cost
    }
}

/// Usage tracker shared by every task of a run.
#[derive(Debug, Default)]
pub struct UsageTracker {
    by_stage: RwLock<BTreeMap<Stage, LlmUsage>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage after a provider call.
    pub fn record(&self, stage: Stage, usage: &TokenUsage, model: &str) {
        self.by_stage
            .write()
            .entry(stage)
            .or_default()
            .add(usage, model);
    }

    pub fn record_cache_hit(&self, stage: Stage) {
        self.by_stage.write().entry(stage).or_default().cache_hits += 1;
    }

    /// Usage for one stage.
    pub fn stage(&self, stage: Stage) -> LlmUsage {
        self.by_stage.read().get(&stage).cloned().unwrap_or_default()
    }

    /// Usage per stage, in pipeline order.
    pub fn by_stage(&self) -> BTreeMap<Stage, LlmUsage> {
        self.by_stage.read().clone()
    }

    /// Sum over every stage.
    pub fn total(&self) -> LlmUsage {
        let guard = self.by_stage.read();
        guard.values().fold(LlmUsage::default(), |mut acc, u| {
            acc.total_tokens += u.total_tokens;
            acc.prompt_tokens += u.prompt_tokens;
            acc.completion_tokens += u.completion_tokens;
            acc.llm_calls += u.llm_calls;
            acc.cache_hits += u.cache_hits;
            acc.estimated_cost += u.estimated_cost;
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u32, completion: u32) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
        }
    }

    #[test]
    fn test_usage_accumulates_per_stage() {
        let tracker = UsageTracker::new();
        tracker.record(Stage::ServiceAnalysis, &usage(1000, 200), "gpt-4o-mini");
        tracker.record(Stage::ToxicClauseDetection, &usage(500, 100), "gpt-4o-mini");
        tracker.record(Stage::ToxicClauseDetection, &usage(500, 100), "gpt-4o-mini");
        tracker.record_cache_hit(Stage::ToxicClauseDetection);

        let toxic = tracker.stage(Stage::ToxicClauseDetection);
        assert_eq!(toxic.llm_calls, 2);
        assert_eq!(toxic.total_tokens, 1200);
        assert_eq!(toxic.cache_hits, 1);

        let total = tracker.total();
        assert_eq!(total.llm_calls, 3);
        assert_eq!(total.prompt_tokens, 2000);
        assert_eq!(total.completion_tokens, 400);
    }

    #[test]
    fn test_cost_estimate() {
        let mut llm = LlmUsage::default();
        llm.add(&usage(1_000_000, 1_000_000), "gpt-4o-mini");
        assert!((llm.estimated_cost - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_stage_is_empty() {
        let tracker = UsageTracker::new();
        assert_eq!(tracker.stage(Stage::ReportComposition), LlmUsage::default());
        assert!(tracker.by_stage().is_empty());
    }
}
