//! Analysis tasks: the nodes of the diagnosis pipeline.
//!
//! Every task reads the pipeline state, optionally queries the retriever,
//! asks the oracle once and returns a sparse [`StateUpdate`]. Tasks never
//! return `Err`: a failure becomes an appended error, a `Failed`
//! placeholder and, for branch tasks, the completion signal.
//!
//! # Short-circuit contract
//! A task that sees `error_message` already set performs no work and
//! returns [`StateUpdate::pass_through`].

use async_trait::async_trait;
use ethiscan_core::retrieval::{Passage, PassageRetriever};
use ethiscan_core::{PipelineState, Stage, StateUpdate};
use std::fmt::Write;
use std::sync::Arc;

use crate::config::{RuntimeConfig, DEFAULT_GUIDELINE};
use crate::oracle::Oracle;
use crate::prompts::NO_CONTEXT;
use crate::report::ReportRenderer;

mod ethical_risk;
mod fatal;
mod improvement;
mod report_composer;
mod service_analysis;
mod toxic_clause;

pub use ethical_risk::EthicalRiskTask;
pub use fatal::FatalErrorTask;
pub use improvement::ImprovementTask;
pub use report_composer::{extract_summary, ReportComposerTask, MISSING_SUMMARY};
pub use service_analysis::ServiceAnalysisTask;
pub use toxic_clause::ToxicClauseTask;

/// A pipeline node.
///
/// Implementations must be side-effect free apart from logging and oracle
/// calls; report rendering is the one exception.
#[async_trait]
pub trait AnalysisTask: Send + Sync {
    /// Position of this task in the pipeline.
    fn stage(&self) -> Stage;

    /// Run against a snapshot of the state and return the fields this task
    /// is responsible for.
    async fn run(&self, state: &PipelineState, ctx: &TaskContext) -> StateUpdate;
}

/// How much grounding retrieval could offer this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStatus {
    Full,
    Degraded,
    Unavailable,
}

/// Collaborators injected into every task.
pub struct TaskContext {
    pub oracle: Arc<Oracle>,
    pub retriever: Option<Arc<dyn PassageRetriever>>,
    /// Passages per query
    pub k: usize,
    pub guideline: String,
    /// Report persistence; `None` keeps reports in memory only
    pub renderer: Option<ReportRenderer>,
}

impl TaskContext {
    pub fn new(oracle: Arc<Oracle>) -> Self {
        Self {
            oracle,
            retriever: None,
            k: 3,
            guideline: DEFAULT_GUIDELINE.to_string(),
            renderer: None,
        }
    }

    /// Context with the run settings from `config`.
    pub fn from_config(oracle: Arc<Oracle>, config: &RuntimeConfig) -> Self {
        Self {
            oracle,
            retriever: None,
            k: config.retrieval_k,
            guideline: config.guideline.clone(),
            renderer: config.report_dir.clone().map(ReportRenderer::new),
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn PassageRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_renderer(mut self, renderer: ReportRenderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn retrieval_status(&self) -> RetrievalStatus {
        match &self.retriever {
            None => RetrievalStatus::Unavailable,
            Some(r) if r.mode().is_degraded() => RetrievalStatus::Degraded,
            Some(_) => RetrievalStatus::Full,
        }
    }

    /// Run each query and concatenate the passages into one prompt block.
    ///
    /// Passages returned by more than one query appear once. Returns
    /// [`NO_CONTEXT`] when nothing was retrieved.
    pub fn gather_context<S: AsRef<str>>(&self, queries: &[S]) -> String {
        let Some(retriever) = &self.retriever else {
            return NO_CONTEXT.to_string();
        };

        let mut seen: Vec<Passage> = Vec::new();
        for query in queries {
            for passage in retriever.retrieve(query.as_ref(), self.k) {
                if !seen.iter().any(|p| p.identity() == passage.identity()) {
                    seen.push(passage);
                }
            }
        }

        tracing::debug!(queries = queries.len(), passages = seen.len(), "Gathered context");
        format_passages(&seen)
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("oracle", &self.oracle)
            .field("retrieval", &self.retrieval_status())
            .field("k", &self.k)
            .field("guideline", &self.guideline)
            .field("renderer", &self.renderer)
            .finish()
    }
}

/// Render passages with their attribution, one block each.
pub fn format_passages(passages: &[Passage]) -> String {
    if passages.is_empty() {
        return NO_CONTEXT.to_string();
    }

    let mut out = String::new();
    for (i, passage) in passages.iter().enumerate() {
        let _ = writeln!(
            out,
            "[{}] {} ({}, section: {})\n{}\n",
            i + 1,
            passage.source_document,
            passage.location,
            passage.section_label,
            passage.text.trim()
        );
    }
    out
}
