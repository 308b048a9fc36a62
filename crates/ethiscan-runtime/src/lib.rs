//! # ethiscan-runtime
//!
//! LLM-driven AI ethics risk diagnosis.
//!
//! This crate runs the diagnosis pipeline over the data model and retriever
//! from `ethiscan-core`:
//!
//! 1. **Service analysis**: profile the service from its URL and documents
//! 2. **Fan-out**: assess ethical risks and detect toxic clauses concurrently
//! 3. **Join barrier**: wait, bounded, for both branches
//! 4. **Improvement generation**: propose remediations
//! 5. **Report composition**: write the Markdown and JSON report
//!
//! Any failure converges on a single fatal handler that still produces a
//! well-formed report with status `Failed`.
//!
//! ## Collaborators
//!
//! Tasks never hold a provider or global state. The [`Oracle`] (model
//! client with timeout, retry, cache and usage accounting), the retriever
//! and the report renderer are injected through [`TaskContext`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use ethiscan_runtime::{Oracle, Pipeline, PipelineBuilder, ProviderRegistry, RuntimeConfig, TaskContext};
//!
//! let config = RuntimeConfig::default();
//! let provider = ProviderRegistry::with_defaults().from_config(&config.provider)?;
//! let oracle = Arc::new(Oracle::from_config(provider, &config.oracle));
//!
//! let ctx = TaskContext::from_config(oracle, &config).with_retriever(retriever);
//! let pipeline = PipelineBuilder::from_config(ctx, &config)?.build();
//!
//! let state = pipeline.run(PipelineState::new(Some(url), documents)).await?;
//! println!("{}", state.final_report.unwrap().status);
//! ```

pub mod agents;
pub mod cache;
pub mod config;
pub mod oracle;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod report;
pub mod resilience;

pub use agents::{AnalysisTask, RetrievalStatus, TaskContext};
pub use cache::ResponseCache;
pub use config::{ConfigError, OracleConfig, ProviderConfig, RuntimeConfig};
pub use oracle::{Oracle, OracleError};
pub use orchestrator::{Pipeline, PipelineBuilder, PipelineError};
pub use providers::{LlmProvider, ProviderError, ProviderRegistry};
pub use report::ReportRenderer;
pub use resilience::{LlmUsage, RetryPolicy, UsageTracker};
