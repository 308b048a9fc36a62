//! # ethiscan-core
//!
//! Data model and retrieval engine for AI ethics risk diagnosis.
//!
//! This crate holds everything that does not talk to a language model:
//! - The pipeline state record and the partial updates tasks return
//! - Domain types (service profile, risk levels, toxic clauses, reports)
//! - Structured-data extraction from model answers, validated with JSON Schema
//! - Hybrid lexical + semantic retrieval over the supplied documents
//!
//! ## Key Guarantees
//!
//! 1. **Single merge point**: state changes only through [`PipelineState::apply`]
//! 2. **Deterministic retrieval**: same corpus and query, same passages in the same order
//! 3. **Graceful degradation**: a retriever that can build only one index still serves queries
//!
//! ## Example
//!
//! ```rust,ignore
//! use ethiscan_core::retrieval::{PassageRetriever, RetrieverConfig, RetrieverFactory};
//!
//! let factory = RetrieverFactory::new(RetrieverConfig::default());
//! if let Some(retriever) = factory.build("daglo", &documents) {
//!     for passage in retriever.retrieve("data retention period", 3) {
//!         println!("[{}] {}", passage.source_document, passage.text);
//!     }
//! }
//! ```

pub mod extract;
pub mod retrieval;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use extract::{parse_response, parse_structured, ExtractError, ResponseSchema};
pub use retrieval::{
    HybridRetriever, Passage, PassageRetriever, RetrievalError, RetrieverConfig, RetrieverFactory,
    RetrieverMode,
};
pub use state::{failure_text, PipelineState, StateUpdate, ERROR_SEPARATOR};
pub use types::{
    Branch, EthicalRisks, FinalReport, Outcome, Recommendations, ReportStatus, RiskAssessment,
    RiskDimension, RiskLevel, ServiceInfo, Stage, ToxicClause,
};
