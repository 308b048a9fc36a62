//! Resilience patterns for ethiscan-runtime.
//!
//! This module provides:
//! - Retry with exponential backoff for transient provider failures
//! - Token usage accounting per pipeline stage

mod retry;
mod usage;

pub use retry::RetryPolicy;
pub use usage::{LlmUsage, UsageTracker};
