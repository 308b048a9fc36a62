//! Terminal stage of a failed run.
//!
//! The only place an accumulated `error_message` becomes a report. Never
//! calls the oracle or the retriever.

use async_trait::async_trait;
use ethiscan_core::{FinalReport, PipelineState, Stage, StateUpdate};

use super::{AnalysisTask, TaskContext};
use crate::report::failure_markdown;

const UNKNOWN_ERROR: &str = "unknown error";

#[derive(Debug, Default, Clone, Copy)]
pub struct FatalErrorTask;

#[async_trait]
impl AnalysisTask for FatalErrorTask {
    fn stage(&self) -> Stage {
        Stage::FatalErrorHandler
    }

    async fn run(&self, state: &PipelineState, ctx: &TaskContext) -> StateUpdate {
        let details = state.error_message.as_deref().unwrap_or(UNKNOWN_ERROR);
        tracing::error!(error = %details, "Run failed");

        let mut report = FinalReport::failed(details);
        report.markdown = Some(failure_markdown(state, &report));

        if let Some(renderer) = &ctx.renderer {
            match renderer.render(state, &report) {
                Ok(paths) => report.output_paths = paths,
                Err(e) => tracing::warn!(error = %e, "Failure report not persisted"),
            }
        }

        StateUpdate::new().with_final_report(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::*;
    use ethiscan_core::ReportStatus;

    #[tokio::test]
    async fn test_converts_error_into_failed_report() {
        let provider = FixedProvider::answering("unused");
        let ctx = context(provider.clone());
        let mut state = PipelineState::default();
        state.append_error("Ethical Risk Assessment 실패: timeout");

        let update = FatalErrorTask.run(&state, &ctx).await;
        let report = update.final_report.unwrap();
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(
            report.error_details.as_deref(),
            Some("Ethical Risk Assessment 실패: timeout")
        );
        assert!(report.markdown.unwrap().contains("timeout"));
        assert_eq!(provider.calls(), 0);
        assert!(update.error.is_none());
    }

    #[tokio::test]
    async fn test_without_error_text() {
        let ctx = context(FixedProvider::answering("unused"));
        let update = FatalErrorTask.run(&PipelineState::default(), &ctx).await;
        let report = update.final_report.unwrap();
        assert_eq!(report.error_details.as_deref(), Some(UNKNOWN_ERROR));
    }
}
