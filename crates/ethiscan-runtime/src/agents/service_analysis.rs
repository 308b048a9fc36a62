//! First stage: profile the service from its documents.

use async_trait::async_trait;
use ethiscan_core::{parse_response, PipelineState, ResponseSchema, ServiceInfo, Stage, StateUpdate};

use super::{AnalysisTask, TaskContext};
use crate::prompts;

const QUERIES: &[&str] = &[
    "service overview and purpose",
    "core features and functionality",
    "intended users and customers",
    "personal data and information collected from users",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceAnalysisTask;

#[async_trait]
impl AnalysisTask for ServiceAnalysisTask {
    fn stage(&self) -> Stage {
        Stage::ServiceAnalysis
    }

    async fn run(&self, state: &PipelineState, ctx: &TaskContext) -> StateUpdate {
        if state.has_error() {
            return StateUpdate::pass_through(self.stage());
        }

        let context = ctx.gather_context(QUERIES);
        let user = prompts::service_analysis_user(state.service_url.as_deref(), &context);

        let answer = match ctx
            .oracle
            .ask(self.stage(), prompts::SERVICE_ANALYSIS_SYSTEM, &user)
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(stage = %self.stage(), error = %e, "Oracle call failed");
                return StateUpdate::task_failed(self.stage(), e.to_string());
            }
        };

        match parse_response::<ServiceInfo>(&answer, ResponseSchema::ServiceInfo) {
            Ok(info) => {
                tracing::info!(service = %info.service_name, "Service profiled");
                StateUpdate::new().with_service_info(info)
            }
            Err(e) => {
                tracing::warn!(stage = %self.stage(), error = %e, "Unusable answer");
                StateUpdate::task_failed(self.stage(), e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::*;
    use ethiscan_core::Outcome;

    #[tokio::test]
    async fn test_parses_service_profile() {
        let provider = FixedProvider::answering(
            "```json\n{\"service_name\": \"Daglo\", \"core_features\": [\"요약\"]}\n```",
        );
        let ctx = context(provider.clone());
        let state = PipelineState::new(Some("https://daglo.ai".to_string()), vec![]);

        let update = ServiceAnalysisTask.run(&state, &ctx).await;
        let info = update.service_info.as_ref().and_then(Outcome::ready).unwrap();
        assert_eq!(info.service_name, "Daglo");
        assert_eq!(info.core_features, vec!["요약".to_string()]);
        assert!(update.error.is_none());
        assert!(provider.last_user_prompt().contains("https://daglo.ai"));
    }

    #[tokio::test]
    async fn test_oracle_failure_sets_placeholder() {
        let ctx = context(FixedProvider::failing());
        let state = PipelineState::new(Some("https://svc".to_string()), vec![]);

        let update = ServiceAnalysisTask.run(&state, &ctx).await;
        assert!(matches!(update.service_info, Some(Outcome::Failed { .. })));
        assert!(update
            .error
            .as_deref()
            .unwrap()
            .starts_with("Service Analysis 실패: "));
    }
}
