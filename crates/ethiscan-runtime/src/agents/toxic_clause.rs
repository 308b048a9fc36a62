//! Branch: find contract clauses unfavorable to users.

use async_trait::async_trait;
use ethiscan_core::{
    parse_response, PipelineState, ResponseSchema, RiskLevel, Stage, StateUpdate, ToxicClause,
};
use serde::Deserialize;

use super::{AnalysisTask, TaskContext};
use crate::prompts;

const QUERIES: &[&str] = &[
    "unilateral changes to terms or service by the provider",
    "limitation of liability and disclaimers",
    "license to use, share or sell user content and data",
    "termination or suspension of accounts without notice",
    "restrictions on user rights, refunds or dispute resolution",
];

#[derive(Debug, Deserialize)]
struct ClauseResponse {
    toxic_clauses: Vec<ToxicClause>,
    #[serde(default)]
    overall_clause_risk: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ToxicClauseTask;

#[async_trait]
impl AnalysisTask for ToxicClauseTask {
    fn stage(&self) -> Stage {
        Stage::ToxicClauseDetection
    }

    async fn run(&self, state: &PipelineState, ctx: &TaskContext) -> StateUpdate {
        if state.has_error() {
            return StateUpdate::pass_through(self.stage());
        }

        let context = ctx.gather_context(QUERIES);
        let user = prompts::toxic_clause_user(
            state.terms_text.as_deref(),
            state.privacy_policy_text.as_deref(),
            &context,
        );

        let answer = match ctx
            .oracle
            .ask(self.stage(), prompts::TOXIC_CLAUSE_SYSTEM, &user)
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(stage = %self.stage(), error = %e, "Oracle call failed");
                return StateUpdate::task_failed(self.stage(), e.to_string());
            }
        };

        match parse_response::<ClauseResponse>(&answer, ResponseSchema::ToxicClauses) {
            Ok(response) => {
                let overall = response
                    .overall_clause_risk
                    .as_deref()
                    .and_then(RiskLevel::parse)
                    .unwrap_or(RiskLevel::Medium);
                tracing::info!(clauses = response.toxic_clauses.len(), overall = %overall, "Clauses reviewed");
                StateUpdate::new().with_toxic_clauses(response.toxic_clauses, overall)
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
    use crate::prompts::TRUNCATION_MARKER;
    use ethiscan_core::{Branch, Outcome};

    #[tokio::test]
    async fn test_detects_clauses() {
        let ctx = context(FixedProvider::answering(
            r#"```json
{"toxic_clauses": [{"clause": "사전 통보 없이 서비스 중단", "risk_reason": "일방적 해지"}],
 "overall_clause_risk": "높음"}
```"#,
        ));
        let update = ToxicClauseTask.run(&PipelineState::default(), &ctx).await;

        let clauses = update.toxic_clauses.as_ref().and_then(Outcome::ready).unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].risk_reason, "일방적 해지");
        assert_eq!(update.overall_clause_risk, Some(Outcome::Ready(RiskLevel::High)));
        assert_eq!(update.completed, vec![Branch::ToxicClause]);
    }

    #[tokio::test]
    async fn test_overall_risk_defaults_to_medium() {
        let ctx = context(FixedProvider::answering(r#"{"toxic_clauses": []}"#));
        let update = ToxicClauseTask.run(&PipelineState::default(), &ctx).await;
        assert_eq!(update.overall_clause_risk, Some(Outcome::Ready(RiskLevel::Medium)));
        assert_eq!(update.toxic_clauses, Some(Outcome::Ready(vec![])));
    }

    #[tokio::test]
    async fn test_input_texts_are_truncated() {
        let provider = FixedProvider::answering(r#"{"toxic_clauses": []}"#);
        let ctx = context(provider.clone());
        let state = PipelineState::default()
            .with_terms_text("§".repeat(5000))
            .with_privacy_policy_text("short policy");

        ToxicClauseTask.run(&state, &ctx).await;
        let prompt = provider.last_user_prompt();
        assert!(prompt.contains(TRUNCATION_MARKER));
        assert!(prompt.contains("short policy"));
        assert_eq!(prompt.matches('§').count(), 4000);
    }

    #[tokio::test]
    async fn test_missing_clause_list_is_failure() {
        let ctx = context(FixedProvider::answering(r#"{"overall_clause_risk": "높음"}"#));
        let update = ToxicClauseTask.run(&PipelineState::default(), &ctx).await;

        assert!(matches!(update.toxic_clauses, Some(Outcome::Failed { .. })));
        assert!(matches!(update.overall_clause_risk, Some(Outcome::Failed { .. })));
        assert_eq!(update.completed, vec![Branch::ToxicClause]);
    }
}
