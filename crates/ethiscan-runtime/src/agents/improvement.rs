//! Propose remediations for the assessed risks and detected clauses.

use async_trait::async_trait;
use ethiscan_core::{
    parse_response, Outcome, PipelineState, Recommendations, ResponseSchema, RiskDimension, Stage,
    StateUpdate,
};
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{AnalysisTask, TaskContext};
use crate::prompts;

const CLAUSE_QUERY: &str = "user rights, notice and consent obligations of the provider";

#[derive(Debug, Deserialize)]
struct ImprovementResponse {
    recommendations: BTreeMap<String, String>,
}

fn recommendations(response: ImprovementResponse) -> Recommendations {
    let mut raw = response.recommendations;
    let by_dimension = RiskDimension::ALL
        .iter()
        .filter_map(|d| raw.remove(d.key()).map(|text| (*d, text)))
        .collect();

    Recommendations {
        by_dimension,
        toxic_clauses: raw.remove("toxic_clauses"),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImprovementTask;

impl ImprovementTask {
    /// Mitigation-oriented queries for every dimension, plus one for clauses.
    fn queries() -> Vec<String> {
        let mut queries: Vec<String> = RiskDimension::ALL
            .iter()
            .map(|d| format!("{} risk mitigation measures and safeguards", d.label().to_lowercase()))
            .collect();
        queries.push(CLAUSE_QUERY.to_string());
        queries
    }
}

#[async_trait]
impl AnalysisTask for ImprovementTask {
    fn stage(&self) -> Stage {
        Stage::ImprovementGeneration
    }

    async fn run(&self, state: &PipelineState, ctx: &TaskContext) -> StateUpdate {
        if state.has_error() {
            return StateUpdate::pass_through(self.stage());
        }

        let risks = state.ethical_risks.as_ref().and_then(Outcome::ready);
        let clauses = state
            .toxic_clauses
            .as_ref()
            .and_then(Outcome::ready)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let context = ctx.gather_context(&Self::queries());
        let user = prompts::improvement_user(risks, clauses, &context);

        let answer = match ctx
            .oracle
            .ask(self.stage(), prompts::IMPROVEMENT_SYSTEM, &user)
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(stage = %self.stage(), error = %e, "Oracle call failed");
                return StateUpdate::task_failed(self.stage(), e.to_string());
            }
        };

        match parse_response::<ImprovementResponse>(&answer, ResponseSchema::Recommendations) {
            Ok(response) => {
                let recommendations = recommendations(response);
                tracing::info!(
                    dimensions = recommendations.by_dimension.len(),
                    "Recommendations drafted"
                );
                StateUpdate::new().with_recommendations(recommendations)
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
    use ethiscan_core::{RiskAssessment, RiskLevel, ToxicClause};

    #[tokio::test]
    async fn test_maps_recommendations() {
        let provider = FixedProvider::answering(
            r#"```json
{"recommendations": {
  "privacy_risk": "데이터 최소 수집 및 삭제 주기 명시",
  "bias_risk": "사용자 그룹별 테스트",
  "toxic_clauses": "일방적 변경 조항 삭제",
  "other": "ignored"
}}
```"#,
        );
        let ctx = context(provider.clone());

        let mut state = PipelineState::default();
        let mut risks = ethiscan_core::EthicalRisks::new();
        risks.insert(
            RiskDimension::Privacy,
            RiskAssessment {
                level: RiskLevel::High,
                justification: String::new(),
            },
        );
        state.apply(StateUpdate::new().with_ethical_risks(risks));
        state.apply(StateUpdate::new().with_toxic_clauses(
            vec![ToxicClause {
                clause: "약관은 언제든 변경될 수 있음".to_string(),
                risk_reason: String::new(),
            }],
            RiskLevel::High,
        ));

        let update = ImprovementTask.run(&state, &ctx).await;
        let recs = update.recommendations.as_ref().and_then(Outcome::ready).unwrap();
        assert_eq!(recs.by_dimension.len(), 2);
        assert_eq!(recs.by_dimension[&RiskDimension::Bias], "사용자 그룹별 테스트");
        assert_eq!(recs.toxic_clauses.as_deref(), Some("일방적 변경 조항 삭제"));
        assert!(update.completed.is_empty());

        let prompt = provider.last_user_prompt();
        assert!(prompt.contains("프라이버시 리스크: High"));
        assert!(prompt.contains("- 약관은 언제든 변경될 수 있음"));
    }

    #[tokio::test]
    async fn test_unparseable_answer_sets_placeholder() {
        let ctx = context(FixedProvider::answering("개선 방안을 생성할 수 없습니다."));
        let update = ImprovementTask.run(&PipelineState::default(), &ctx).await;

        assert!(matches!(update.recommendations, Some(Outcome::Failed { .. })));
        assert!(update
            .error
            .as_deref()
            .unwrap()
            .starts_with("Improvement Generation 실패: "));
        assert!(update.branch_errors.is_empty());
    }

    #[test]
    fn test_queries_cover_every_dimension() {
        let queries = ImprovementTask::queries();
        assert_eq!(queries.len(), RiskDimension::ALL.len() + 1);
        assert!(queries[0].starts_with("bias risk"));
    }
}
