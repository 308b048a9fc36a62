//! Branch: rate each ethical risk dimension.

use async_trait::async_trait;
use ethiscan_core::{
    parse_response, EthicalRisks, Outcome, PipelineState, ResponseSchema, RiskAssessment,
    RiskDimension, RiskLevel, Stage, StateUpdate,
};
use serde_json::Value;

use super::{AnalysisTask, TaskContext};
use crate::prompts;

#[derive(Debug, Default, Clone, Copy)]
pub struct EthicalRiskTask;

impl EthicalRiskTask {
    /// One context section per dimension, each from its aspect queries.
    fn context(&self, ctx: &TaskContext) -> String {
        RiskDimension::ALL
            .iter()
            .map(|dimension| {
                format!(
                    "### {}\n{}",
                    dimension.label(),
                    ctx.gather_context(dimension.aspects())
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Map a validated answer onto the risk table.
///
/// Dimensions with an unrecognised level are skipped; an answer with no
/// usable dimension at all is an error.
fn assessments(value: &Value) -> Result<EthicalRisks, String> {
    let mut risks = EthicalRisks::new();

    for dimension in RiskDimension::ALL {
        let raw = value[dimension.key()].as_str();
        match raw.and_then(RiskLevel::parse) {
            Some(level) => {
                let justification = value["justification"][dimension.key()]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                risks.insert(dimension, RiskAssessment { level, justification });
            }
            None => {
                tracing::warn!(dimension = %dimension, level = ?raw, "Dimension not assessed");
            }
        }
    }

    if risks.is_empty() {
        Err("no risk dimension had a recognised level".to_string())
    } else {
        Ok(risks)
    }
}

#[async_trait]
impl AnalysisTask for EthicalRiskTask {
    fn stage(&self) -> Stage {
        Stage::EthicalRiskAssessment
    }

    async fn run(&self, state: &PipelineState, ctx: &TaskContext) -> StateUpdate {
        if state.has_error() {
            return StateUpdate::pass_through(self.stage());
        }

        let info = state.service_info.as_ref().and_then(Outcome::ready);
        let user = prompts::ethical_risk_user(info, &ctx.guideline, &self.context(ctx));

        let answer = match ctx
            .oracle
            .ask(self.stage(), prompts::ETHICAL_RISK_SYSTEM, &user)
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(stage = %self.stage(), error = %e, "Oracle call failed");
                return StateUpdate::task_failed(self.stage(), e.to_string());
            }
        };

        let parsed = parse_response::<Value>(&answer, ResponseSchema::EthicalRisks)
            .map_err(|e| e.to_string())
            .and_then(|value| assessments(&value));

        match parsed {
            Ok(risks) => {
                tracing::info!(dimensions = risks.len(), "Ethical risks assessed");
                StateUpdate::new().with_ethical_risks(risks)
            }
            Err(reason) => {
                tracing::warn!(stage = %self.stage(), error = %reason, "Unusable answer");
                StateUpdate::task_failed(self.stage(), reason)
            }
        }
    }
}
