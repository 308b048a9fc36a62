//! The pipeline state record and its partial updates.
//!
//! Tasks never mutate [`PipelineState`] directly. Each returns a sparse
//! [`StateUpdate`] and the orchestrator folds it in with
//! [`PipelineState::apply`], the only merge function.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::types::{
    Branch, EthicalRisks, FinalReport, Outcome, Recommendations, RiskLevel, ServiceInfo, Stage,
    ToxicClause,
};

/// Separator between accumulated error entries.
pub const ERROR_SEPARATOR: &str = "\n";

/// Format the error text a task appends on failure.
pub fn failure_text(stage: Stage, reason: &str) -> String {
    format!("{} 실패: {}", stage.display_name(), reason)
}

/// The single shared record threaded through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineState {
    pub service_url: Option<String>,
    pub documents: Vec<PathBuf>,

    /// Terms of service text supplied by the caller
    pub terms_text: Option<String>,
    /// Privacy policy text supplied by the caller
    pub privacy_policy_text: Option<String>,

    pub service_info: Option<Outcome<ServiceInfo>>,
    pub ethical_risks: Option<Outcome<EthicalRisks>>,
    pub toxic_clauses: Option<Outcome<Vec<ToxicClause>>>,
    pub overall_clause_risk: Option<Outcome<RiskLevel>>,
    pub recommendations: Option<Outcome<Recommendations>>,
    pub final_report: Option<FinalReport>,

    pub ethical_risk_done: bool,
    pub toxic_clause_done: bool,

    join_attempt_count: u32,

    pub error_message: Option<String>,

    /// Errors raised by the parallel branches themselves.
    ///
    /// The join barrier routes on this map rather than on the text of
    /// `error_message`.
    pub branch_errors: BTreeMap<Branch, String>,
}

impl PipelineState {
    /// Create the initial record for a run.
    pub fn new(service_url: Option<String>, documents: Vec<PathBuf>) -> Self {
        Self {
            service_url,
            documents,
            ..Default::default()
        }
    }

    pub fn with_terms_text(mut self, text: impl Into<String>) -> Self {
        self.terms_text = Some(text.into());
        self
    }

    pub fn with_privacy_policy_text(mut self, text: impl Into<String>) -> Self {
        self.privacy_policy_text = Some(text.into());
        self
    }

    /// Whether the record carries enough input to start a run.
    pub fn has_input(&self) -> bool {
        let has_url = self
            .service_url
            .as_deref()
            .map(|url| !url.trim().is_empty())
            .unwrap_or(false);
        has_url || !self.documents.is_empty()
    }

    pub fn has_error(&self) -> bool {
        self.error_message.is_some()
    }

    pub fn branch_done(&self, branch: Branch) -> bool {
        match branch {
            Branch::EthicalRisk => self.ethical_risk_done,
            Branch::ToxicClause => self.toxic_clause_done,
        }
    }

    pub fn both_branches_done(&self) -> bool {
        Branch::ALL.iter().all(|b| self.branch_done(*b))
    }

    pub fn branch_failed(&self) -> bool {
        !self.branch_errors.is_empty()
    }

    pub fn join_attempt_count(&self) -> u32 {
        self.join_attempt_count
    }

    /// Count one visit to the join barrier and return the new total.
    ///
    /// Only the join barrier calls this.
    pub fn record_join_attempt(&mut self) -> u32 {
        self.join_attempt_count += 1;
        self.join_attempt_count
    }

    /// Append to the accumulated error text.
    pub fn append_error(&mut self, error: &str) {
        match &mut self.error_message {
            Some(existing) => {
                existing.push_str(ERROR_SEPARATOR);
                existing.push_str(error);
            }
            None => self.error_message = Some(error.to_string()),
        }
    }

    /// Merge a partial update into the record.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(value) = update.service_info {
            self.service_info = Some(value);
        }
        if let Some(value) = update.ethical_risks {
            self.ethical_risks = Some(value);
        }
        if let Some(value) = update.toxic_clauses {
            self.toxic_clauses = Some(value);
        }
        if let Some(value) = update.overall_clause_risk {
            self.overall_clause_risk = Some(value);
        }
        if let Some(value) = update.recommendations {
            self.recommendations = Some(value);
        }
        if let Some(value) = update.final_report {
            self.final_report = Some(value);
        }

        for branch in update.completed {
            if self.branch_done(branch) {
                tracing::warn!(branch = %branch, "Branch reported completion twice");
            }
            match branch {
                Branch::EthicalRisk => self.ethical_risk_done = true,
                Branch::ToxicClause => self.toxic_clause_done = true,
            }
        }

        for (branch, error) in update.branch_errors {
            self.branch_errors.insert(branch, error);
        }

        if let Some(error) = update.error {
            self.append_error(&error);
        }
    }
}

/// A sparse update returned by a task.
///
/// Only the fields a task is responsible for are set. `join_attempt_count`
/// is deliberately absent: no task can touch it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub service_info: Option<Outcome<ServiceInfo>>,
    pub ethical_risks: Option<Outcome<EthicalRisks>>,
    pub toxic_clauses: Option<Outcome<Vec<ToxicClause>>>,
    pub overall_clause_risk: Option<Outcome<RiskLevel>>,
    pub recommendations: Option<Outcome<Recommendations>>,
    pub final_report: Option<FinalReport>,

    /// Branches whose completion this update signals
    pub completed: Vec<Branch>,

    /// Errors raised by a branch itself
    pub branch_errors: Vec<(Branch, String)>,

    /// Error text to append to `error_message`
    pub error: Option<String>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// The update a task returns when it skips work because of an upstream
    /// error: only the completion signal for its position.
    pub fn pass_through(stage: Stage) -> Self {
        let mut update = Self::new();
        if let Some(branch) = stage.branch() {
            update.completed.push(branch);
        }
        update
    }

    /// The update a task returns when its own work failed.
    ///
    /// Appends the error, marks completion for branch stages, and writes a
    /// `Failed` placeholder into the stage's output fields.
    pub fn task_failed(stage: Stage, reason: impl AsRef<str>) -> Self {
        let reason = reason.as_ref();
        let mut update = Self::pass_through(stage);
        update.error = Some(failure_text(stage, reason));

        match stage {
            Stage::ServiceAnalysis => {
                update.service_info = Some(Outcome::failed(reason));
            }
            Stage::EthicalRiskAssessment => {
                update.ethical_risks = Some(Outcome::failed(reason));
            }
            Stage::ToxicClauseDetection => {
                update.toxic_clauses = Some(Outcome::failed(reason));
                update.overall_clause_risk = Some(Outcome::failed(reason));
            }
            Stage::ImprovementGeneration => {
                update.recommendations = Some(Outcome::failed(reason));
            }
            Stage::ReportComposition | Stage::FatalErrorHandler => {}
        }

        if let Some(branch) = stage.branch() {
            update.branch_errors.push((branch, reason.to_string()));
        }

        update
    }

    pub fn with_service_info(mut self, info: ServiceInfo) -> Self {
        self.service_info = Some(Outcome::Ready(info));
        self
    }

    pub fn with_ethical_risks(mut self, risks: EthicalRisks) -> Self {
        self.ethical_risks = Some(Outcome::Ready(risks));
        self.completed.push(Branch::EthicalRisk);
        self
    }

    pub fn with_toxic_clauses(mut self, clauses: Vec<ToxicClause>, overall: RiskLevel) -> Self {
        self.toxic_clauses = Some(Outcome::Ready(clauses));
        self.overall_clause_risk = Some(Outcome::Ready(overall));
        self.completed.push(Branch::ToxicClause);
        self
    }

    pub fn with_recommendations(mut self, recommendations: Recommendations) -> Self {
        self.recommendations = Some(Outcome::Ready(recommendations));
        self
    }

    pub fn with_final_report(mut self, report: FinalReport) -> Self {
        self.final_report = Some(report);
        self
    }

    /// True if the update writes any substantive output field.
    pub fn has_substantive_output(&self) -> bool {
        fn ready<T>(field: &Option<Outcome<T>>) -> bool {
            matches!(field, Some(Outcome::Ready(_)))
        }

        ready(&self.service_info)
            || ready(&self.ethical_risks)
            || ready(&self.toxic_clauses)
            || ready(&self.overall_clause_risk)
            || ready(&self.recommendations)
            || self.final_report.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RiskAssessment, RiskDimension};

    #[test]
    fn test_input_detection() {
        assert!(!PipelineState::default().has_input());
        assert!(!PipelineState::new(Some("  ".to_string()), vec![]).has_input());
        assert!(PipelineState::new(Some("https://svc".to_string()), vec![]).has_input());
        assert!(PipelineState::new(None, vec![PathBuf::from("svc.pdf")]).has_input());
    }

    #[test]
    fn test_errors_accumulate() {
        let mut state = PipelineState::default();
        state.apply(StateUpdate::task_failed(Stage::EthicalRiskAssessment, "timeout"));
        state.apply(StateUpdate::task_failed(Stage::ToxicClauseDetection, "bad json"));

        let message = state.error_message.as_deref().unwrap();
        assert_eq!(
            message,
            "Ethical Risk Assessment 실패: timeout\nToxic Clause Detection 실패: bad json"
        );
        assert!(state.both_branches_done());
        assert_eq!(state.branch_errors.len(), 2);
    }

    #[test]
    fn test_failed_task_writes_placeholder() {
        let update = StateUpdate::task_failed(Stage::ToxicClauseDetection, "no block");
        assert!(matches!(update.toxic_clauses, Some(Outcome::Failed { .. })));
        assert!(matches!(update.overall_clause_risk, Some(Outcome::Failed { .. })));
        assert_eq!(update.completed, vec![Branch::ToxicClause]);
        assert!(!update.has_substantive_output());
    }

    #[test]
    fn test_pass_through_only_signals_completion() {
        let update = StateUpdate::pass_through(Stage::EthicalRiskAssessment);
        assert_eq!(update.completed, vec![Branch::EthicalRisk]);
        assert!(update.error.is_none());
        assert!(!update.has_substantive_output());

        let update = StateUpdate::pass_through(Stage::ImprovementGeneration);
        assert_eq!(update, StateUpdate::default());
    }

    #[test]
    fn test_apply_preserves_untouched_fields() {
        let mut state = PipelineState::new(Some("https://svc".to_string()), vec![]);
        state.apply(StateUpdate::new().with_service_info(ServiceInfo {
            service_name: "X".to_string(),
            ..Default::default()
        }));

        let mut risks = EthicalRisks::new();
        risks.insert(
            RiskDimension::Bias,
            RiskAssessment {
                level: RiskLevel::High,
                justification: "skewed data".to_string(),
            },
        );
        state.apply(StateUpdate::new().with_ethical_risks(risks));

        assert_eq!(
            state.service_info.as_ref().and_then(|o| o.ready()).map(|i| i.service_name.as_str()),
            Some("X")
        );
        assert!(state.ethical_risk_done);
        assert!(!state.toxic_clause_done);
        assert!(!state.has_error());
    }

    #[test]
    fn test_join_attempts_are_monotonic() {
        let mut state = PipelineState::default();
        assert_eq!(state.join_attempt_count(), 0);
        assert_eq!(state.record_join_attempt(), 1);
        state.apply(StateUpdate::task_failed(Stage::ServiceAnalysis, "x"));
        assert_eq!(state.record_join_attempt(), 2);
    }

    #[test]
    fn test_state_serializes_join_count() {
        let mut state = PipelineState::default();
        state.record_join_attempt();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["join_attempt_count"], 1);
    }
}
