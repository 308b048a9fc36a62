//! Pipeline orchestrator.
//!
//! Drives the fixed diagnosis graph:
//!
//! ```text
//! ServiceAnalysis ──error──▶ FatalErrorHandler ──▶ END
//!        │ok
//!        ▼
//!     fan-out ──▶ { EthicalRiskAssessment, ToxicClauseDetection }
//!        │
//!        ▼
//!   JoinBarrier ◀─┐ not both done, attempts < max
//!        ├────────┘
//!        ├── branch error / attempts exhausted ──▶ FatalErrorHandler ──▶ END
//!        ▼ both done
//! ImprovementGeneration ──error──▶ FatalErrorHandler ──▶ END
//!        │ok
//!        ▼
//! ReportComposition ──▶ END
//! ```
//!
//! The two branches run as spawned tokio tasks on snapshots of the state.
//! Every update is merged here, through [`PipelineState::apply`], so no
//! task observes a half-merged record.
//!
//! Each barrier visit counts one attempt and waits at most `join_wait` for
//! outstanding branches before routing. A failed branch does not cut the
//! wait short: its sibling still gets the rest of the visit to finish and
//! have its update merged.

use std::sync::Arc;
use std::time::Duration;

use ethiscan_core::{Branch, PipelineState, Stage, StateUpdate};
use futures::future::select_all;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::agents::{
    AnalysisTask, EthicalRiskTask, FatalErrorTask, ImprovementTask, ReportComposerTask,
    ServiceAnalysisTask, TaskContext, ToxicClauseTask,
};
use crate::config::{ConfigError, RuntimeConfig};

/// Errors that stop a run before the graph starts.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Input error: a service URL or at least one document is required")]
    InputError,

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

/// Graph positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    ServiceAnalysis,
    FanOut,
    JoinBarrier,
    ImprovementGeneration,
    ReportComposition,
    FatalErrorHandler,
    End,
}

/// One task per stage.
#[derive(Clone)]
struct TaskSet {
    service_analysis: Arc<dyn AnalysisTask>,
    ethical_risk: Arc<dyn AnalysisTask>,
    toxic_clause: Arc<dyn AnalysisTask>,
    improvement: Arc<dyn AnalysisTask>,
    report: Arc<dyn AnalysisTask>,
    fatal: Arc<dyn AnalysisTask>,
}

impl Default for TaskSet {
    fn default() -> Self {
        Self {
            service_analysis: Arc::new(ServiceAnalysisTask),
            ethical_risk: Arc::new(EthicalRiskTask),
            toxic_clause: Arc::new(ToxicClauseTask),
            improvement: Arc::new(ImprovementTask),
            report: Arc::new(ReportComposerTask),
            fatal: Arc::new(FatalErrorTask),
        }
    }
}

impl TaskSet {
    fn set(&mut self, task: Arc<dyn AnalysisTask>) {
        let slot = match task.stage() {
            Stage::ServiceAnalysis => &mut self.service_analysis,
            Stage::EthicalRiskAssessment => &mut self.ethical_risk,
            Stage::ToxicClauseDetection => &mut self.toxic_clause,
            Stage::ImprovementGeneration => &mut self.improvement,
            Stage::ReportComposition => &mut self.report,
            Stage::FatalErrorHandler => &mut self.fatal,
        };
        *slot = task;
    }

    fn branch(&self, branch: Branch) -> &Arc<dyn AnalysisTask> {
        match branch {
            Branch::EthicalRisk => &self.ethical_risk,
            Branch::ToxicClause => &self.toxic_clause,
        }
    }
}

/// A spawned branch the barrier has not collected yet.
struct PendingBranch {
    branch: Branch,
    handle: JoinHandle<StateUpdate>,
}

/// The diagnosis pipeline.
pub struct Pipeline {
    ctx: Arc<TaskContext>,
    tasks: TaskSet,
    max_join_attempts: u32,
    join_wait: Duration,
}

impl Pipeline {
    pub fn builder(ctx: TaskContext) -> PipelineBuilder {
        PipelineBuilder::new(ctx)
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    pub fn max_join_attempts(&self) -> u32 {
        self.max_join_attempts
    }

    /// Run the graph from `initial` to a terminal report.
    ///
    /// Returns `Err` only for missing input. Every other failure ends in a
    /// record whose `final_report` has status `Failed`.
    pub async fn run(&self, initial: PipelineState) -> Result<PipelineState, PipelineError> {
        if !initial.has_input() {
            return Err(PipelineError::InputError);
        }

        tracing::info!(
            url = initial.service_url.as_deref().unwrap_or("-"),
            documents = initial.documents.len(),
            retrieval = ?self.ctx.retrieval_status(),
            "Pipeline started"
        );

        let mut state = initial;
        let mut pending: Vec<PendingBranch> = Vec::new();
        let mut node = Node::ServiceAnalysis;

        while node != Node::End {
            node = match node {
                Node::ServiceAnalysis => {
                    self.step(&self.tasks.service_analysis, &mut state).await;
                    if state.has_error() {
                        Node::FatalErrorHandler
                    } else {
                        Node::FanOut
                    }
                }
                Node::FanOut => {
                    pending = self.fan_out(&state);
                    Node::JoinBarrier
                }
                Node::JoinBarrier => self.join_barrier(&mut state, &mut pending).await,
                Node::ImprovementGeneration => {
                    self.step(&self.tasks.improvement, &mut state).await;
                    if state.has_error() {
                        Node::FatalErrorHandler
                    } else {
                        Node::ReportComposition
                    }
                }
                Node::ReportComposition => {
                    self.step(&self.tasks.report, &mut state).await;
                    Node::End
                }
                Node::FatalErrorHandler => {
                    abort_all(&mut pending);
                    self.step(&self.tasks.fatal, &mut state).await;
                    Node::End
                }
                Node::End => Node::End,
            };
        }

        if let Some(report) = &state.final_report {
            tracing::info!(status = %report.status, paths = report.output_paths.len(), "Pipeline finished");
        }
        Ok(state)
    }

    async fn step(&self, task: &Arc<dyn AnalysisTask>, state: &mut PipelineState) {
        let stage = task.stage();
        tracing::info!(stage = %stage, "Stage started");
        let update = task.run(state, &self.ctx).await;
        state.apply(update);
        tracing::debug!(stage = %stage, error = state.has_error(), "Stage merged");
    }

    /// Start both branches on a snapshot of the current state.
    fn fan_out(&self, state: &PipelineState) -> Vec<PendingBranch> {
        Branch::ALL
            .iter()
            .map(|&branch| {
                let task = self.tasks.branch(branch).clone();
                let ctx = self.ctx.clone();
                let snapshot = state.clone();
                tracing::info!(stage = %branch, "Branch started");
                PendingBranch {
                    branch,
                    handle: tokio::spawn(async move { task.run(&snapshot, &ctx).await }),
                }
            })
            .collect()
    }

    /// One visit to the join barrier.
    async fn join_barrier(
        &self,
        state: &mut PipelineState,
        pending: &mut Vec<PendingBranch>,
    ) -> Node {
        let deadline = Instant::now() + self.join_wait;

        while !pending.is_empty() {
            let next = tokio::time::timeout_at(
                deadline,
                select_all(pending.iter_mut().map(|p| &mut p.handle)),
            )
            .await
            .map(|(result, index, _)| (result, index));

            let Ok((result, index)) = next else {
                break;
            };

            let PendingBranch { branch, .. } = pending.remove(index);
            let update = result.unwrap_or_else(|e| {
                tracing::error!(stage = %branch, error = %e, "Branch task did not complete");
                StateUpdate::task_failed(branch.stage(), format!("task aborted: {}", e))
            });
            state.apply(update);
            tracing::info!(stage = %branch, "Branch collected");
        }

        let attempt = state.record_join_attempt();
        tracing::debug!(
            attempt,
            max = self.max_join_attempts,
            outstanding = pending.len(),
            "Join barrier visited"
        );

        if state.branch_failed() || state.has_error() {
            tracing::warn!(failed = ?state.branch_errors.keys().collect::<Vec<_>>(), "Branch failed");
            abort_all(pending);
            return Node::FatalErrorHandler;
        }

        if state.both_branches_done() {
            return Node::ImprovementGeneration;
        }

        if attempt >= self.max_join_attempts {
            tracing::warn!(attempts = attempt, "Join barrier exhausted");
            state.append_error(&format!(
                "Join Barrier 실패: branches incomplete after {} attempts",
                attempt
            ));
            abort_all(pending);
            return Node::FatalErrorHandler;
        }

        Node::JoinBarrier
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("ctx", &self.ctx)
            .field("max_join_attempts", &self.max_join_attempts)
            .field("join_wait", &self.join_wait)
            .finish()
    }
}

fn abort_all(pending: &mut Vec<PendingBranch>) {
    for p in pending.drain(..) {
        tracing::debug!(stage = %p.branch, "Aborting branch");
        p.handle.abort();
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    ctx: TaskContext,
    tasks: TaskSet,
    max_join_attempts: u32,
    join_wait: Duration,
}

impl PipelineBuilder {
    pub fn new(ctx: TaskContext) -> Self {
        let defaults = RuntimeConfig::default();
        Self {
            ctx,
            tasks: TaskSet::default(),
            max_join_attempts: defaults.max_join_attempts,
            join_wait: defaults.join_wait,
        }
    }

    /// Builder with the barrier settings from a validated `config`.
    pub fn from_config(ctx: TaskContext, config: &RuntimeConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self::new(ctx)
            .max_join_attempts(config.max_join_attempts)
            .join_wait(config.join_wait))
    }

    pub fn max_join_attempts(mut self, attempts: u32) -> Self {
        self.max_join_attempts = attempts.max(1);
        self
    }

    pub fn join_wait(mut self, wait: Duration) -> Self {
        self.join_wait = wait;
        self
    }

    /// Replace the task for its stage.
    pub fn task(mut self, task: Arc<dyn AnalysisTask>) -> Self {
        self.tasks.set(task);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            ctx: Arc::new(self.ctx),
            tasks: self.tasks,
            max_join_attempts: self.max_join_attempts,
            join_wait: self.join_wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::*;
    use async_trait::async_trait;
    use ethiscan_core::{ReportStatus, ServiceInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Task that records how often it ran and returns a fixed update.
    struct Counting {
        stage: Stage,
        update: StateUpdate,
        runs: AtomicUsize,
    }

    impl Counting {
        fn new(stage: Stage, update: StateUpdate) -> Arc<Self> {
            Arc::new(Self {
                stage,
                update,
                runs: AtomicUsize::new(0),
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnalysisTask for Counting {
        fn stage(&self) -> Stage {
            self.stage
        }

        async fn run(&self, _state: &PipelineState, _ctx: &TaskContext) -> StateUpdate {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.update.clone()
        }
    }

    fn input() -> PipelineState {
        PipelineState::new(Some("https://svc.example".to_string()), vec![])
    }

    fn pipeline_with(tasks: Vec<Arc<dyn AnalysisTask>>) -> Pipeline {
        tasks
            .into_iter()
            .fold(
                Pipeline::builder(context(FixedProvider::answering("no report"))),
                |builder, task| builder.task(task),
            )
            .join_wait(Duration::from_millis(50))
            .build()
    }

    fn service() -> Arc<Counting> {
        Counting::new(
            Stage::ServiceAnalysis,
            StateUpdate::new().with_service_info(ServiceInfo::default()),
        )
    }

    #[tokio::test]
    async fn test_rejects_missing_input() {
        let pipeline = pipeline_with(vec![]);
        let result = pipeline.run(PipelineState::default()).await;
        assert!(matches!(result, Err(PipelineError::InputError)));
    }

    #[tokio::test]
    async fn test_happy_path_visits_barrier_once() {
        let improvement = Counting::new(Stage::ImprovementGeneration, StateUpdate::new());
        let pipeline = pipeline_with(vec![
            service(),
            Counting::new(
                Stage::EthicalRiskAssessment,
                StateUpdate::new().with_ethical_risks(Default::default()),
            ),
            Counting::new(
                Stage::ToxicClauseDetection,
                StateUpdate::new().with_toxic_clauses(vec![], ethiscan_core::RiskLevel::Low),
            ),
            improvement.clone(),
        ]);

        let state = pipeline.run(input()).await.unwrap();
        assert_eq!(state.join_attempt_count(), 1);
        assert_eq!(improvement.runs(), 1);
        assert!(state.final_report.is_some());
        assert!(state.error_message.is_none());
    }

    #[tokio::test]
    async fn test_service_failure_goes_straight_to_fatal() {
        let ethical = Counting::new(Stage::EthicalRiskAssessment, StateUpdate::new());
        let pipeline = pipeline_with(vec![
            Counting::new(
                Stage::ServiceAnalysis,
                StateUpdate::task_failed(Stage::ServiceAnalysis, "no answer"),
            ),
            ethical.clone(),
        ]);

        let state = pipeline.run(input()).await.unwrap();
        assert_eq!(ethical.runs(), 0);
        assert_eq!(state.join_attempt_count(), 0);
        assert_eq!(state.final_report.unwrap().status, ReportStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_branch_without_completion_exhausts_barrier() {
        let improvement = Counting::new(Stage::ImprovementGeneration, StateUpdate::new());
        let pipeline = pipeline_with(vec![
            service(),
            Counting::new(
                Stage::EthicalRiskAssessment,
                StateUpdate::new().with_ethical_risks(Default::default()),
            ),
            Counting::new(Stage::ToxicClauseDetection, StateUpdate::new()),
            improvement.clone(),
        ]);

        let state = pipeline.run(input()).await.unwrap();
        assert_eq!(state.join_attempt_count(), 5);
        assert_eq!(improvement.runs(), 0);
        assert!(state.error_message.unwrap().contains("Join Barrier"));
        assert_eq!(state.final_report.unwrap().status, ReportStatus::Failed);
    }

    #[test]
    fn test_builder_replaces_by_stage() {
        let fatal = Counting::new(Stage::FatalErrorHandler, StateUpdate::new());
        let builder = Pipeline::builder(context(FixedProvider::answering("")))
            .task(fatal.clone())
            .max_join_attempts(0);
        assert_eq!(builder.max_join_attempts, 1);

        let pipeline = builder.build();
        assert_eq!(pipeline.tasks.fatal.stage(), Stage::FatalErrorHandler);
        assert_eq!(Arc::strong_count(&fatal), 2);
    }

    #[test]
    fn test_from_config_validates() {
        let config = RuntimeConfig {
            max_join_attempts: 0,
            ..Default::default()
        };
        let result = PipelineBuilder::from_config(context(FixedProvider::answering("")), &config);
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }
}
