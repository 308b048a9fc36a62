//! Terminal stage of a healthy run: write the report.

use async_trait::async_trait;
use chrono::Utc;
use ethiscan_core::{FinalReport, Outcome, PipelineState, ReportStatus, Stage, StateUpdate};
use lazy_static::lazy_static;
use regex::Regex;

use super::{AnalysisTask, RetrievalStatus, TaskContext};
use crate::prompts;
use crate::report::{fallback_markdown, service_label};

/// Summary used when the report has no SUMMARY section.
pub const MISSING_SUMMARY: &str = "요약 정보를 찾을 수 없습니다.";

lazy_static! {
    static ref SUMMARY_SECTION: Regex =
        Regex::new(r"(?s)SUMMARY[:\s]*(.*?)(?:\n\n|\n#)").unwrap();
}

/// Text of the SUMMARY section of a Markdown report.
pub fn extract_summary(markdown: &str) -> String {
    let padded = format!("{}\n\n", markdown);
    SUMMARY_SECTION
        .captures(&padded)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| MISSING_SUMMARY.to_string())
}

/// One-paragraph summary built from the structured fields.
fn structured_summary(state: &PipelineState) -> String {
    let high_risks: Vec<&str> = state
        .ethical_risks
        .as_ref()
        .and_then(Outcome::ready)
        .map(|risks| {
            risks
                .iter()
                .filter(|(_, a)| a.level == ethiscan_core::RiskLevel::High)
                .map(|(d, _)| d.label())
                .collect()
        })
        .unwrap_or_default();
    let clause_count = state
        .toxic_clauses
        .as_ref()
        .and_then(Outcome::ready)
        .map_or(0, Vec::len);

    let high = if high_risks.is_empty() {
        "없음".to_string()
    } else {
        high_risks.join(", ")
    };
    format!(
        "{} 진단 결과: 높음 등급 리스크 {}, 독소조항 {}건.",
        service_label(state),
        high,
        clause_count
    )
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReportComposerTask;

#[async_trait]
impl AnalysisTask for ReportComposerTask {
    fn stage(&self) -> Stage {
        Stage::ReportComposition
    }

    async fn run(&self, state: &PipelineState, ctx: &TaskContext) -> StateUpdate {
        if state.has_error() {
            return StateUpdate::pass_through(self.stage());
        }

        let mut notes = Vec::new();
        match ctx.retrieval_status() {
            RetrievalStatus::Full => {}
            RetrievalStatus::Degraded => {
                notes.push("Retrieval ran on a single index; document grounding is partial".to_string())
            }
            RetrievalStatus::Unavailable => {
                notes.push("Retrieval unavailable; analysis used no document context".to_string())
            }
        }

        let user = prompts::report_user(state, &ctx.guideline, &notes);
        let (markdown, summary) = match ctx
            .oracle
            .ask(self.stage(), prompts::REPORT_SYSTEM, &user)
            .await
        {
            Ok(markdown) => {
                let summary = extract_summary(&markdown);
                (markdown, summary)
            }
            Err(e) => {
                tracing::warn!(stage = %self.stage(), error = %e, "Report oracle failed; using fallback body");
                notes.push(format!("Report written from structured results: {}", e));
                let summary = structured_summary(state);
                (fallback_markdown(state, &ctx.guideline, &summary), summary)
            }
        };

        let mut report = FinalReport {
            status: ReportStatus::Success,
            summary,
            markdown: Some(markdown),
            output_paths: Vec::new(),
            error_details: None,
            notes,
            generated_at: Utc::now(),
        };

        if let Some(renderer) = &ctx.renderer {
            match renderer.render(state, &report) {
                Ok(paths) => report.output_paths = paths,
                Err(e) => {
                    tracing::warn!(dir = %renderer.dir().display(), error = %e, "Report not persisted");
                    report.notes.push(format!("Report files not written: {}", e));
                }
            }
        }

        if !report.notes.is_empty() {
            report.status = ReportStatus::PartialSuccess;
        }

        tracing::info!(status = %report.status, notes = report.notes.len(), "Report composed");
        StateUpdate::new().with_final_report(report)
    }
}
