//! Report persistence and deterministic report bodies.
//!
//! [`ReportRenderer`] writes two files per run into its directory:
//! `<service>_ethics_report_<YYYYmmdd_HHMMSS>.md` with the Markdown body and
//! a `.json` twin holding the full pipeline state.

use chrono::{DateTime, Local, Utc};
use ethiscan_core::{FinalReport, Outcome, PipelineState, RiskDimension};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Writes report artifacts to a directory.
#[derive(Debug, Clone)]
pub struct ReportRenderer {
    dir: PathBuf,
}

impl ReportRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the Markdown body and the state JSON. Returns the written paths.
    ///
    /// `report` is embedded into the JSON as `final_report`, with its
    /// `output_paths` already pointing at both files.
    pub fn render(&self, state: &PipelineState, report: &FinalReport) -> io::Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.dir)?;

        let stem = format!(
            "{}_ethics_report_{}",
            file_stem(&service_label(state)),
            report
                .generated_at
                .with_timezone(&Local)
                .format("%Y%m%d_%H%M%S")
        );
        let markdown_path = self.dir.join(format!("{}.md", stem));
        let json_path = self.dir.join(format!("{}.json", stem));

        let markdown = report
            .markdown
            .clone()
            .unwrap_or_else(|| failure_markdown(state, report));
        fs::write(&markdown_path, markdown)?;

        let mut snapshot = state.clone();
        let mut final_report = report.clone();
        final_report.output_paths = vec![markdown_path.clone(), json_path.clone()];
        snapshot.final_report = Some(final_report);

        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&json_path, json)?;

        tracing::info!(
            markdown = %markdown_path.display(),
            json = %json_path.display(),
            "Report written"
        );
        Ok(vec![markdown_path, json_path])
    }
}

/// Name used for the service in file names and headings.
pub fn service_label(state: &PipelineState) -> String {
    state
        .service_info
        .as_ref()
        .and_then(Outcome::ready)
        .map(|info| info.service_name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| state.service_url.clone())
        .unwrap_or_else(|| "service".to_string())
}

fn file_stem(label: &str) -> String {
    let stem: String = label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('_').to_string();
    if stem.is_empty() {
        "service".to_string()
    } else {
        stem
    }
}

fn stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Report body built from the structured fields alone, used when the
/// report oracle call fails.
pub fn fallback_markdown(state: &PipelineState, guideline: &str, summary: &str) -> String {
    let mut out = format!("# AI 윤리 리스크 진단 보고서: {}\n\n", service_label(state));
    out.push_str(&format!("## SUMMARY\n{}\n\n", summary));

    out.push_str("## 1. 서비스 개요\n");
    match state.service_info.as_ref() {
        Some(Outcome::Ready(info)) => {
            out.push_str(&format!("- 설명: {}\n", info.description));
            out.push_str(&format!("- 핵심 기능: {}\n", info.core_features.join(", ")));
            out.push_str(&format!("- 대상 사용자: {}\n", info.target_users.join(", ")));
            out.push_str(&format!(
                "- 수집 데이터: {}\n",
                info.collected_data_types.join(", ")
            ));
        }
        Some(Outcome::Failed { error }) => out.push_str(&format!("- 분석 실패: {}\n", error)),
        None => out.push_str("- 분석 결과 없음\n"),
    }

    out.push_str("\n## 2. 윤리성 리스크 평가\n");
    match state.ethical_risks.as_ref() {
        Some(Outcome::Ready(risks)) => {
            out.push_str("| 항목 | 수준 | 근거 |\n|---|---|---|\n");
            for dimension in RiskDimension::ALL {
                if let Some(assessment) = risks.get(&dimension) {
                    out.push_str(&format!(
                        "| {} | {} | {} |\n",
                        dimension.label(),
                        assessment.level,
                        assessment.justification.replace('|', "/")
                    ));
                }
            }
        }
        Some(Outcome::Failed { error }) => out.push_str(&format!("- 평가 실패: {}\n", error)),
        None => out.push_str("- 평가 결과 없음\n"),
    }

    out.push_str("\n## 3. 독소조항 목록 및 평가\n");
    if let Some(Outcome::Ready(level)) = state.overall_clause_risk.as_ref() {
        out.push_str(&format!("전체 위험도: {}\n\n", level));
    }
    match state.toxic_clauses.as_ref() {
        Some(Outcome::Ready(clauses)) if clauses.is_empty() => out.push_str("- 탐지된 독소조항 없음\n"),
        Some(Outcome::Ready(clauses)) => {
            for clause in clauses {
                out.push_str(&format!("- **{}**: {}\n", clause.clause, clause.risk_reason));
            }
        }
        Some(Outcome::Failed { error }) => out.push_str(&format!("- 탐지 실패: {}\n", error)),
        None => out.push_str("- 탐지 결과 없음\n"),
    }

    out.push_str("\n## 4. 서비스 개선 방향 제안\n");
    match state.recommendations.as_ref() {
        Some(Outcome::Ready(recommendations)) => {
            for (dimension, text) in &recommendations.by_dimension {
                out.push_str(&format!("- {}: {}\n", dimension.label(), text));
            }
            if let Some(text) = &recommendations.toxic_clauses {
                out.push_str(&format!("- 독소조항: {}\n", text));
            }
        }
        Some(Outcome::Failed { error }) => out.push_str(&format!("- 제안 실패: {}\n", error)),
        None => out.push_str("- 제안 없음\n"),
    }

    out.push_str(&format!("\n## 5. 사용된 윤리 가이드라인\n{}\n", guideline));
    out
}

/// Report body for a failed run.
pub fn failure_markdown(state: &PipelineState, report: &FinalReport) -> String {
    let mut out = format!("# AI 윤리 리스크 진단 실패: {}\n\n", service_label(state));
    out.push_str(&format!("- 상태: {}\n", report.status));
    out.push_str(&format!("- 생성 시각: {}\n\n", stamp(report.generated_at)));
    out.push_str(&format!("## SUMMARY\n{}\n\n", report.summary));
    if let Some(details) = &report.error_details {
        out.push_str("## 오류 내역\n```\n");
        out.push_str(details);
        out.push_str("\n```\n");
    }
    out
}
