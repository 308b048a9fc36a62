//! Domain types shared by every pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A pipeline stage. Used for error attribution and usage accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ServiceAnalysis,
    EthicalRiskAssessment,
    ToxicClauseDetection,
    ImprovementGeneration,
    ReportComposition,
    FatalErrorHandler,
}

impl Stage {
    /// Human-readable stage name, used as the prefix of appended error text.
    pub fn display_name(&self) -> &'static str {
        match self {
            Stage::ServiceAnalysis => "Service Analysis",
            Stage::EthicalRiskAssessment => "Ethical Risk Assessment",
            Stage::ToxicClauseDetection => "Toxic Clause Detection",
            Stage::ImprovementGeneration => "Improvement Generation",
            Stage::ReportComposition => "Report Composition",
            Stage::FatalErrorHandler => "Fatal Error Handler",
        }
    }

    /// The parallel branch this stage runs as, if any.
    pub fn branch(&self) -> Option<Branch> {
        match self {
            Stage::EthicalRiskAssessment => Some(Branch::EthicalRisk),
            Stage::ToxicClauseDetection => Some(Branch::ToxicClause),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One of the two branches between fan-out and the join barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    EthicalRisk,
    ToxicClause,
}

impl Branch {
    pub const ALL: [Branch; 2] = [Branch::EthicalRisk, Branch::ToxicClause];

    pub fn stage(&self) -> Stage {
        match self {
            Branch::EthicalRisk => Stage::EthicalRiskAssessment,
            Branch::ToxicClause => Stage::ToxicClauseDetection,
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stage().display_name())
    }
}

/// Output of a task that may have failed.
///
/// A failed task still writes its field, as `Failed`, so downstream stages
/// always see the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome<T> {
    Ready(T),
    Failed { error: String },
}

impl<T> Outcome<T> {
    pub fn failed(error: impl Into<String>) -> Self {
        Outcome::Failed {
            error: error.into(),
        }
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Outcome::Ready(value) => Some(value),
            Outcome::Failed { .. } => None,
        }
    }
}

/// Qualitative risk level.
///
/// Accepts English and Korean spellings when decoding model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "low", alias = "Low", alias = "LOW", alias = "낮음")]
    Low,
    #[serde(rename = "medium", alias = "Medium", alias = "MEDIUM", alias = "중간")]
    Medium,
    #[serde(rename = "high", alias = "High", alias = "HIGH", alias = "높음")]
    High,
}

impl RiskLevel {
    /// Parse a free-form level string, as found in justification-style answers.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "low" | "낮음" => Some(RiskLevel::Low),
            "medium" | "moderate" | "중간" => Some(RiskLevel::Medium),
            "high" | "높음" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "Low"),
            RiskLevel::Medium => write!(f, "Medium"),
            RiskLevel::High => write!(f, "High"),
        }
    }
}

/// Ethical risk dimensions evaluated by the risk assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskDimension {
    #[serde(rename = "bias_risk")]
    Bias,
    #[serde(rename = "privacy_risk")]
    Privacy,
    #[serde(rename = "explainability_risk")]
    Explainability,
    #[serde(rename = "automation_risk")]
    Automation,
}

impl RiskDimension {
    pub const ALL: [RiskDimension; 4] = [
        RiskDimension::Bias,
        RiskDimension::Privacy,
        RiskDimension::Explainability,
        RiskDimension::Automation,
    ];

    /// Key used in structured model responses.
    pub fn key(&self) -> &'static str {
        match self {
            RiskDimension::Bias => "bias_risk",
            RiskDimension::Privacy => "privacy_risk",
            RiskDimension::Explainability => "explainability_risk",
            RiskDimension::Automation => "automation_risk",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskDimension::Bias => "Bias",
            RiskDimension::Privacy => "Privacy",
            RiskDimension::Explainability => "Explainability",
            RiskDimension::Automation => "Automation",
        }
    }

    /// Aspect-specific retrieval queries for this dimension.
    ///
    /// Each aspect is queried separately so one concern cannot crowd out
    /// another in the top-k.
    pub fn aspects(&self) -> &'static [&'static str] {
        match self {
            RiskDimension::Bias => &[
                "training data composition and representativeness",
                "unequal outcomes across user groups or demographics",
                "fairness testing and bias monitoring",
            ],
            RiskDimension::Privacy => &[
                "personal data collected from users",
                "data retention period and deletion policy",
                "sharing of user data with third parties",
            ],
            RiskDimension::Explainability => &[
                "explanation of how results are generated",
                "disclosure of AI involvement to users",
                "user ability to contest or appeal results",
            ],
            RiskDimension::Automation => &[
                "automated decisions made without human review",
                "human oversight and manual intervention options",
                "impact of automated errors on users",
            ],
        }
    }
}

impl fmt::Display for RiskDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Output of the service analysis stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceInfo {
    pub service_name: String,
    pub description: String,
    pub core_features: Vec<String>,
    pub target_users: Vec<String>,
    pub collected_data_types: Vec<String>,
}

/// Level and justification for one risk dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub justification: String,
}

/// Assessed ethical risks, keyed by dimension.
pub type EthicalRisks = BTreeMap<RiskDimension, RiskAssessment>;

/// A contract clause unfavorable to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToxicClause {
    pub clause: String,
    #[serde(default)]
    pub risk_reason: String,
}

/// Remediation proposals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub by_dimension: BTreeMap<RiskDimension, String>,
    pub toxic_clauses: Option<String>,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "Success")]
    Success,
    #[serde(rename = "Partial Success")]
    PartialSuccess,
    #[serde(rename = "Failed")]
    Failed,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Success => write!(f, "Success"),
            ReportStatus::PartialSuccess => write!(f, "Partial Success"),
            ReportStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// The terminal artifact of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub status: ReportStatus,

    /// Summary text (the SUMMARY section of the report, or the failure summary)
    pub summary: String,

    /// Rendered Markdown body, when one was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,

    /// Files written by the report renderer
    #[serde(default)]
    pub output_paths: Vec<PathBuf>,

    /// Accumulated error text for failed or partial runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,

    /// Reasons for a partial result
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,

    pub generated_at: DateTime<Utc>,
}

impl FinalReport {
    /// Terminal report for a failed run.
    pub fn failed(error_details: impl Into<String>) -> Self {
        Self {
            status: ReportStatus::Failed,
            summary: "AI ethics risk diagnosis did not complete.".to_string(),
            markdown: None,
            output_paths: Vec::new(),
            error_details: Some(error_details.into()),
            notes: Vec::new(),
            generated_at: Utc::now(),
        }
    }
}
