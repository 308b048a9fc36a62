//! Prompts for the analysis tasks.
//!
//! Each task sends one fixed system prompt and one user prompt built from
//! the pipeline state plus retrieved context. System prompts are constants
//! so identical questions hit the oracle cache.
//!
//! Structured answers are requested as a fenced JSON block; the shapes here
//! must stay in sync with `ethiscan-core/schemas`.

use ethiscan_core::{EthicalRisks, Outcome, PipelineState, RiskDimension, ServiceInfo, ToxicClause};

/// Placeholder sent when retrieval returned nothing.
pub const NO_CONTEXT: &str = "No context available.";

/// Maximum characters of caller-supplied terms or policy text in a prompt.
pub const MAX_INPUT_TEXT_CHARS: usize = 4000;

/// Marker appended to truncated input text.
pub const TRUNCATION_MARKER: &str = "...(이하 생략)";

const UNKNOWN: &str = "알 수 없음";

pub const SERVICE_ANALYSIS_SYSTEM: &str = r#"
당신은 AI 서비스 분석 전문가입니다. 주어진 서비스 URL과 문서를 분석하여 다음 정보를 추출해야 합니다:

1. 서비스 이름
2. 서비스 설명
3. 핵심 기능 목록
4. 대상 사용자 그룹
5. 수집하는 데이터 유형

분석 결과는 JSON 형식으로 반환해주세요.
"#;

pub const ETHICAL_RISK_SYSTEM: &str = r#"
당신은 AI 윤리 전문가입니다. 주어진 AI 서비스 정보를 바탕으로 다음 윤리적 리스크를 평가해야 합니다:

1. 편향성(Bias) 리스크: 서비스가 특정 그룹에 불공정한 결과를 제공할 가능성
2. 프라이버시(Privacy) 리스크: 개인정보 수집, 저장, 활용 과정에서의 위험성
3. 설명가능성(Explainability) 리스크: 서비스 결과에 대한 설명 부족으로 인한 위험성
4. 자동화(Automation) 리스크: 자동화된 의사결정으로 인한 위험성

각 리스크를 '낮음', '중간', '높음' 중 하나로 평가하고, 그 이유를 설명해주세요.
근거는 제공된 문서 발췌에서 찾고, 발췌가 없으면 일반적인 지식에 기반했음을 밝혀주세요.
평가 결과는 JSON 형식으로 반환해주세요.
"#;

pub const TOXIC_CLAUSE_SYSTEM: &str = r#"
당신은 법률 및 약관 분석 전문가입니다. 주어진 서비스 약관과 개인정보처리방침에서 사용자에게 불리한 독소조항을 탐지해야 합니다.

독소조항의 예시:
1. 서비스 제공자의 일방적인 계약 변경/해지 권한
2. 과도한 면책 조항
3. 사용자 데이터의 무제한 활용 권한
4. 사용자 권리 제한 조항
5. 모호하거나 불명확한 의무 규정

탐지된 독소조항과 그 위험성을 JSON 형식으로 반환해주세요.
"#;

pub const IMPROVEMENT_SYSTEM: &str = r#"
당신은 AI 윤리 및 법률 전문가입니다. 주어진 윤리적 리스크와 독소조항에 대한 구체적인 개선 방안을 제시해야 합니다.

각 리스크 항목별로 실행 가능한 개선 방안을 제시하고, 독소조항에 대해서는 공정하고 투명한 대안을 제안해주세요.
개선 방안은 구체적이고 실용적이어야 합니다.

결과는 JSON 형식으로 반환해주세요.
"#;

pub const REPORT_SYSTEM: &str = r#"
당신은 AI 윤리 전문가입니다.
아래 분석 내용을 바탕으로 보고서를 작성하세요.
상단에 SUMMARY를 포함하고, 각 항목은 Markdown 문서 형식으로 구성하세요.

보고서는 다음 항목을 포함해야 합니다:
1. 서비스 개요
2. 윤리성 리스크 평가 (Bias, Privacy, Explainability, Automation Risk)
3. 독소조항 목록 및 평가
4. 서비스 개선 방향 제안
5. 사용된 윤리 가이드라인 명세
"#;

/// Truncate to `max` characters, appending [`TRUNCATION_MARKER`] when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

fn or_no_context(context: &str) -> &str {
    if context.trim().is_empty() {
        NO_CONTEXT
    } else {
        context
    }
}

fn join_or_unknown(items: &[String]) -> String {
    if items.is_empty() {
        UNKNOWN.to_string()
    } else {
        items.join(", ")
    }
}

fn text_or_unknown(text: &str) -> &str {
    if text.trim().is_empty() {
        UNKNOWN
    } else {
        text
    }
}

pub fn service_analysis_user(service_url: Option<&str>, context: &str) -> String {
    format!(
        r#"분석할 서비스 URL: {url}

문서 내용:
{context}

위 정보를 바탕으로 서비스를 분석하고 다음 JSON 형식으로 결과를 반환해주세요:

```json
{{
  "service_name": "서비스 이름",
  "description": "서비스 설명",
  "core_features": ["기능1", "기능2"],
  "target_users": ["사용자 그룹1", "사용자 그룹2"],
  "collected_data_types": ["데이터 유형1", "데이터 유형2"]
}}
```"#,
        url = service_url.unwrap_or(UNKNOWN),
        context = or_no_context(context),
    )
}

fn service_block(info: Option<&ServiceInfo>) -> String {
    let fallback = ServiceInfo::default();
    let info = info.unwrap_or(&fallback);
    format!(
        "서비스 이름: {}\n서비스 설명: {}\n핵심 기능: {}\n대상 사용자: {}\n수집 데이터: {}",
        text_or_unknown(&info.service_name),
        text_or_unknown(&info.description),
        join_or_unknown(&info.core_features),
        join_or_unknown(&info.target_users),
        join_or_unknown(&info.collected_data_types),
    )
}

pub fn ethical_risk_user(info: Option<&ServiceInfo>, guideline: &str, context: &str) -> String {
    format!(
        r#"분석할 서비스 정보:
{service}

적용할 윤리 가이드라인: {guideline}

관련 문서 발췌:
{context}

위 정보를 바탕으로 다음 윤리적 리스크를 평가하고 JSON 형식으로 결과를 반환해주세요:

```json
{{
  "bias_risk": "낮음/중간/높음",
  "privacy_risk": "낮음/중간/높음",
  "explainability_risk": "낮음/중간/높음",
  "automation_risk": "낮음/중간/높음",
  "justification": {{
    "bias_risk": "평가 이유",
    "privacy_risk": "평가 이유",
    "explainability_risk": "평가 이유",
    "automation_risk": "평가 이유"
  }}
}}
```"#,
        service = service_block(info),
        guideline = guideline,
        context = or_no_context(context),
    )
}

pub fn toxic_clause_user(terms: Option<&str>, privacy_policy: Option<&str>, context: &str) -> String {
    let terms = terms
        .map(|t| truncate_chars(t, MAX_INPUT_TEXT_CHARS))
        .unwrap_or_default();
    let privacy_policy = privacy_policy
        .map(|t| truncate_chars(t, MAX_INPUT_TEXT_CHARS))
        .unwrap_or_default();

    format!(
        r#"분석할 약관 내용:
{terms}

분석할 개인정보처리방침 내용:
{privacy}

관련 문서 발췌:
{context}

위 내용에서 사용자에게 불리한 독소조항을 탐지하고 다음 JSON 형식으로 결과를 반환해주세요:

```json
{{
  "toxic_clauses": [
    {{
      "clause": "독소조항 원문",
      "risk_reason": "위험성 설명"
    }}
  ],
  "overall_clause_risk": "낮음/중간/높음"
}}
```"#,
        terms = text_or_unknown(&terms),
        privacy = text_or_unknown(&privacy_policy),
        context = or_no_context(context),
    )
}

fn risk_level_text(risks: Option<&EthicalRisks>, dimension: RiskDimension) -> String {
    risks
        .and_then(|r| r.get(&dimension))
        .map(|a| a.level.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn clause_lines(clauses: &[ToxicClause]) -> String {
    if clauses.is_empty() {
        return "- (없음)".to_string();
    }
    clauses
        .iter()
        .map(|c| format!("- {}", c.clause))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn improvement_user(
    risks: Option<&EthicalRisks>,
    clauses: &[ToxicClause],
    context: &str,
) -> String {
    format!(
        r#"분석된 윤리적 리스크:
- 편향성 리스크: {bias}
- 프라이버시 리스크: {privacy}
- 설명가능성 리스크: {explain}
- 자동화 리스크: {auto}

탐지된 독소조항:
{clauses}

참고할 문서 발췌:
{context}

위 리스크와 독소조항에 대한 구체적인 개선 방안을 다음 JSON 형식으로 제시해주세요:

```json
{{
  "recommendations": {{
    "bias_risk": "편향성 리스크 개선 방안",
    "privacy_risk": "프라이버시 리스크 개선 방안",
    "explainability_risk": "설명가능성 리스크 개선 방안",
    "automation_risk": "자동화 리스크 개선 방안",
    "toxic_clauses": "독소조항 개선 방안"
  }}
}}
```"#,
        bias = risk_level_text(risks, RiskDimension::Bias),
        privacy = risk_level_text(risks, RiskDimension::Privacy),
        explain = risk_level_text(risks, RiskDimension::Explainability),
        auto = risk_level_text(risks, RiskDimension::Automation),
        clauses = clause_lines(clauses),
        context = or_no_context(context),
    )
}

/// User prompt for the report, built from every structured field.
pub fn report_user(state: &PipelineState, guideline: &str, notes: &[String]) -> String {
    let info = state.service_info.as_ref().and_then(Outcome::ready);
    let risks = state.ethical_risks.as_ref().and_then(Outcome::ready);
    let clauses = state
        .toxic_clauses
        .as_ref()
        .and_then(Outcome::ready)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let overall = state
        .overall_clause_risk
        .as_ref()
        .and_then(Outcome::ready)
        .map(|l| l.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());
    let recommendations = state.recommendations.as_ref().and_then(Outcome::ready);

    let mut out = String::new();
    out.push_str("## 서비스 정보\n");
    out.push_str(&service_block(info));

    out.push_str("\n\n## 윤리적 리스크 평가\n");
    for dimension in RiskDimension::ALL {
        let assessment = risks.and_then(|r| r.get(&dimension));
        out.push_str(&format!(
            "- {}: {} ({})\n",
            dimension.label(),
            assessment.map(|a| a.level.to_string()).unwrap_or_else(|| UNKNOWN.to_string()),
            assessment.map(|a| a.justification.as_str()).unwrap_or(UNKNOWN),
        ));
    }

    out.push_str(&format!("\n## 독소조항 분석 (전체 위험도: {})\n", overall));
    if clauses.is_empty() {
        out.push_str("- (없음)\n");
    }
    for clause in clauses {
        out.push_str(&format!("- {}: {}\n", clause.clause, clause.risk_reason));
    }

    out.push_str("\n## 개선 방안\n");
    for dimension in RiskDimension::ALL {
        let text = recommendations
            .and_then(|r| r.by_dimension.get(&dimension))
            .map(String::as_str)
            .unwrap_or(UNKNOWN);
        out.push_str(&format!("- {}: {}\n", dimension.label(), text));
    }
    out.push_str(&format!(
        "- 독소조항: {}\n",
        recommendations
            .and_then(|r| r.toxic_clauses.as_deref())
            .unwrap_or(UNKNOWN)
    ));

    out.push_str(&format!("\n## 적용된 윤리 가이드라인\n{}\n", guideline));

    if !notes.is_empty() {
        out.push_str("\n## 분석 제한 사항\n");
        for note in notes {
            out.push_str(&format!("- {}\n", note));
        }
    }

    out.push_str(
        "\n위 정보를 바탕으로 AI 윤리 리스크 진단 보고서를 작성해주세요. \
         보고서는 Markdown 형식으로 작성하고, 상단에 전체 내용을 요약한 SUMMARY 섹션을 포함해야 합니다.",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethiscan_core::{RiskAssessment, RiskLevel, StateUpdate};

    #[test]
    fn test_truncate_chars_counts_characters() {
        assert_eq!(truncate_chars("약관", 5), "약관");
        let long = "가".repeat(10);
        let cut = truncate_chars(&long, 4);
        assert_eq!(cut, format!("가가가가{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_toxic_prompt_truncates_inputs() {
        let terms = "x".repeat(MAX_INPUT_TEXT_CHARS + 10);
        let prompt = toxic_clause_user(Some(&terms), None, "");
        assert!(prompt.contains(TRUNCATION_MARKER));
        assert!(!prompt.contains(&"x".repeat(MAX_INPUT_TEXT_CHARS + 1)));
        assert!(prompt.contains(NO_CONTEXT));
    }

    #[test]
    fn test_empty_context_is_noted() {
        let prompt = service_analysis_user(Some("https://daglo.ai"), "  ");
        assert!(prompt.contains("https://daglo.ai"));
        assert!(prompt.contains(NO_CONTEXT));

        let prompt = service_analysis_user(None, "[a.txt] text");
        assert!(!prompt.contains(NO_CONTEXT));
    }

    #[test]
    fn test_report_prompt_lists_structured_fields() {
        let mut state = PipelineState::default();
        state.apply(StateUpdate::new().with_service_info(ServiceInfo {
            service_name: "Daglo".to_string(),
            ..Default::default()
        }));
        let mut risks = EthicalRisks::new();
        risks.insert(
            RiskDimension::Privacy,
            RiskAssessment {
                level: RiskLevel::High,
                justification: "indefinite retention".to_string(),
            },
        );
        state.apply(StateUpdate::new().with_ethical_risks(risks));

        let prompt = report_user(&state, "OECD AI 가이드라인", &["retrieval degraded".to_string()]);
        assert!(prompt.contains("서비스 이름: Daglo"));
        assert!(prompt.contains("- Privacy: High (indefinite retention)"));
        assert!(prompt.contains("OECD AI 가이드라인"));
        assert!(prompt.contains("retrieval degraded"));
        assert!(prompt.contains("SUMMARY"));
    }
}
