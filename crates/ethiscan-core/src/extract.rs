//! Structured-data extraction from free-form model answers.
//!
//! Model answers are expected to carry a fenced JSON block. Extraction:
//! 1. Locate the first fenced block and parse it
//! 2. If there is no block, parse the whole answer
//! 3. Validate the value against the schema for the expected response
//! 4. Decode it into the caller's type
//!
//! Steps 1-2 fail with a parse failure ([`ExtractError::is_parse_failure`]),
//! which callers treat differently from a decoded value with missing fields.

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

const SERVICE_INFO_SCHEMA: &str = include_str!("../schemas/service_info.schema.json");
const ETHICAL_RISKS_SCHEMA: &str = include_str!("../schemas/ethical_risks.schema.json");
const TOXIC_CLAUSES_SCHEMA: &str = include_str!("../schemas/toxic_clauses.schema.json");
const RECOMMENDATIONS_SCHEMA: &str = include_str!("../schemas/recommendations.schema.json");

lazy_static! {
    /// A fenced block holding a JSON object or array, with an optional
    /// language tag.
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```[A-Za-z]*\s*(\{.*?\}|\[.*?\])\s*```").unwrap();
}

/// Errors from structured-data extraction.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("No structured data found in response")]
    NoStructuredData,

    #[error("Malformed structured data: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Response does not match expected shape: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("Failed to decode response: {0}")]
    Shape(#[source] serde_json::Error),

    #[error("Schema unavailable: {0}")]
    SchemaUnavailable(String),
}

impl ExtractError {
    /// True when no parseable structured data was found at all.
    pub fn is_parse_failure(&self) -> bool {
        matches!(self, ExtractError::NoStructuredData | ExtractError::Malformed(_))
    }
}

/// Expected response shapes, one per analysis stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSchema {
    ServiceInfo,
    EthicalRisks,
    ToxicClauses,
    Recommendations,
}

impl ResponseSchema {
    fn source(&self) -> &'static str {
        match self {
            ResponseSchema::ServiceInfo => SERVICE_INFO_SCHEMA,
            ResponseSchema::EthicalRisks => ETHICAL_RISKS_SCHEMA,
            ResponseSchema::ToxicClauses => TOXIC_CLAUSES_SCHEMA,
            ResponseSchema::Recommendations => RECOMMENDATIONS_SCHEMA,
        }
    }

    fn cell(&self) -> &'static OnceLock<Result<jsonschema::Validator, String>> {
        static SERVICE_INFO: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();
        static ETHICAL_RISKS: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();
        static TOXIC_CLAUSES: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();
        static RECOMMENDATIONS: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

        match self {
            ResponseSchema::ServiceInfo => &SERVICE_INFO,
            ResponseSchema::EthicalRisks => &ETHICAL_RISKS,
            ResponseSchema::ToxicClauses => &TOXIC_CLAUSES,
            ResponseSchema::Recommendations => &RECOMMENDATIONS,
        }
    }

    /// Get or compile the validator for this schema.
    fn validator(&self) -> Result<&'static jsonschema::Validator, ExtractError> {
        let compiled = self.cell().get_or_init(|| {
            let schema: Value = serde_json::from_str(self.source())
                .map_err(|e| format!("Invalid schema JSON: {}", e))?;
            jsonschema::options()
                .build(&schema)
                .map_err(|e| format!("Failed to compile schema: {}", e))
        });

        compiled
            .as_ref()
            .map_err(|e| ExtractError::SchemaUnavailable(e.clone()))
    }

    /// Validate a value, collecting every violation.
    pub fn validate(&self, value: &Value) -> Result<(), ExtractError> {
        let validator = self.validator()?;
        let errors: Vec<String> = validator
            .iter_errors(value)
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ExtractError::SchemaViolation(errors))
        }
    }
}

/// Return the body of the first fenced structured-data block, if any.
pub fn locate_block(text: &str) -> Option<&str> {
    FENCED_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Parse structured data out of a model answer.
///
/// A fenced block wins; otherwise the whole answer must be valid JSON.
pub fn parse_structured(text: &str) -> Result<Value, ExtractError> {
    if let Some(block) = locate_block(text) {
        return serde_json::from_str(block).map_err(ExtractError::Malformed);
    }

    serde_json::from_str(text.trim()).map_err(|_| ExtractError::NoStructuredData)
}

/// Parse, validate and decode a model answer into `T`.
pub fn parse_response<T: DeserializeOwned>(
    text: &str,
    schema: ResponseSchema,
) -> Result<T, ExtractError> {
    let value = parse_structured(text)?;
    schema.validate(&value)?;
    serde_json::from_value(value).map_err(ExtractError::Shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct ServiceName {
        #[serde(default)]
        service_name: String,
    }

    #[test]
    fn test_fenced_block_is_preferred() {
        let answer = "Here you go:\n```json\n{\"service_name\": \"Daglo\"}\n```\nThanks!";
        assert_eq!(locate_block(answer), Some("{\"service_name\": \"Daglo\"}"));

        let parsed: ServiceName = parse_response(answer, ResponseSchema::ServiceInfo).unwrap();
        assert_eq!(parsed.service_name, "Daglo");
    }

    #[test]
    fn test_nested_object_in_block() {
        let answer = r#"```json
{"bias_risk": "높음", "justification": {"bias_risk": "skewed"}}
```"#;
        let value = parse_structured(answer).unwrap();
        assert_eq!(value["justification"]["bias_risk"], "skewed");
    }

    #[test]
    fn test_untagged_fence() {
        let answer = "```\n{\"service_name\": \"A\"}\n```";
        let value = parse_structured(answer).unwrap();
        assert_eq!(value["service_name"], "A");
    }

    #[test]
    fn test_whole_text_fallback_matches_fenced() {
        let fenced = "```json\n{\"service_name\": \"X\"}\n```";
        let bare = "  {\"service_name\": \"X\"}  ";

        let a: ServiceName = parse_response(fenced, ResponseSchema::ServiceInfo).unwrap();
        let b: ServiceName = parse_response(bare, ResponseSchema::ServiceInfo).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unparseable_is_parse_failure() {
        let err = parse_structured("I could not analyze this service.").unwrap_err();
        assert!(matches!(err, ExtractError::NoStructuredData));
        assert!(err.is_parse_failure());

        let err = parse_structured("```json\n{\"broken\": }\n```").unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
        assert!(err.is_parse_failure());
    }

    #[test]
    fn test_missing_field_is_not_parse_failure() {
        let err = parse_response::<ServiceName>("{\"overall_clause_risk\": \"높음\"}", ResponseSchema::ToxicClauses)
            .unwrap_err();
        assert!(matches!(err, ExtractError::SchemaViolation(_)));
        assert!(!err.is_parse_failure());
    }

    #[test]
    fn test_schema_rejects_wrong_types() {
        let value = serde_json::json!({"toxic_clauses": [{"clause": 7}]});
        assert!(ResponseSchema::ToxicClauses.validate(&value).is_err());

        let value = serde_json::json!({"toxic_clauses": [{"clause": "a", "risk_reason": "b"}]});
        assert!(ResponseSchema::ToxicClauses.validate(&value).is_ok());
    }

    #[test]
    fn test_every_schema_compiles() {
        for schema in [
            ResponseSchema::ServiceInfo,
            ResponseSchema::EthicalRisks,
            ResponseSchema::ToxicClauses,
            ResponseSchema::Recommendations,
        ] {
            assert!(schema.validator().is_ok(), "{:?} failed to compile", schema);
        }
    }
}
