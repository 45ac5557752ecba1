//! Typed submission input and its validation
//!
//! Requirement fields arrive loosely typed (numbers or numeric strings),
//! so each slot holds a raw JSON value until [`SubmitRequest::validate`]
//! turns the whole input into a [`ValidSubmission`].

use crate::error::{PortalError, Result};
use crate::models::{ResourceVector, DEFAULT_RUNTIME};
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw requirement slots as received at the boundary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementsInput {
    #[serde(default)]
    pub gpu_count: Option<Value>,
    #[serde(default)]
    pub cpu_cores: Option<Value>,
    #[serde(default)]
    pub memory_gb: Option<Value>,
    #[serde(default)]
    pub storage_tb: Option<Value>,
}

/// Submission payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub organisation: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub preferred_runtime: Option<String>,
    #[serde(default)]
    pub preferred_image: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub deadline: Option<String>,
    /// Kept raw so a non-object value is reported against `requirements`
    #[serde(default)]
    pub requirements: Option<Value>,
}

/// Submission that passed validation, defaults applied
#[derive(Debug, Clone, PartialEq)]
pub struct ValidSubmission {
    pub project_name: String,
    pub owner: String,
    pub organisation: String,
    pub summary: String,
    pub preferred_runtime: String,
    pub preferred_image: Option<String>,
    pub tags: Vec<String>,
    pub deadline: Option<NaiveDate>,
    pub requirements: ResourceVector,
}

impl SubmitRequest {
    /// Parse an arbitrary JSON body, reporting shape errors as validation errors
    pub fn from_json(body: Value) -> Result<Self> {
        if !body.is_object() {
            return Err(PortalError::validation("body", "expected a JSON object"));
        }
        serde_json::from_value(body).map_err(|e| PortalError::validation("body", e.to_string()))
    }

    pub fn validate(self) -> Result<ValidSubmission> {
        let requirements = match self.requirements {
            None | Some(Value::Null) => {
                return Err(PortalError::validation("requirements", "missing"))
            }
            Some(value @ Value::Object(_)) => serde_json::from_value::<RequirementsInput>(value)
                .map_err(|e| PortalError::validation("requirements", e.to_string()))?,
            Some(_) => {
                return Err(PortalError::validation(
                    "requirements",
                    "expected an object",
                ))
            }
        };
        let requirements = parse_requirements(&requirements)?;

        let project_name = required_text("projectName", self.project_name)?;
        let owner = required_text("owner", self.owner)?;
        let deadline = self.deadline.as_deref().map(parse_deadline).transpose()?;

        let preferred_runtime = self
            .preferred_runtime
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_RUNTIME.to_string());

        Ok(ValidSubmission {
            project_name,
            owner,
            organisation: self.organisation.unwrap_or_default().trim().to_string(),
            summary: self.summary.unwrap_or_default(),
            preferred_runtime,
            preferred_image: self
                .preferred_image
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            tags: self.tags.unwrap_or_default(),
            deadline,
            requirements,
        })
    }
}

fn parse_requirements(input: &RequirementsInput) -> Result<ResourceVector> {
    Ok(ResourceVector {
        gpu_count: parse_quantity("gpuCount", input.gpu_count.as_ref())?,
        cpu_cores: parse_quantity("cpuCores", input.cpu_cores.as_ref())?,
        memory_gb: parse_quantity("memoryGb", input.memory_gb.as_ref())?,
        storage_tb: parse_quantity("storageTb", input.storage_tb.as_ref())?,
    })
}

/// Accept a JSON number or a decimal string; must be finite and non-negative
pub fn parse_quantity(field: &str, value: Option<&Value>) -> Result<f64> {
    let value = value.ok_or_else(|| PortalError::validation(field, "missing"))?;

    let parsed = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| PortalError::validation(field, "not representable as a number"))?,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err(PortalError::validation(field, "empty string"));
            }
            trimmed
                .parse::<f64>()
                .map_err(|_| PortalError::validation(field, format!("'{}' is not a number", s)))?
        }
        Value::Null => return Err(PortalError::validation(field, "missing")),
        other => {
            return Err(PortalError::validation(
                field,
                format!("expected a number, got {}", json_kind(other)),
            ))
        }
    };

    if !parsed.is_finite() {
        return Err(PortalError::validation(field, "must be finite"));
    }
    if parsed < 0.0 {
        return Err(PortalError::validation(field, "must not be negative"));
    }

    Ok(parsed)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn required_text(field: &str, value: Option<String>) -> Result<String> {
    match value.map(|s| s.trim().to_string()) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(PortalError::validation(field, "missing")),
    }
}

fn parse_deadline(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.date_naive()))
        .map_err(|_| {
            PortalError::validation("deadline", format!("'{}' is not a date (YYYY-MM-DD)", raw))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_of(err: PortalError) -> String {
        match err {
            PortalError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    fn submission(requirements: Value) -> SubmitRequest {
        SubmitRequest::from_json(json!({
            "projectName": "genomics",
            "owner": "alice",
            "requirements": requirements,
        }))
        .unwrap()
    }

    #[test]
    fn test_string_encoded_numbers_round_trip() {
        let valid = submission(json!({
            "gpuCount": "4",
            "cpuCores": " 16 ",
            "memoryGb": 64.5,
            "storageTb": "0.25"
        }))
        .validate()
        .unwrap();

        assert_eq!(valid.requirements, ResourceVector::new(4.0, 16.0, 64.5, 0.25));
        assert_eq!(valid.preferred_runtime, "kubernetes");
        assert!(valid.tags.is_empty());
    }

    #[test]
    fn test_missing_requirements_object() {
        let err = SubmitRequest::from_json(json!({"projectName": "p", "owner": "o"}))
            .unwrap()
            .validate()
            .unwrap_err();
        assert_eq!(field_of(err), "requirements");
    }

    #[test]
    fn test_non_object_requirements_named_first() {
        for bad in [json!(5), json!("gpu"), json!([1, 2, 3, 4])] {
            let err = SubmitRequest::from_json(json!({
                "owner": "alice",
                "requirements": bad
            }))
            .unwrap()
            .validate()
            .unwrap_err();
            assert_eq!(field_of(err), "requirements", "value {:?}", bad);
        }
    }

    #[test]
    fn test_first_offending_field_is_named() {
        let err = submission(json!({
            "gpuCount": 1,
            "cpuCores": -2,
            "memoryGb": "abc",
            "storageTb": 1
        }))
        .validate()
        .unwrap_err();
        assert_eq!(field_of(err), "cpuCores");

        let err = submission(json!({"gpuCount": 1, "cpuCores": 2, "memoryGb": 3}))
            .validate()
            .unwrap_err();
        assert_eq!(field_of(err), "storageTb");
    }

    #[test]
    fn test_rejects_non_numeric_values() {
        for bad in [json!(true), json!("NaN"), json!("inf"), json!(""), json!([1]), json!(null), json!("-1")] {
            let err = submission(json!({
                "gpuCount": bad,
                "cpuCores": 1,
                "memoryGb": 1,
                "storageTb": 1
            }))
            .validate()
            .unwrap_err();
            assert_eq!(field_of(err), "gpuCount", "value {:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_owner_and_project_required() {
        let err = SubmitRequest::from_json(json!({
            "projectName": "  ",
            "owner": "alice",
            "requirements": {"gpuCount": 0, "cpuCores": 0, "memoryGb": 0, "storageTb": 0}
        }))
        .unwrap()
        .validate()
        .unwrap_err();
        assert_eq!(field_of(err), "projectName");
    }

    #[test]
    fn test_deadline_formats() {
        let mut req = submission(json!({"gpuCount": 0, "cpuCores": 1, "memoryGb": 1, "storageTb": 0}));
        req.deadline = Some("2026-12-31".to_string());
        assert_eq!(
            req.clone().validate().unwrap().deadline,
            NaiveDate::from_ymd_opt(2026, 12, 31)
        );

        req.deadline = Some("2026-12-31T10:00:00Z".to_string());
        assert!(req.clone().validate().is_ok());

        req.deadline = Some("next week".to_string());
        assert_eq!(field_of(req.validate().unwrap_err()), "deadline");
    }

    #[test]
    fn test_malformed_body_shape() {
        let err = SubmitRequest::from_json(json!({"tags": "not-a-list"})).unwrap_err();
        assert_eq!(field_of(err), "body");

        let err = SubmitRequest::from_json(json!([1, 2])).unwrap_err();
        assert_eq!(field_of(err), "body");
    }
}
