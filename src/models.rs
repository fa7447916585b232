//! Shared models and types for the triage server
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub broker_connected: bool,
    pub ledger_connected: bool,
}

/// Location recorded when a frame arrives without one
pub const DEFAULT_LOCATION: &str = "unspecified";

/// A single frame submitted for analysis.
///
/// Immutable once created; one request drives one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Raw image bytes (JPEG/PNG as received)
    #[serde(skip)]
    pub image: Vec<u8>,
    /// Capture time, caller-supplied or generated at ingest
    pub timestamp: String,
    /// Location / camera identifier
    pub location: String,
    /// Owning organization (required, non-empty)
    pub organization_id: String,
}

impl AnalysisRequest {
    pub fn new(
        image: Vec<u8>,
        timestamp: Option<String>,
        location: Option<String>,
        organization_id: String,
    ) -> Result<Self> {
        if organization_id.trim().is_empty() {
            return Err(Error::Validation("organization_id is required".to_string()));
        }
        let timestamp = timestamp
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(ingest_timestamp);
        let location = location
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string());
        Ok(Self {
            image,
            timestamp,
            location,
            organization_id,
        })
    }
}

/// Timestamp format used across envelopes and the ledger identity key
pub fn ingest_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Strip the markdown code fences models sometimes wrap JSON output in
pub fn strip_model_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        return rest.split("```").next().unwrap_or("").trim();
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        return rest.split("```").next().unwrap_or("").trim();
    }
    trimmed
}

/// Incident category produced by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    Fire,
    Fight,
    Stampede,
    MedicalEmergency,
    SuspiciousActivity,
    UnauthorizedAccess,
    Vandalism,
    WeaponDetected,
    Hazard,
    Overcrowding,
    LostPerson,
    NaturalHazard,
    Normal,
    Other,
}

impl IncidentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::Fire => "fire",
            IncidentType::Fight => "fight",
            IncidentType::Stampede => "stampede",
            IncidentType::MedicalEmergency => "medical_emergency",
            IncidentType::SuspiciousActivity => "suspicious_activity",
            IncidentType::UnauthorizedAccess => "unauthorized_access",
            IncidentType::Vandalism => "vandalism",
            IncidentType::WeaponDetected => "weapon_detected",
            IncidentType::Hazard => "hazard",
            IncidentType::Overcrowding => "overcrowding",
            IncidentType::LostPerson => "lost_person",
            IncidentType::NaturalHazard => "natural_hazard",
            IncidentType::Normal => "normal",
            IncidentType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| Error::Classification(format!("unknown incident_type: {}", s)))
    }
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency level; ordered so `>= High` selects alert-worthy incidents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| Error::Classification(format!("unknown severity: {}", s)))
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured judgment returned by the classifier for one frame.
///
/// Produced once per request; immutable thereafter. Severity is only
/// meaningful when a problem is reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub is_problem: bool,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub confidence: f32,
    pub description: String,
    pub recommended_action: String,
    #[serde(default)]
    pub people_count: Option<i64>,
    #[serde(default)]
    pub additional_concerns: Vec<String>,
}

impl AnalysisResult {
    /// Reject values outside declared bounds.
    ///
    /// Enum fields are already enforced by deserialization; this covers the
    /// numeric invariants the schema cannot express.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) || !self.confidence.is_finite() {
            return Err(Error::Classification(format!(
                "confidence out of range [0,1]: {}",
                self.confidence
            )));
        }
        if let Some(count) = self.people_count {
            if count < 0 {
                return Err(Error::Classification(format!(
                    "people_count must be >= 0, got {}",
                    count
                )));
            }
        }
        Ok(())
    }

    /// Whether this judgment reports an actionable problem
    pub fn reports_problem(&self) -> bool {
        self.is_problem && self.incident_type != IncidentType::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(confidence: f32, people_count: Option<i64>) -> AnalysisResult {
        AnalysisResult {
            is_problem: true,
            incident_type: IncidentType::Fire,
            severity: Severity::High,
            confidence,
            description: "smoke near the north exit".to_string(),
            recommended_action: "dispatch security".to_string(),
            people_count,
            additional_concerns: vec![],
        }
    }

    #[test]
    fn confidence_bounds_enforced() {
        assert!(result_with(0.0, None).validate().is_ok());
        assert!(result_with(1.0, None).validate().is_ok());
        assert!(result_with(1.2, None).validate().is_err());
        assert!(result_with(-0.1, None).validate().is_err());
        assert!(result_with(f32::NAN, None).validate().is_err());
    }

    #[test]
    fn people_count_must_be_non_negative() {
        assert!(result_with(0.9, Some(0)).validate().is_ok());
        assert!(result_with(0.9, Some(12)).validate().is_ok());
        assert!(result_with(0.9, Some(-1)).validate().is_err());
    }

    #[test]
    fn incident_type_round_trips_snake_case() {
        let json = serde_json::to_string(&IncidentType::MedicalEmergency).unwrap();
        assert_eq!(json, "\"medical_emergency\"");
        assert_eq!(
            IncidentType::parse("weapon_detected").unwrap(),
            IncidentType::WeaponDetected
        );
        assert!(IncidentType::parse("earthquake").is_err());
    }

    #[test]
    fn severity_ordering_selects_alert_levels() {
        assert!(Severity::Critical >= Severity::High);
        assert!(Severity::High >= Severity::High);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::parse("zero").is_err());
    }

    #[test]
    fn request_requires_organization_id() {
        assert!(AnalysisRequest::new(vec![1], None, None, "".to_string()).is_err());

        let req =
            AnalysisRequest::new(vec![1], None, None, "org-1".to_string()).unwrap();
        assert_eq!(req.location, DEFAULT_LOCATION);
        assert!(!req.timestamp.is_empty());
    }

    #[test]
    fn fence_stripping_handles_all_wrappings() {
        assert_eq!(strip_model_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_model_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_model_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_model_fences("  \n{\"a\": 1}\n  "), "{\"a\": 1}");
    }

    #[test]
    fn normal_result_reports_no_problem() {
        let mut r = result_with(0.8, None);
        r.is_problem = false;
        assert!(!r.reports_problem());
        r.is_problem = true;
        r.incident_type = IncidentType::Normal;
        assert!(!r.reports_problem());
    }
}
