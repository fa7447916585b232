//! Incident ledger data types

use crate::models::{AnalysisRequest, AnalysisResult, IncidentType, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Incident lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Fixed,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Fixed => "fixed",
        }
    }
}

/// Identity key used to deduplicate incidents.
///
/// At most one open incident may exist per key at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentKey {
    pub timestamp: String,
    pub location: String,
    pub incident_type: IncidentType,
}

impl std::fmt::Display for IncidentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.timestamp, self.location, self.incident_type
        )
    }
}

/// Incident ledger record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub doc_id: String,
    pub organization_id: String,
    pub timestamp: String,
    pub location: String,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub confidence: f32,
    pub description: String,
    pub recommended_action: String,
    pub people_count: Option<i64>,
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn key(&self) -> IncidentKey {
        IncidentKey {
            timestamp: self.timestamp.clone(),
            location: self.location.clone(),
            incident_type: self.incident_type,
        }
    }
}

/// Fields for a new incident record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIncident {
    pub organization_id: String,
    pub timestamp: String,
    pub location: String,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub confidence: f32,
    pub description: String,
    pub recommended_action: String,
    pub people_count: Option<i64>,
}

impl NewIncident {
    /// Build incident fields from a classified frame
    pub fn from_analysis(request: &AnalysisRequest, result: &AnalysisResult) -> Self {
        Self {
            organization_id: request.organization_id.clone(),
            timestamp: request.timestamp.clone(),
            location: request.location.clone(),
            incident_type: result.incident_type,
            severity: result.severity,
            confidence: result.confidence,
            description: result.description.clone(),
            recommended_action: result.recommended_action.clone(),
            people_count: result.people_count,
        }
    }

    pub fn key(&self) -> IncidentKey {
        IncidentKey {
            timestamp: self.timestamp.clone(),
            location: self.location.clone(),
            incident_type: self.incident_type,
        }
    }
}

/// Result of a create attempt.
///
/// A duplicate create against an existing open incident is a no-op, not an
/// error; the caller gets the record that already holds the key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CreateOutcome {
    Created { incident: Incident },
    DuplicateOpen { existing: Incident },
}

/// Result of a resolve attempt.
///
/// Resolving a missing or already-fixed incident is a no-op.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ResolveOutcome {
    Resolved { doc_id: String },
    NoOp,
}
