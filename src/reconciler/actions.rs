//! Closed action set for ledger reconciliation

use crate::error::{Error, Result};
use crate::models::{strip_model_fences, IncidentType};
use serde::{Deserialize, Serialize};

/// One ledger action proposed by the decision-maker.
///
/// The set is closed: anything outside these four tags fails parsing and is
/// rejected as a reconciliation error, never silently ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReconcileAction {
    ListIncidents,
    FindIncident {
        timestamp: String,
        location: String,
        incident_type: IncidentType,
    },
    CreateIncident {
        timestamp: String,
        location: String,
        incident_type: IncidentType,
    },
    ResolveIncident {
        doc_id: String,
    },
}

impl ReconcileAction {
    /// Short tag for logging
    pub fn name(&self) -> &'static str {
        match self {
            ReconcileAction::ListIncidents => "list_incidents",
            ReconcileAction::FindIncident { .. } => "find_incident",
            ReconcileAction::CreateIncident { .. } => "create_incident",
            ReconcileAction::ResolveIncident { .. } => "resolve_incident",
        }
    }
}

/// Executed action plus its tool-result, appended to the running context
/// so the decision-maker sees what already happened.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub action: ReconcileAction,
    pub outcome: serde_json::Value,
}

/// Parse the decision-maker's raw output into actions.
///
/// Accepts either `{"actions": [...]}` or a bare JSON array, with optional
/// markdown fences. An empty list is the graceful "nothing further" signal.
pub fn parse_actions(text: &str) -> Result<Vec<ReconcileAction>> {
    let cleaned = strip_model_fences(text);

    let value: serde_json::Value = serde_json::from_str(cleaned)
        .map_err(|e| Error::Reconciliation(format!("unparsable decision: {}", e)))?;

    let items = match &value {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(map) => match map.get("actions") {
            Some(serde_json::Value::Array(items)) => items.clone(),
            _ => {
                return Err(Error::Reconciliation(
                    "decision is missing an actions array".to_string(),
                ))
            }
        },
        _ => {
            return Err(Error::Reconciliation(
                "decision is neither an array nor an object".to_string(),
            ))
        }
    };

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| Error::Reconciliation(format!("unknown or malformed action: {}", e)))
        })
        .collect()
}
