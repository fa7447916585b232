//! Reconciliation decision-maker

use super::actions::{parse_actions, ActionRecord, ReconcileAction};
use crate::error::{Error, Result};
use crate::ledger::IncidentKey;
use crate::models::AnalysisResult;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

/// Everything the decision-maker sees: the judgment under reconciliation,
/// its identity key, and the transcript of actions already executed.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileContext {
    pub analysis: AnalysisResult,
    pub key: IncidentKey,
    pub organization_id: String,
    pub transcript: Vec<ActionRecord>,
}

/// Picks the next batch of ledger actions.
///
/// Returning an empty vec is the only graceful exit signal; the loop caps
/// iterations regardless of what an implementation does.
#[async_trait]
pub trait ReconcileDecider: Send + Sync {
    async fn decide(&self, ctx: &ReconcileContext) -> Result<Vec<ReconcileAction>>;
}

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini-backed decision-maker
pub struct GeminiDecider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiDecider {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_API_BASE.to_string())
    }

    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url,
            api_key,
            model,
        }
    }

    fn build_prompt(ctx: &ReconcileContext) -> Result<String> {
        let context_json = serde_json::to_string_pretty(ctx)?;
        Ok(format!(
            r#"You are the incident-ledger reconciliation agent for a security monitoring system.

You keep the ledger consistent with the latest image analysis. You act one
turn at a time by proposing ledger actions; the results of every action you
already took are in the transcript below.

**Available actions** (the only valid values for "action"):
- {{"action": "list_incidents"}}
- {{"action": "find_incident", "timestamp": "...", "location": "...", "incident_type": "..."}}
- {{"action": "create_incident", "timestamp": "...", "location": "...", "incident_type": "..."}}
- {{"action": "resolve_incident", "doc_id": "..."}}

**Policy you must follow:**
1. If the analysis reports a problem, check whether an open incident already
   exists for the identity key ({{timestamp, location, incident_type}}). If
   none exists, create one. If one exists, do nothing further.
2. If the analysis reports no problem, look for open incidents at the same
   location and resolve them (they are now cleared). Use list_incidents to
   find their doc_id first.
3. Never target a different identity key than the one under reconciliation.
4. Creating a duplicate or resolving a missing incident is a harmless no-op,
   but avoid proposing actions the transcript already answered.

**Current context:**
{context_json}

Respond with ONLY a JSON object of the form {{"actions": [...]}}.
When the ledger is consistent and nothing remains to do, respond with
{{"actions": []}}."#
        ))
    }
}

#[async_trait]
impl ReconcileDecider for GeminiDecider {
    async fn decide(&self, ctx: &ReconcileContext) -> Result<Vec<ReconcileAction>> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let body = json!({
            "contents": [{
                "parts": [{"text": Self::build_prompt(ctx)?}]
            }],
            "generationConfig": {"temperature": 0.0}
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Reconciliation(format!("decider unreachable: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Reconciliation(format!(
                "decider returned {}: {}",
                status, text
            )));
        }

        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Reconciliation(format!("bad decider response body: {}", e)))?;

        let text = payload
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect::<String>()
            })
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Reconciliation("decider response has no text".to_string()))?;

        parse_actions(&text)
    }
}
