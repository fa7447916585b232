//! Reconciliation Loop - Ledger Consistency
//!
//! ## Responsibilities
//!
//! - Drive the decision-maker over the closed ledger action set
//! - Execute proposed actions against the incident store
//! - Keep the loop bounded: iteration cap, key discipline, error capture
//!
//! A loop failure never fails the workflow; it surfaces as a warning on the
//! returned report.

mod actions;
mod decider;

pub use actions::{parse_actions, ActionRecord, ReconcileAction};
pub use decider::{GeminiDecider, ReconcileContext, ReconcileDecider};

use crate::ledger::{CreateOutcome, Incident, IncidentKey, IncidentStore, NewIncident};
use crate::models::{AnalysisRequest, AnalysisResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Hard cap on decision turns per reconciliation
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Outcome of one reconciliation run
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub iterations: u32,
    pub actions_executed: usize,
    /// Set when anything went wrong: decider failure, store error, rejected
    /// action, or the iteration cap. Non-fatal by contract.
    pub warning: Option<String>,
}

impl ReconcileReport {
    pub fn capped(&self) -> bool {
        self.warning
            .as_deref()
            .is_some_and(|w| w.contains("iteration cap"))
    }
}

/// Bounded tool-calling loop over the incident ledger
pub struct ReconcileLoop {
    store: Arc<dyn IncidentStore>,
    decider: Arc<dyn ReconcileDecider>,
    max_iterations: u32,
}

impl ReconcileLoop {
    pub fn new(store: Arc<dyn IncidentStore>, decider: Arc<dyn ReconcileDecider>) -> Self {
        Self {
            store,
            decider,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Reconcile the ledger with one classified frame.
    ///
    /// Repeats: ask the decision-maker, execute each proposed action, append
    /// the tool-result to the context. Terminates when the decision-maker
    /// proposes nothing, or at the iteration cap.
    pub async fn reconcile(
        &self,
        request: &AnalysisRequest,
        result: &AnalysisResult,
    ) -> ReconcileReport {
        let key = IncidentKey {
            timestamp: request.timestamp.clone(),
            location: request.location.clone(),
            incident_type: result.incident_type,
        };

        let mut ctx = ReconcileContext {
            analysis: result.clone(),
            key,
            organization_id: request.organization_id.clone(),
            transcript: Vec::new(),
        };

        // doc_id -> location, harvested from list/find/create results; a
        // resolve may only reference a record the loop has actually seen.
        let mut known_docs: HashMap<String, String> = HashMap::new();
        let mut warning: Option<String> = None;
        let mut actions_executed = 0usize;
        let mut iterations = 0u32;

        loop {
            if iterations >= self.max_iterations {
                tracing::warn!(
                    key = %ctx.key,
                    iterations = iterations,
                    "Reconciliation iteration cap reached, abandoning further attempts"
                );
                warning = Some(format!(
                    "iteration cap ({}) reached before the decision-maker finished",
                    self.max_iterations
                ));
                break;
            }
            iterations += 1;

            let proposed = match self.decider.decide(&ctx).await {
                Ok(actions) => actions,
                Err(e) => {
                    tracing::warn!(key = %ctx.key, error = %e, "Decision-maker failed");
                    warning = Some(format!("decision-maker failed: {}", e));
                    break;
                }
            };

            if proposed.is_empty() {
                tracing::debug!(
                    key = %ctx.key,
                    iterations = iterations,
                    "Decision-maker proposed no further action"
                );
                break;
            }

            for action in proposed {
                actions_executed += 1;
                let outcome = self
                    .execute(&action, &ctx, result, &mut known_docs, &mut warning)
                    .await;
                tracing::debug!(
                    key = %ctx.key,
                    action = action.name(),
                    outcome = %outcome,
                    "Ledger action executed"
                );
                ctx.transcript.push(ActionRecord { action, outcome });
            }
        }

        ReconcileReport {
            iterations,
            actions_executed,
            warning,
        }
    }

    async fn execute(
        &self,
        action: &ReconcileAction,
        ctx: &ReconcileContext,
        result: &AnalysisResult,
        known_docs: &mut HashMap<String, String>,
        warning: &mut Option<String>,
    ) -> serde_json::Value {
        match action {
            ReconcileAction::ListIncidents => match self.store.list_incidents().await {
                Ok(incidents) => {
                    for incident in &incidents {
                        known_docs.insert(incident.doc_id.clone(), incident.location.clone());
                    }
                    serde_json::json!({
                        "count": incidents.len(),
                        "incidents": incidents,
                    })
                }
                Err(e) => capture_error(warning, "list_incidents", e),
            },

            ReconcileAction::FindIncident {
                timestamp,
                location,
                incident_type,
            } => {
                let requested = IncidentKey {
                    timestamp: timestamp.clone(),
                    location: location.clone(),
                    incident_type: *incident_type,
                };
                if requested != ctx.key {
                    return reject(
                        warning,
                        format!(
                            "find_incident targeted key {} but {} is under reconciliation",
                            requested, ctx.key
                        ),
                    );
                }
                match self.store.find_incident(&requested).await {
                    Ok(Some(incident)) => {
                        known_docs.insert(incident.doc_id.clone(), incident.location.clone());
                        serde_json::json!({"found": true, "incident": incident})
                    }
                    Ok(None) => serde_json::json!({"found": false}),
                    Err(e) => capture_error(warning, "find_incident", e),
                }
            }

            ReconcileAction::CreateIncident {
                timestamp,
                location,
                incident_type,
            } => {
                let requested = IncidentKey {
                    timestamp: timestamp.clone(),
                    location: location.clone(),
                    incident_type: *incident_type,
                };
                if requested != ctx.key {
                    return reject(
                        warning,
                        format!(
                            "create_incident targeted key {} but {} is under reconciliation",
                            requested, ctx.key
                        ),
                    );
                }
                if !result.reports_problem() {
                    return reject(
                        warning,
                        "create_incident requires a problem judgment".to_string(),
                    );
                }

                let new = NewIncident {
                    organization_id: ctx.organization_id.clone(),
                    timestamp: requested.timestamp,
                    location: requested.location,
                    incident_type: requested.incident_type,
                    severity: result.severity,
                    confidence: result.confidence,
                    description: result.description.clone(),
                    recommended_action: result.recommended_action.clone(),
                    people_count: result.people_count,
                };

                match self.store.create_incident(new).await {
                    Ok(outcome) => {
                        let incident: &Incident = match &outcome {
                            CreateOutcome::Created { incident } => incident,
                            CreateOutcome::DuplicateOpen { existing } => existing,
                        };
                        known_docs.insert(incident.doc_id.clone(), incident.location.clone());
                        serde_json::to_value(&outcome)
                            .unwrap_or_else(|_| serde_json::json!({"outcome": "created"}))
                    }
                    Err(e) => capture_error(warning, "create_incident", e),
                }
            }

            ReconcileAction::ResolveIncident { doc_id } => {
                if result.reports_problem() {
                    return reject(
                        warning,
                        "resolve_incident requires an all-clear judgment".to_string(),
                    );
                }
                match known_docs.get(doc_id) {
                    None => {
                        return reject(
                            warning,
                            format!(
                                "resolve_incident targeted {} which was never returned by list/find",
                                doc_id
                            ),
                        )
                    }
                    Some(location) if location != &ctx.key.location => {
                        return reject(
                            warning,
                            format!(
                                "resolve_incident targeted a record at {} but {} is under reconciliation",
                                location, ctx.key.location
                            ),
                        )
                    }
                    Some(_) => {}
                }
                match self.store.resolve_incident(doc_id).await {
                    Ok(outcome) => serde_json::to_value(&outcome)
                        .unwrap_or_else(|_| serde_json::json!({"outcome": "resolved"})),
                    Err(e) => capture_error(warning, "resolve_incident", e),
                }
            }
        }
    }
}

/// Store failures become tool-results the decision-maker can see, plus a
/// non-fatal warning on the report.
fn capture_error(
    warning: &mut Option<String>,
    action: &str,
    e: crate::error::Error,
) -> serde_json::Value {
    tracing::warn!(action = action, error = %e, "Ledger action failed");
    warning.get_or_insert_with(|| format!("{} failed: {}", action, e));
    serde_json::json!({"error": e.to_string()})
}

fn reject(warning: &mut Option<String>, reason: String) -> serde_json::Value {
    tracing::warn!(reason = %reason, "Ledger action rejected");
    warning.get_or_insert_with(|| reason.clone());
    serde_json::json!({"rejected": reason})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::ledger::{MemoryIncidentStore, ResolveOutcome};
    use crate::models::{IncidentType, Severity};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Decider that replays a fixed sequence of turns, then stops
    struct ScriptedDecider {
        turns: Mutex<VecDeque<Vec<ReconcileAction>>>,
    }

    impl ScriptedDecider {
        fn new(turns: Vec<Vec<ReconcileAction>>) -> Self {
            Self {
                turns: Mutex::new(turns.into()),
            }
        }
    }

    #[async_trait]
    impl ReconcileDecider for ScriptedDecider {
        async fn decide(&self, _ctx: &ReconcileContext) -> Result<Vec<ReconcileAction>> {
            Ok(self.turns.lock().await.pop_front().unwrap_or_default())
        }
    }

    /// Decider that never stops proposing work
    struct TirelessDecider;

    #[async_trait]
    impl ReconcileDecider for TirelessDecider {
        async fn decide(&self, _ctx: &ReconcileContext) -> Result<Vec<ReconcileAction>> {
            Ok(vec![ReconcileAction::ListIncidents])
        }
    }

    /// Decider that fails outright (e.g. produced an unknown action tag)
    struct BrokenDecider;

    #[async_trait]
    impl ReconcileDecider for BrokenDecider {
        async fn decide(&self, _ctx: &ReconcileContext) -> Result<Vec<ReconcileAction>> {
            Err(Error::Reconciliation(
                "unknown or malformed action: escalate_to_mars".to_string(),
            ))
        }
    }

    fn fire_request() -> AnalysisRequest {
        AnalysisRequest {
            image: vec![0xff, 0xd8],
            timestamp: "2026-08-29 14:30:45".to_string(),
            location: "Gate-1".to_string(),
            organization_id: "org-1".to_string(),
        }
    }

    fn fire_result() -> AnalysisResult {
        AnalysisResult {
            is_problem: true,
            incident_type: IncidentType::Fire,
            severity: Severity::Critical,
            confidence: 0.95,
            description: "flames at the gate".to_string(),
            recommended_action: "evacuate".to_string(),
            people_count: Some(2),
            additional_concerns: vec![],
        }
    }

    fn all_clear_result() -> AnalysisResult {
        AnalysisResult {
            is_problem: false,
            incident_type: IncidentType::Normal,
            severity: Severity::Low,
            confidence: 0.9,
            description: "area clear".to_string(),
            recommended_action: "none".to_string(),
            people_count: Some(0),
            additional_concerns: vec![],
        }
    }

    fn fire_key_action(kind: &str) -> ReconcileAction {
        match kind {
            "find" => ReconcileAction::FindIncident {
                timestamp: "2026-08-29 14:30:45".to_string(),
                location: "Gate-1".to_string(),
                incident_type: IncidentType::Fire,
            },
            _ => ReconcileAction::CreateIncident {
                timestamp: "2026-08-29 14:30:45".to_string(),
                location: "Gate-1".to_string(),
                incident_type: IncidentType::Fire,
            },
        }
    }

    #[tokio::test]
    async fn find_then_create_opens_one_incident() {
        let store = Arc::new(MemoryIncidentStore::new());
        let decider = Arc::new(ScriptedDecider::new(vec![
            vec![fire_key_action("find")],
            vec![fire_key_action("create")],
        ]));
        let reconciler = ReconcileLoop::new(store.clone(), decider);

        let report = reconciler.reconcile(&fire_request(), &fire_result()).await;

        assert!(report.warning.is_none());
        assert_eq!(report.actions_executed, 2);
        let incidents = store.list_incidents().await.unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].location, "Gate-1");
    }

    #[tokio::test]
    async fn cap_terminates_tireless_decider() {
        let store = Arc::new(MemoryIncidentStore::new());
        let reconciler =
            ReconcileLoop::new(store, Arc::new(TirelessDecider)).with_max_iterations(3);

        let report = reconciler.reconcile(&fire_request(), &fire_result()).await;

        assert_eq!(report.iterations, 3);
        assert!(report.capped());
    }

    #[tokio::test]
    async fn decider_failure_is_captured_as_warning() {
        let store = Arc::new(MemoryIncidentStore::new());
        let reconciler = ReconcileLoop::new(store.clone(), Arc::new(BrokenDecider));

        let report = reconciler.reconcile(&fire_request(), &fire_result()).await;

        assert!(report.warning.is_some());
        assert!(store.list_incidents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_against_foreign_key_is_rejected() {
        let store = Arc::new(MemoryIncidentStore::new());
        let decider = Arc::new(ScriptedDecider::new(vec![vec![
            ReconcileAction::CreateIncident {
                timestamp: "2026-08-29 14:30:45".to_string(),
                location: "Gate-2".to_string(),
                incident_type: IncidentType::Fire,
            },
        ]]));
        let reconciler = ReconcileLoop::new(store.clone(), decider);

        let report = reconciler.reconcile(&fire_request(), &fire_result()).await;

        assert!(report.warning.is_some());
        assert!(store.list_incidents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolve_requires_all_clear_and_known_doc() {
        let store = Arc::new(MemoryIncidentStore::new());

        // Seed an open fire incident at Gate-1
        store
            .create_incident(NewIncident::from_analysis(&fire_request(), &fire_result()))
            .await
            .unwrap();

        // A problem judgment must not resolve anything
        let decider = Arc::new(ScriptedDecider::new(vec![vec![
            ReconcileAction::ResolveIncident {
                doc_id: "whatever".to_string(),
            },
        ]]));
        let report = ReconcileLoop::new(store.clone(), decider)
            .reconcile(&fire_request(), &fire_result())
            .await;
        assert!(report.warning.is_some());

        // An all-clear judgment may, but only via a doc_id seen through
        // list/find this reconciliation
        let decider = Arc::new(ScriptedDecider::new(vec![vec![
            ReconcileAction::ResolveIncident {
                doc_id: "never-listed".to_string(),
            },
        ]]));
        let mut clear_request = fire_request();
        clear_request.timestamp = "2026-08-29 15:00:00".to_string();
        let report = ReconcileLoop::new(store.clone(), decider)
            .reconcile(&clear_request, &all_clear_result())
            .await;
        assert!(report.warning.is_some());

        let incidents = store.list_incidents().await.unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(
            incidents[0].status,
            crate::ledger::IncidentStatus::Open,
            "seeded incident must still be open"
        );
    }

    #[tokio::test]
    async fn list_then_resolve_fixes_open_incident() {
        let store = Arc::new(MemoryIncidentStore::new());
        let created = store
            .create_incident(NewIncident::from_analysis(&fire_request(), &fire_result()))
            .await
            .unwrap();
        let doc_id = match created {
            CreateOutcome::Created { incident } => incident.doc_id,
            _ => unreachable!(),
        };

        let decider = Arc::new(ScriptedDecider::new(vec![
            vec![ReconcileAction::ListIncidents],
            vec![ReconcileAction::ResolveIncident {
                doc_id: doc_id.clone(),
            }],
        ]));
        let mut clear_request = fire_request();
        clear_request.timestamp = "2026-08-29 15:00:00".to_string();

        let report = ReconcileLoop::new(store.clone(), decider)
            .reconcile(&clear_request, &all_clear_result())
            .await;

        assert!(report.warning.is_none());
        let resolved = store.resolve_incident(&doc_id).await.unwrap();
        assert!(
            matches!(resolved, ResolveOutcome::NoOp),
            "incident must already be fixed"
        );
    }

    #[tokio::test]
    async fn store_error_is_captured_not_raised() {
        struct FailingStore;

        #[async_trait]
        impl IncidentStore for FailingStore {
            async fn list_incidents(&self) -> Result<Vec<Incident>> {
                Err(Error::Ledger("connection reset".to_string()))
            }
            async fn find_incident(&self, _key: &IncidentKey) -> Result<Option<Incident>> {
                Err(Error::Ledger("connection reset".to_string()))
            }
            async fn create_incident(&self, _new: NewIncident) -> Result<CreateOutcome> {
                Err(Error::Ledger("connection reset".to_string()))
            }
            async fn resolve_incident(&self, _doc_id: &str) -> Result<ResolveOutcome> {
                Err(Error::Ledger("connection reset".to_string()))
            }
        }

        let decider = Arc::new(ScriptedDecider::new(vec![vec![
            ReconcileAction::ListIncidents,
        ]]));
        let reconciler = ReconcileLoop::new(Arc::new(FailingStore), decider);

        let report = reconciler.reconcile(&fire_request(), &fire_result()).await;

        assert!(report.warning.as_deref().unwrap().contains("list_incidents"));
        assert_eq!(report.actions_executed, 1);
    }
}
