//! In-memory incident store
//!
//! Same semantics as the SQL store; backs tests and broker-less local runs.

use super::types::{
    CreateOutcome, Incident, IncidentKey, IncidentStatus, NewIncident, ResolveOutcome,
};
use super::IncidentStore;
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryIncidentStore {
    incidents: RwLock<Vec<Incident>>,
    calls: AtomicUsize,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store operations seen so far (instrumentation for tests
    /// asserting that failed classifications never touch the ledger)
    pub fn recorded_calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn open_for_key(incidents: &[Incident], key: &IncidentKey) -> Option<Incident> {
        incidents
            .iter()
            .find(|i| i.status == IncidentStatus::Open && &i.key() == key)
            .cloned()
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn list_incidents(&self) -> Result<Vec<Incident>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.incidents.read().await.clone())
    }

    async fn find_incident(&self, key: &IncidentKey) -> Result<Option<Incident>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let incidents = self.incidents.read().await;
        Ok(Self::open_for_key(&incidents, key))
    }

    async fn create_incident(&self, new: NewIncident) -> Result<CreateOutcome> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut incidents = self.incidents.write().await;

        if let Some(existing) = Self::open_for_key(&incidents, &new.key()) {
            return Ok(CreateOutcome::DuplicateOpen { existing });
        }

        let incident = Incident {
            doc_id: Uuid::new_v4().to_string(),
            organization_id: new.organization_id,
            timestamp: new.timestamp,
            location: new.location,
            incident_type: new.incident_type,
            severity: new.severity,
            confidence: new.confidence,
            description: new.description,
            recommended_action: new.recommended_action,
            people_count: new.people_count,
            status: IncidentStatus::Open,
            created_at: Utc::now(),
            resolved_at: None,
        };
        incidents.push(incident.clone());

        Ok(CreateOutcome::Created { incident })
    }

    async fn resolve_incident(&self, doc_id: &str) -> Result<ResolveOutcome> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut incidents = self.incidents.write().await;

        match incidents
            .iter_mut()
            .find(|i| i.doc_id == doc_id && i.status == IncidentStatus::Open)
        {
            Some(incident) => {
                incident.status = IncidentStatus::Fixed;
                incident.resolved_at = Some(Utc::now());
                Ok(ResolveOutcome::Resolved {
                    doc_id: doc_id.to_string(),
                })
            }
            None => Ok(ResolveOutcome::NoOp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IncidentType, Severity};

    fn fire_at_gate1() -> NewIncident {
        NewIncident {
            organization_id: "org-1".to_string(),
            timestamp: "2026-08-29 14:30:45".to_string(),
            location: "Gate-1".to_string(),
            incident_type: IncidentType::Fire,
            severity: Severity::Critical,
            confidence: 0.95,
            description: "open flame near gate".to_string(),
            recommended_action: "evacuate and call fire services".to_string(),
            people_count: Some(4),
        }
    }

    #[tokio::test]
    async fn duplicate_create_is_noop() {
        let store = MemoryIncidentStore::new();

        let first = store.create_incident(fire_at_gate1()).await.unwrap();
        let doc_id = match first {
            CreateOutcome::Created { incident } => incident.doc_id,
            CreateOutcome::DuplicateOpen { .. } => panic!("first create must insert"),
        };

        let second = store.create_incident(fire_at_gate1()).await.unwrap();
        match second {
            CreateOutcome::DuplicateOpen { existing } => assert_eq!(existing.doc_id, doc_id),
            CreateOutcome::Created { .. } => panic!("second create must be a no-op"),
        }

        assert_eq!(store.list_incidents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolve_missing_is_noop() {
        let store = MemoryIncidentStore::new();
        let outcome = store.resolve_incident("no-such-doc").await.unwrap();
        assert!(matches!(outcome, ResolveOutcome::NoOp));
    }

    #[tokio::test]
    async fn resolve_closes_open_incident_once() {
        let store = MemoryIncidentStore::new();
        let doc_id = match store.create_incident(fire_at_gate1()).await.unwrap() {
            CreateOutcome::Created { incident } => incident.doc_id,
            _ => unreachable!(),
        };

        let first = store.resolve_incident(&doc_id).await.unwrap();
        assert!(matches!(first, ResolveOutcome::Resolved { .. }));

        // Already fixed: second resolve is a no-op
        let second = store.resolve_incident(&doc_id).await.unwrap();
        assert!(matches!(second, ResolveOutcome::NoOp));

        // Key is free again for a new open incident
        let recreated = store.create_incident(fire_at_gate1()).await.unwrap();
        assert!(matches!(recreated, CreateOutcome::Created { .. }));
    }

    #[tokio::test]
    async fn find_returns_open_record_only() {
        let store = MemoryIncidentStore::new();
        let new = fire_at_gate1();
        let key = new.key();

        assert!(store.find_incident(&key).await.unwrap().is_none());

        let doc_id = match store.create_incident(new).await.unwrap() {
            CreateOutcome::Created { incident } => incident.doc_id,
            _ => unreachable!(),
        };
        assert!(store.find_incident(&key).await.unwrap().is_some());

        store.resolve_incident(&doc_id).await.unwrap();
        assert!(store.find_incident(&key).await.unwrap().is_none());
    }
}
