//! Incident Ledger - Deduplicated Incident Records
//!
//! ## Responsibilities
//!
//! - Persist incident records keyed by (timestamp, location, incident_type)
//! - Enforce at most one open incident per identity key
//! - Idempotent create/resolve so frame reprocessing is safe
//!
//! The store is injected behind [`IncidentStore`]: MySQL in production,
//! in-memory for tests and broker-less runs.

mod memory;
mod repository;
mod types;

pub use memory::MemoryIncidentStore;
pub use repository::SqlIncidentStore;
pub use types::{
    CreateOutcome, Incident, IncidentKey, IncidentStatus, NewIncident, ResolveOutcome,
};

use crate::error::Result;
use async_trait::async_trait;

/// Ledger operations available to the reconciliation loop.
///
/// All mutations are key-scoped and idempotent; two consecutive identical
/// calls leave the ledger in the same state as one.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// All incident records, open and fixed
    async fn list_incidents(&self) -> Result<Vec<Incident>>;

    /// The open incident holding the identity key, if any
    async fn find_incident(&self, key: &IncidentKey) -> Result<Option<Incident>>;

    /// Create an incident unless an open one already holds the key
    async fn create_incident(&self, new: NewIncident) -> Result<CreateOutcome>;

    /// Transition an open incident to fixed; no-op if missing or already fixed
    async fn resolve_incident(&self, doc_id: &str) -> Result<ResolveOutcome>;
}
