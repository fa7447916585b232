//! SQL-backed incident store (incidents table)

use super::types::{
    CreateOutcome, Incident, IncidentKey, IncidentStatus, NewIncident, ResolveOutcome,
};
use super::IncidentStore;
use crate::error::{Error, Result};
use crate::models::{IncidentType, Severity};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::Row;
use uuid::Uuid;

/// MySQL incident repository.
///
/// The one-open-incident-per-key invariant is enforced in SQL with a
/// conditional insert, so reprocessed frames and retried actions stay no-ops
/// even across process restarts.
pub struct SqlIncidentStore {
    pool: MySqlPool,
}

impl SqlIncidentStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Create the incidents table if it does not exist
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
                doc_id CHAR(36) PRIMARY KEY,
                organization_id VARCHAR(64) NOT NULL,
                `timestamp` VARCHAR(32) NOT NULL,
                location VARCHAR(255) NOT NULL,
                incident_type VARCHAR(32) NOT NULL,
                severity VARCHAR(16) NOT NULL,
                confidence FLOAT NOT NULL,
                description TEXT NOT NULL,
                recommended_action TEXT NOT NULL,
                people_count BIGINT NULL,
                status VARCHAR(8) NOT NULL DEFAULT 'open',
                created_at DATETIME(6) NOT NULL,
                resolved_at DATETIME(6) NULL,
                INDEX idx_identity (`timestamp`, location, incident_type, status)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_incident(&self, row: MySqlRow) -> Result<Incident> {
        let incident_type: String = row.get("incident_type");
        let severity: String = row.get("severity");
        let status: String = row.get("status");

        let incident_type = IncidentType::parse(&incident_type)
            .map_err(|_| Error::Ledger(format!("bad incident_type in row: {}", incident_type)))?;
        let severity = Severity::parse(&severity)
            .map_err(|_| Error::Ledger(format!("bad severity in row: {}", severity)))?;
        let status = match status.as_str() {
            "open" => IncidentStatus::Open,
            "fixed" => IncidentStatus::Fixed,
            other => return Err(Error::Ledger(format!("bad status in row: {}", other))),
        };

        Ok(Incident {
            doc_id: row.get("doc_id"),
            organization_id: row.get("organization_id"),
            timestamp: row.get("timestamp"),
            location: row.get("location"),
            incident_type,
            severity,
            confidence: row.get("confidence"),
            description: row.get("description"),
            recommended_action: row.get("recommended_action"),
            people_count: row.get("people_count"),
            status,
            created_at: row.get("created_at"),
            resolved_at: row.get("resolved_at"),
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    doc_id, organization_id, `timestamp`, location, incident_type,
    severity, confidence, description, recommended_action, people_count,
    status, created_at, resolved_at
"#;

#[async_trait]
impl IncidentStore for SqlIncidentStore {
    async fn list_incidents(&self) -> Result<Vec<Incident>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM incidents ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| self.row_to_incident(row)).collect()
    }

    async fn find_incident(&self, key: &IncidentKey) -> Result<Option<Incident>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM incidents
            WHERE `timestamp` = ? AND location = ? AND incident_type = ? AND status = 'open'
            LIMIT 1
            "#,
            SELECT_COLUMNS
        ))
        .bind(&key.timestamp)
        .bind(&key.location)
        .bind(key.incident_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| self.row_to_incident(r)).transpose()
    }

    async fn create_incident(&self, new: NewIncident) -> Result<CreateOutcome> {
        let doc_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        // Conditional insert: no row is written when an open incident
        // already holds the identity key.
        let result = sqlx::query(
            r#"
            INSERT INTO incidents (
                doc_id, organization_id, `timestamp`, location, incident_type,
                severity, confidence, description, recommended_action, people_count,
                status, created_at
            )
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'open', ?
            FROM DUAL
            WHERE NOT EXISTS (
                SELECT 1 FROM incidents
                WHERE `timestamp` = ? AND location = ? AND incident_type = ? AND status = 'open'
            )
            "#,
        )
        .bind(&doc_id)
        .bind(&new.organization_id)
        .bind(&new.timestamp)
        .bind(&new.location)
        .bind(new.incident_type.as_str())
        .bind(new.severity.as_str())
        .bind(new.confidence)
        .bind(&new.description)
        .bind(&new.recommended_action)
        .bind(new.people_count)
        .bind(now)
        .bind(&new.timestamp)
        .bind(&new.location)
        .bind(new.incident_type.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let existing = self
                .find_incident(&new.key())
                .await?
                .ok_or_else(|| Error::Ledger("duplicate create lost its open record".to_string()))?;
            tracing::debug!(
                doc_id = %existing.doc_id,
                key = %existing.key(),
                "Duplicate create treated as no-op"
            );
            return Ok(CreateOutcome::DuplicateOpen { existing });
        }

        Ok(CreateOutcome::Created {
            incident: Incident {
                doc_id,
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
                created_at: now,
                resolved_at: None,
            },
        })
    }

    async fn resolve_incident(&self, doc_id: &str) -> Result<ResolveOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE incidents
            SET status = 'fixed', resolved_at = ?
            WHERE doc_id = ? AND status = 'open'
            "#,
        )
        .bind(Utc::now())
        .bind(doc_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(doc_id = %doc_id, "Resolve of missing/fixed incident treated as no-op");
            return Ok(ResolveOutcome::NoOp);
        }

        Ok(ResolveOutcome::Resolved {
            doc_id: doc_id.to_string(),
        })
    }
}
