//! Component M: the read-only query facade (§6 "Consumers").
//!
//! Exposes accessors over the measurement log (B), the grid store (C) and
//! the audit log (D) for external consumers (research, compliance, TUI).
//! The facade never mutates; it reflects stores as-is, including a stale
//! grid after a skipped cycle (§8 "User-visible failure").

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::HubResult;
use crate::forensic::ChainVerification;
use crate::model::audit::AuditEvent;
use crate::model::grid::GridCell;
use crate::model::measurement::Measurement;
use crate::storage::{AuditLog, GridStore, MeasurementLog};

pub struct QueryFacade {
    measurement_log: Arc<MeasurementLog>,
    grid_store: Arc<GridStore>,
    audit_log: Arc<AuditLog>,
}

impl QueryFacade {
    pub fn new(measurement_log: Arc<MeasurementLog>, grid_store: Arc<GridStore>, audit_log: Arc<AuditLog>) -> Self {
        Self { measurement_log, grid_store, audit_log }
    }

    pub async fn measurements(
        &self,
        sensor_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> HubResult<Vec<Measurement>> {
        self.measurement_log.range(sensor_id, start, end, limit).await
    }

    pub async fn total_measurement_count(&self) -> HubResult<u64> {
        self.measurement_log.total_records().await
    }

    pub async fn chain_integrity(&self) -> HubResult<ChainVerification> {
        self.measurement_log.verify_chain_integrity().await
    }

    pub async fn latest_grid(&self, field_id: &str, depth_inches: u32) -> HubResult<Vec<GridCell>> {
        self.grid_store.get_latest(field_id, depth_inches).await
    }

    pub async fn grid_at_or_before(&self, field_id: &str, t: DateTime<Utc>, depth_inches: u32) -> HubResult<Vec<GridCell>> {
        self.grid_store.get_at_or_before(field_id, t, depth_inches).await
    }

    pub async fn audit_events(
        &self,
        kind: Option<&str>,
        principal: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> HubResult<Vec<AuditEvent>> {
        self.audit_log.query(kind, principal, start, end).await
    }

    /// Convenience summary used by compliance reports: the current chain
    /// tip plus record count, without exposing internal storage handles.
    pub async fn ledger_summary(&self) -> HubResult<LedgerSummary> {
        Ok(LedgerSummary {
            last_hash: self.measurement_log.last_hash().await?,
            total_records: self.measurement_log.total_records().await?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSummary {
    pub last_hash: String,
    pub total_records: u64,
}
