use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::error::HubResult;
use crate::forensic::sha256_hex;
use crate::model::audit::AuditEvent;

/// Component D: append-only event journal. Each event carries its own hash
/// but events are not chained to each other (§4.4).
pub struct AuditLog {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, write_lock: Mutex::new(()) }
    }

    pub async fn log_event(
        &self,
        kind: &str,
        principal: &str,
        details: BTreeMap<String, String>,
    ) -> HubResult<AuditEvent> {
        let _guard = self.write_lock.lock().await;
        let timestamp = Utc::now();
        let year_month = timestamp.format("%Y%m").to_string();

        let next_seq: i64 = sqlx::query(
            "SELECT COALESCE(MAX(sequence), 0) + 1 AS next FROM audit_events WHERE year_month = ?",
        )
        .bind(&year_month)
        .fetch_one(&self.pool)
        .await?
        .get("next");

        let details_json = serde_json::to_string(&details)?;
        let canonical = format!(
            "{{\"details\":{},\"kind\":\"{}\",\"principal\":\"{}\",\"timestamp\":\"{}\"}}",
            details_json,
            kind,
            principal,
            timestamp.to_rfc3339(),
        );
        let own_hash = sha256_hex(canonical.as_bytes());

        sqlx::query(
            r#"
            INSERT INTO audit_events (year_month, sequence, timestamp, kind, principal, details, own_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&year_month)
        .bind(next_seq)
        .bind(timestamp.to_rfc3339())
        .bind(kind)
        .bind(principal)
        .bind(&details_json)
        .bind(&own_hash)
        .execute(&self.pool)
        .await?;

        Ok(AuditEvent { timestamp, kind: kind.to_string(), principal: principal.to_string(), details, own_hash })
    }

    pub async fn query(
        &self,
        kind: Option<&str>,
        principal: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> HubResult<Vec<AuditEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, kind, principal, details, own_hash FROM audit_events
            WHERE (?1 IS NULL OR kind = ?1)
              AND (?2 IS NULL OR principal = ?2)
              AND (?3 IS NULL OR timestamp >= ?3)
              AND (?4 IS NULL OR timestamp <= ?4)
            ORDER BY year_month ASC, sequence ASC
            "#,
        )
        .bind(kind)
        .bind(principal)
        .bind(start.map(|s| s.to_rfc3339()))
        .bind(end.map(|e| e.to_rfc3339()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let timestamp: String = row.get("timestamp");
                let details_json: String = row.get("details");
                Ok(AuditEvent {
                    timestamp: DateTime::parse_from_rfc3339(&timestamp).unwrap().with_timezone(&Utc),
                    kind: row.get("kind"),
                    principal: row.get("principal"),
                    details: serde_json::from_str(&details_json)?,
                    own_hash: row.get("own_hash"),
                })
            })
            .collect()
    }
}
