use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{HubError, HubResult};
use crate::forensic::ForensicHasher;
use crate::model::genesis_hash;
use crate::model::measurement::{Batch, Measurement};

/// Distinguishes a fresh append from an idempotent re-insertion (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    AlreadyStored,
}

/// Component B: append-only measurement log. Writers serialise on an
/// internal mutex; many concurrent readers are permitted (§5).
pub struct MeasurementLog {
    pool: SqlitePool,
    hasher: Arc<ForensicHasher>,
    write_lock: Mutex<()>,
}

impl MeasurementLog {
    pub fn new(pool: SqlitePool, hasher: Arc<ForensicHasher>) -> Self {
        Self { pool, hasher, write_lock: Mutex::new(()) }
    }

    pub fn hasher(&self) -> &ForensicHasher {
        &self.hasher
    }

    /// Atomic w.r.t. the chain-state row: either both the record and the
    /// updated last-hash persist, or neither.
    pub async fn append(&self, measurement: Measurement) -> HubResult<AppendOutcome> {
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.find_by_own_hash(&measurement.own_hash).await? {
            return if existing == measurement {
                Ok(AppendOutcome::AlreadyStored)
            } else {
                Err(HubError::chain_broken(format!(
                    "own-hash {} already stored with a different payload",
                    measurement.own_hash
                )))
            };
        }

        let last_hash = self.last_hash().await?;
        if measurement.previous_hash != last_hash {
            return Err(HubError::chain_broken(format!(
                "previous_hash {} does not match chain tip {}",
                measurement.previous_hash, last_hash
            )));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO measurements
                (sensor_id, depth_inches, timestamp, vwc, soil_temp_c, water_potential,
                 signal_quality, previous_hash, own_hash, signature)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&measurement.sensor_id)
        .bind(measurement.depth_inches)
        .bind(measurement.timestamp.to_rfc3339())
        .bind(measurement.vwc)
        .bind(measurement.soil_temp_c)
        .bind(measurement.water_potential)
        .bind(measurement.signal_quality)
        .bind(&measurement.previous_hash)
        .bind(&measurement.own_hash)
        .bind(&measurement.signature)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE chain_state SET last_hash = ?, total_records = total_records + 1, last_updated = datetime('now') WHERE id = 1",
        )
        .bind(&measurement.own_hash)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(AppendOutcome::Appended)
    }

    /// Appends every measurement in a batch sequentially, then records the
    /// batch's own chain position.
    pub async fn append_batch(&self, batch: &Batch) -> HubResult<Vec<AppendOutcome>> {
        let mut outcomes = Vec::with_capacity(batch.measurements.len());
        for m in &batch.measurements {
            outcomes.push(self.append(m.clone()).await?);
        }

        let _guard = self.write_lock.lock().await;
        sqlx::query("UPDATE chain_state SET last_batch_hash = ? WHERE id = 1")
            .bind(&batch.batch_hash)
            .execute(&self.pool)
            .await?;

        Ok(outcomes)
    }

    pub async fn last_hash(&self) -> HubResult<String> {
        let row = sqlx::query("SELECT last_hash FROM chain_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("last_hash")).unwrap_or_else(genesis_hash))
    }

    pub async fn last_batch_hash(&self) -> HubResult<String> {
        let row = sqlx::query("SELECT last_batch_hash FROM chain_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("last_batch_hash")).unwrap_or_else(genesis_hash))
    }

    pub async fn total_records(&self) -> HubResult<u64> {
        let row = sqlx::query("SELECT total_records FROM chain_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("total_records") as u64).unwrap_or(0))
    }

    /// Range queries are ordered by append order (`id`), the chain's
    /// canonical order — not by reading timestamp, which is the probe's
    /// sampling instant and is not guaranteed monotonic with append order
    /// (e.g. a multi-depth vertical sensor stamps every depth identically).
    pub async fn range(
        &self,
        sensor_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> HubResult<Vec<Measurement>> {
        let rows = match sensor_id {
            Some(sensor_id) => {
                sqlx::query(
                    r#"
                    SELECT sensor_id, depth_inches, timestamp, vwc, soil_temp_c, water_potential,
                           signal_quality, previous_hash, own_hash, signature
                    FROM measurements
                    WHERE sensor_id = ? AND timestamp >= ? AND timestamp <= ? AND archived = 0
                    ORDER BY id ASC
                    LIMIT ?
                    "#,
                )
                .bind(sensor_id)
                .bind(start.to_rfc3339())
                .bind(end.to_rfc3339())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT sensor_id, depth_inches, timestamp, vwc, soil_temp_c, water_potential,
                           signal_quality, previous_hash, own_hash, signature
                    FROM measurements
                    WHERE timestamp >= ? AND timestamp <= ? AND archived = 0
                    ORDER BY id ASC
                    LIMIT ?
                    "#,
                )
                .bind(start.to_rfc3339())
                .bind(end.to_rfc3339())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(row_to_measurement).collect()
    }

    async fn find_by_own_hash(&self, own_hash: &str) -> HubResult<Option<Measurement>> {
        let row = sqlx::query(
            r#"
            SELECT sensor_id, depth_inches, timestamp, vwc, soil_temp_c, water_potential,
                   signal_quality, previous_hash, own_hash, signature
            FROM measurements WHERE own_hash = ?
            "#,
        )
        .bind(own_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_measurement).transpose()
    }

    /// Rewrites records older than `cutoff` into a compressed archive keyed
    /// by (sensor, year-month), then marks them archived in hot storage.
    /// The chain remains verifiable: archived rows are kept logically (flag
    /// only) so their own-hash stays available as the predecessor of the
    /// first retained record.
    pub async fn archive_older_than(&self, cutoff: DateTime<Utc>) -> HubResult<usize> {
        let _guard = self.write_lock.lock().await;

        let rows = sqlx::query(
            r#"
            SELECT sensor_id, depth_inches, timestamp, vwc, soil_temp_c, water_potential,
                   signal_quality, previous_hash, own_hash, signature
            FROM measurements WHERE timestamp < ? AND archived = 0
            ORDER BY id ASC
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(0);
        }

        let measurements: Vec<Measurement> =
            rows.into_iter().map(row_to_measurement).collect::<HubResult<_>>()?;

        let mut by_sensor_month: std::collections::BTreeMap<(String, String), Vec<&Measurement>> =
            std::collections::BTreeMap::new();
        for m in &measurements {
            let year_month = m.timestamp.format("%Y%m").to_string();
            by_sensor_month.entry((m.sensor_id.clone(), year_month)).or_default().push(m);
        }

        for ((sensor_id, year_month), group) in by_sensor_month {
            let payload = serde_json::to_vec(&group)?;
            let compressed = compress(&payload)?;
            let archive_dir = std::path::Path::new("archive");
            tokio::fs::create_dir_all(archive_dir).await?;
            let path = archive_dir.join(format!("{}_{}.gz", sensor_id, year_month));
            tokio::fs::write(path, compressed).await?;
        }

        sqlx::query("UPDATE measurements SET archived = 1 WHERE timestamp < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(measurements.len())
    }

    /// Recomputes the chain over every non-archived record and reports
    /// whether it is intact (§4.2, §8). Ordered by `id` (append order), the
    /// chain's canonical order — not by reading timestamp, which can tie
    /// across a single sensor sweep and does not determine chain position.
    pub async fn verify_chain_integrity(&self) -> HubResult<crate::forensic::ChainVerification> {
        let rows = sqlx::query(
            r#"
            SELECT sensor_id, depth_inches, timestamp, vwc, soil_temp_c, water_potential,
                   signal_quality, previous_hash, own_hash, signature
            FROM measurements WHERE archived = 0
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let measurements: Vec<Measurement> =
            rows.into_iter().map(row_to_measurement).collect::<HubResult<_>>()?;

        let expected_first = measurements.first().map(|m| m.previous_hash.clone()).unwrap_or_else(genesis_hash);
        let expected_last = self.last_hash().await?;

        Ok(self.hasher.verify_chain(&measurements, &expected_first, &expected_last))
    }
}

fn row_to_measurement(row: sqlx::sqlite::SqliteRow) -> HubResult<Measurement> {
    let timestamp: String = row.get("timestamp");
    Ok(Measurement {
        sensor_id: row.get("sensor_id"),
        depth_inches: row.get::<i64, _>("depth_inches") as u32,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| HubError::integrity_lost(format!("corrupt timestamp: {e}")))?
            .with_timezone(&Utc),
        vwc: row.get("vwc"),
        soil_temp_c: row.get("soil_temp_c"),
        water_potential: row.get("water_potential"),
        signal_quality: row.get("signal_quality"),
        previous_hash: row.get("previous_hash"),
        own_hash: row.get("own_hash"),
        signature: row.get("signature"),
    })
}

fn compress(bytes: &[u8]) -> HubResult<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}
