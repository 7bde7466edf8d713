use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use tokio::sync::Mutex;

use crate::error::HubResult;
use crate::model::grid::GridCell;

/// Component C: time-keyed storage of grid cells, deduplicated by cell-id
/// within the most recent snapshot (§4.3).
pub struct GridStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl GridStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, write_lock: Mutex::new(()) }
    }

    pub async fn put_grid(&self, field_id: &str, timestamp: DateTime<Utc>, cells: &[GridCell]) -> HubResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        for cell in cells {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO grid_cells
                    (cell_id, field_id, depth_inches, latitude, longitude, timestamp,
                     estimated_vwc, estimation_variance, confidence, is_hard_anchor,
                     anchor_sensor, trend_value, is_fallback, cell_hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&cell.cell_id)
            .bind(field_id)
            .bind(cell.depth_inches)
            .bind(cell.latitude)
            .bind(cell.longitude)
            .bind(timestamp.to_rfc3339())
            .bind(cell.estimated_vwc)
            .bind(cell.estimation_variance)
            .bind(cell.confidence)
            .bind(cell.is_hard_anchor)
            .bind(&cell.anchor_sensor)
            .bind(cell.trend_value)
            .bind(cell.is_fallback)
            .bind(&cell.cell_hash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_latest(&self, field_id: &str, depth_inches: u32) -> HubResult<Vec<GridCell>> {
        let latest_ts: Option<String> = sqlx::query(
            "SELECT timestamp FROM grid_cells WHERE field_id = ? ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(field_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|r| r.get("timestamp"));

        match latest_ts {
            Some(ts) => self.cells_at_exact(field_id, &ts, depth_inches).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn get_at_or_before(
        &self,
        field_id: &str,
        t: DateTime<Utc>,
        depth_inches: u32,
    ) -> HubResult<Vec<GridCell>> {
        let rows = sqlx::query(
            r#"
            SELECT cell_id, field_id, depth_inches, latitude, longitude, timestamp,
                   estimated_vwc, estimation_variance, confidence, is_hard_anchor,
                   anchor_sensor, trend_value, is_fallback, cell_hash
            FROM grid_cells
            WHERE field_id = ? AND depth_inches = ? AND timestamp <= ?
            ORDER BY timestamp DESC
            "#,
        )
        .bind(field_id)
        .bind(depth_inches)
        .bind(t.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        dedup_most_recent_per_cell(rows)
    }

    async fn cells_at_exact(&self, field_id: &str, timestamp: &str, depth_inches: u32) -> HubResult<Vec<GridCell>> {
        let rows = sqlx::query(
            r#"
            SELECT cell_id, field_id, depth_inches, latitude, longitude, timestamp,
                   estimated_vwc, estimation_variance, confidence, is_hard_anchor,
                   anchor_sensor, trend_value, is_fallback, cell_hash
            FROM grid_cells WHERE field_id = ? AND timestamp = ? AND depth_inches = ?
            "#,
        )
        .bind(field_id)
        .bind(timestamp)
        .bind(depth_inches)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_cell).collect()
    }
}

/// Keeps only the first (most recent, by the descending `ORDER BY`)
/// occurrence of each cell-id, matching the original engine's
/// `seen_cells`-set dedup.
fn dedup_most_recent_per_cell(rows: Vec<sqlx::sqlite::SqliteRow>) -> HubResult<Vec<GridCell>> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for row in rows {
        let cell_id: String = row.get("cell_id");
        if seen.contains(&cell_id) {
            continue;
        }
        seen.insert(cell_id);
        out.push(row_to_cell(row)?);
    }
    Ok(out)
}

fn row_to_cell(row: sqlx::sqlite::SqliteRow) -> HubResult<GridCell> {
    let timestamp: String = row.get("timestamp");
    Ok(GridCell {
        cell_id: row.get("cell_id"),
        field_id: row.get("field_id"),
        depth_inches: row.get::<i64, _>("depth_inches") as u32,
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        timestamp: DateTime::parse_from_rfc3339(&timestamp).unwrap().with_timezone(&Utc),
        estimated_vwc: row.get("estimated_vwc"),
        estimation_variance: row.get("estimation_variance"),
        confidence: row.get("confidence"),
        is_hard_anchor: row.get("is_hard_anchor"),
        anchor_sensor: row.get("anchor_sensor"),
        trend_value: row.get("trend_value"),
        is_fallback: row.get("is_fallback"),
        cell_hash: row.get("cell_hash"),
    })
}
