use sqlx::SqlitePool;

use crate::error::HubResult;
use crate::model::genesis_hash;

/// Creates every table the hot store needs, idempotently. Grounded in the
/// original engine's `_init_database`, translated to the component
/// boundaries of §4.2-§4.4.
pub async fn ensure_schema(pool: &SqlitePool) -> HubResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS measurements (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            sensor_id       TEXT NOT NULL,
            depth_inches    INTEGER NOT NULL,
            timestamp       TEXT NOT NULL,
            vwc             REAL NOT NULL,
            soil_temp_c     REAL,
            water_potential REAL,
            signal_quality  REAL NOT NULL,
            previous_hash   TEXT NOT NULL,
            own_hash        TEXT NOT NULL UNIQUE,
            signature       TEXT NOT NULL,
            archived        INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_measurements_sensor_ts ON measurements (sensor_id, timestamp)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_measurements_ts ON measurements (timestamp)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chain_state (
            id              INTEGER PRIMARY KEY CHECK (id = 1),
            last_hash       TEXT NOT NULL,
            last_batch_hash TEXT NOT NULL,
            total_records   INTEGER NOT NULL DEFAULT 0,
            last_updated    TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO chain_state (id, last_hash, last_batch_hash, total_records) VALUES (1, ?, ?, 0)")
        .bind(genesis_hash())
        .bind(genesis_hash())
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS grid_cells (
            cell_id              TEXT NOT NULL,
            field_id             TEXT NOT NULL,
            depth_inches         INTEGER NOT NULL,
            latitude             REAL NOT NULL,
            longitude            REAL NOT NULL,
            timestamp            TEXT NOT NULL,
            estimated_vwc        REAL NOT NULL,
            estimation_variance  REAL NOT NULL,
            confidence           REAL NOT NULL,
            is_hard_anchor       INTEGER NOT NULL,
            anchor_sensor        TEXT,
            trend_value          REAL,
            is_fallback          INTEGER NOT NULL,
            cell_hash            TEXT NOT NULL,
            PRIMARY KEY (field_id, timestamp, cell_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_grid_field_ts ON grid_cells (field_id, timestamp)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_events (
            year_month  TEXT NOT NULL,
            sequence    INTEGER NOT NULL,
            timestamp   TEXT NOT NULL,
            kind        TEXT NOT NULL,
            principal   TEXT NOT NULL,
            details     TEXT NOT NULL,
            own_hash    TEXT NOT NULL,
            PRIMARY KEY (year_month, sequence)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_kind ON audit_events (kind)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_principal ON audit_events (principal)")
        .execute(pool)
        .await?;

    Ok(())
}
