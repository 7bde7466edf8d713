//! Components B, C, D: the embedded hot store and its three logical
//! tables — the append-only measurement log, the grid store, and the
//! audit log — plus archival of records older than the retention horizon.

pub mod audit_log;
pub mod grid_store;
pub mod measurement_log;
pub(crate) mod schema;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

use crate::error::HubResult;

pub use audit_log::AuditLog;
pub use grid_store::GridStore;
pub use measurement_log::{AppendOutcome, MeasurementLog};

/// Opens (creating if absent) the embedded sqlite database backing the hot
/// store, and ensures its schema exists. Mirrors the reference platform's
/// `DataStorage::new`, adapted from a Postgres pool to an embedded,
/// single-writer sqlite file per §5's deployment model (see DESIGN.md).
pub async fn open_pool(data_dir: &str) -> HubResult<SqlitePool> {
    tokio::fs::create_dir_all(data_dir).await?;
    let db_path = Path::new(data_dir).join("hub.db");

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    schema::ensure_schema(&pool).await?;

    Ok(pool)
}
