use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Variogram parameters for the regression-kriging engine (§4.6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VariogramConfig {
    pub nugget: f64,
    pub sill: f64,
    pub range_m: f64,
}

impl Default for VariogramConfig {
    fn default() -> Self {
        Self { nugget: 0.001, sill: 0.05, range_m: 150.0 }
    }
}

/// Hub configuration, covering every option enumerated in §6 plus the
/// deployment identity fields the orchestrator needs at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity of this edge node, carried in snapshots and logs.
    pub hub_id: String,
    /// Field ids this hub serves.
    pub served_field_ids: Vec<String>,
    /// Root directory for the embedded database files and archives.
    pub data_dir: String,

    pub measurement_interval: Duration,
    pub grid_interval: Duration,
    pub sync_interval: Duration,
    pub heartbeat_interval: Duration,
    pub failover_timeout: Duration,
    pub valve_timeout: Duration,
    pub grid_cycle_soft_deadline: Duration,

    pub retention_months: u32,

    pub learning_rate: f64,
    pub update_threshold: f64,

    pub variogram: VariogramConfig,
    pub trend_weight: f64,
    pub grid_resolution_m: f64,
    pub grid_max_cells: usize,

    pub deep_percolation_threshold: f64,

    /// Key id used when signing forensic hashes; the HMAC key itself is
    /// supplied out of band by the collaborator, never logged or stored.
    pub signing_key_id: String,
}

impl Config {
    /// Load configuration from environment variables, following the
    /// reference platform's `dotenvy` + per-field `env::var` pattern.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            hub_id: env::var("HUB_ID").unwrap_or_else(|_| "hub-001".to_string()),
            served_field_ids: env::var("SERVED_FIELD_IDS")
                .unwrap_or_default()
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|s| s.trim().to_string())
                .collect(),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),

            measurement_interval: Duration::from_secs(
                env::var("MEASUREMENT_INTERVAL_SECS")
                    .unwrap_or_else(|_| "900".to_string())
                    .parse()
                    .context("Invalid MEASUREMENT_INTERVAL_SECS")?,
            ),
            grid_interval: Duration::from_secs(
                env::var("GRID_INTERVAL_SECS")
                    .unwrap_or_else(|_| "900".to_string())
                    .parse()
                    .context("Invalid GRID_INTERVAL_SECS")?,
            ),
            sync_interval: Duration::from_secs(
                env::var("SYNC_INTERVAL_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("Invalid SYNC_INTERVAL_SECS")?,
            ),
            heartbeat_interval: Duration::from_secs(
                env::var("HEARTBEAT_INTERVAL_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .context("Invalid HEARTBEAT_INTERVAL_SECS")?,
            ),
            failover_timeout: Duration::from_secs(
                env::var("FAILOVER_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("Invalid FAILOVER_TIMEOUT_SECS")?,
            ),
            valve_timeout: Duration::from_secs(
                env::var("VALVE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .context("Invalid VALVE_TIMEOUT_SECS")?,
            ),
            grid_cycle_soft_deadline: Duration::from_secs(
                env::var("GRID_CYCLE_SOFT_DEADLINE_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .context("Invalid GRID_CYCLE_SOFT_DEADLINE_SECS")?,
            ),

            retention_months: env::var("RETENTION_MONTHS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .context("Invalid RETENTION_MONTHS")?,

            learning_rate: env::var("LEARNING_RATE")
                .unwrap_or_else(|_| "0.05".to_string())
                .parse()
                .context("Invalid LEARNING_RATE")?,
            update_threshold: env::var("UPDATE_THRESHOLD")
                .unwrap_or_else(|_| "0.03".to_string())
                .parse()
                .context("Invalid UPDATE_THRESHOLD")?,

            variogram: VariogramConfig {
                nugget: env::var("VARIOGRAM_NUGGET")
                    .unwrap_or_else(|_| "0.001".to_string())
                    .parse()
                    .context("Invalid VARIOGRAM_NUGGET")?,
                sill: env::var("VARIOGRAM_SILL")
                    .unwrap_or_else(|_| "0.05".to_string())
                    .parse()
                    .context("Invalid VARIOGRAM_SILL")?,
                range_m: env::var("VARIOGRAM_RANGE_M")
                    .unwrap_or_else(|_| "150".to_string())
                    .parse()
                    .context("Invalid VARIOGRAM_RANGE_M")?,
            },
            trend_weight: env::var("TREND_WEIGHT")
                .unwrap_or_else(|_| "0.3".to_string())
                .parse()
                .context("Invalid TREND_WEIGHT")?,
            grid_resolution_m: env::var("GRID_RESOLUTION_M")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("Invalid GRID_RESOLUTION_M")?,
            grid_max_cells: env::var("GRID_MAX_CELLS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .context("Invalid GRID_MAX_CELLS")?,

            deep_percolation_threshold: env::var("DEEP_PERCOLATION_THRESHOLD")
                .unwrap_or_else(|_| "0.42".to_string())
                .parse()
                .context("Invalid DEEP_PERCOLATION_THRESHOLD")?,

            signing_key_id: env::var("SIGNING_KEY_ID").unwrap_or_else(|_| "hub-key-1".to_string()),
        };

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.hub_id.is_empty() {
            anyhow::bail!("HUB_ID must not be empty");
        }

        if self.measurement_interval.is_zero() {
            anyhow::bail!("MEASUREMENT_INTERVAL_SECS must be greater than 0");
        }
        if self.grid_interval.is_zero() {
            anyhow::bail!("GRID_INTERVAL_SECS must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.learning_rate) {
            anyhow::bail!("LEARNING_RATE must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.update_threshold) {
            anyhow::bail!("UPDATE_THRESHOLD must be within [0, 1]");
        }

        if self.variogram.range_m <= 0.0 {
            anyhow::bail!("VARIOGRAM_RANGE_M must be positive");
        }
        if self.variogram.sill < 0.0 || self.variogram.nugget < 0.0 {
            anyhow::bail!("variogram nugget/sill must be non-negative");
        }

        if self.grid_resolution_m <= 0.0 {
            anyhow::bail!("GRID_RESOLUTION_M must be positive");
        }
        if self.grid_max_cells == 0 {
            anyhow::bail!("GRID_MAX_CELLS must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.deep_percolation_threshold) {
            anyhow::bail!("DEEP_PERCOLATION_THRESHOLD must be within [0, 1]");
        }

        Ok(())
    }

    /// sqlite connection string for the hot measurement/grid/audit store.
    pub fn database_url(&self) -> String {
        format!("sqlite://{}/hub.db", self.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_config_validation_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("LEARNING_RATE");
        env::remove_var("DEEP_PERCOLATION_THRESHOLD");
        let config = Config::load();
        assert!(config.is_ok());
    }

    #[test]
    fn test_invalid_learning_rate() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("LEARNING_RATE", "1.5");
        let config = Config::load();
        assert!(config.is_err());
        env::remove_var("LEARNING_RATE");
    }

    #[test]
    fn database_url_points_into_data_dir() {
        let mut config = default_for_test();
        config.data_dir = "/var/lib/hydrosense".to_string();
        assert_eq!(config.database_url(), "sqlite:///var/lib/hydrosense/hub.db");
    }

    fn default_for_test() -> Config {
        Config {
            hub_id: "hub-test".to_string(),
            served_field_ids: vec!["F001".to_string()],
            data_dir: "./data".to_string(),
            measurement_interval: Duration::from_secs(900),
            grid_interval: Duration::from_secs(900),
            sync_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            failover_timeout: Duration::from_secs(30),
            valve_timeout: Duration::from_secs(2),
            grid_cycle_soft_deadline: Duration::from_secs(5),
            retention_months: 24,
            learning_rate: 0.05,
            update_threshold: 0.03,
            variogram: VariogramConfig::default(),
            trend_weight: 0.3,
            grid_resolution_m: 1.0,
            grid_max_cells: 10_000,
            deep_percolation_threshold: 0.42,
            signing_key_id: "hub-key-1".to_string(),
        }
    }
}
