use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single 1 m (configurable) virtual-grid cell emitted by the
/// regression-kriging engine (§3, §4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub cell_id: String,
    pub field_id: String,
    pub depth_inches: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub estimated_vwc: f64,
    pub estimation_variance: f64,
    pub confidence: f64,
    pub is_hard_anchor: bool,
    pub anchor_sensor: Option<String>,
    pub trend_value: Option<f64>,
    pub is_fallback: bool,
    pub cell_hash: String,
}

impl GridCell {
    pub fn is_surface(&self) -> bool {
        self.depth_inches <= 18
    }

    pub fn is_deep(&self) -> bool {
        self.depth_inches >= 42
    }
}
