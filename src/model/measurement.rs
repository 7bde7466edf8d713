use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a producer hands the ingest boundary (§6 "Probe ingest"): the core
/// computes hashes and MACs, producers do not supply them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementInput {
    pub sensor_id: String,
    pub depth_inches: u32,
    pub timestamp: DateTime<Utc>,
    pub vwc: f64,
    pub soil_temp_c: Option<f64>,
    pub water_potential: Option<f64>,
    pub signal_quality: f64,
}

/// An immutable, hash-chained measurement (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub sensor_id: String,
    pub depth_inches: u32,
    pub timestamp: DateTime<Utc>,
    pub vwc: f64,
    pub soil_temp_c: Option<f64>,
    pub water_potential: Option<f64>,
    pub signal_quality: f64,
    pub previous_hash: String,
    pub own_hash: String,
    pub signature: String,
}

impl Measurement {
    pub fn field_zone_key(&self) -> &str {
        &self.sensor_id
    }
}

/// An ordered batch of measurements plus a Merkle root over their own-hashes
/// and a batch-hash binding the batch's position in the chain (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub measurements: Vec<Measurement>,
    pub merkle_root: String,
    pub previous_batch_hash: String,
    pub batch_hash: String,
    pub timestamp: DateTime<Utc>,
}

impl Batch {
    pub fn first_own_hash(&self) -> Option<&str> {
        self.measurements.first().map(|m| m.own_hash.as_str())
    }

    pub fn last_own_hash(&self) -> Option<&str> {
        self.measurements.last().map(|m| m.own_hash.as_str())
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}
