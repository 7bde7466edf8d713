use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::decision::ScheduledIrrigation;
use super::soil::SoilParameters;
use super::valve::ValveState;

/// System state snapshot exchanged between hub and mirror (§3, §4.9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStateSnapshot {
    pub hub_id: String,
    pub timestamp: DateTime<Utc>,
    pub zone_parameters: BTreeMap<String, SoilParameters>,
    pub last_measurement_hash: String,
    pub total_record_count: u64,
    pub grid_merkle_root: String,
    pub valve_states: BTreeMap<String, ValveState>,
    pub scheduled_irrigation: Vec<ScheduledIrrigation>,
}
