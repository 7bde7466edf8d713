use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::round_to;
use crate::error::{HubError, HubResult};
use crate::model::measurement::MeasurementInput;

/// Produces the canonical byte string for a measurement: fixed field
/// ordering via lexicographic key sort, no extraneous whitespace, and fixed
/// numeric rounding (§4.1). `previous_hash` is part of the canonical record
/// but `own_hash`/MAC are not, since they are derived from it.
pub fn canonicalise_measurement(input: &MeasurementInput, previous_hash: &str) -> HubResult<String> {
    if input.sensor_id.is_empty() {
        return Err(HubError::invalid_canonicalisation("sensor_id missing"));
    }

    let mut fields: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
    fields.insert("sensor_id", serde_json::Value::String(input.sensor_id.clone()));
    fields.insert("depth_inches", serde_json::json!(input.depth_inches));
    fields.insert("timestamp", serde_json::Value::String(input.timestamp.to_rfc3339()));
    fields.insert("vwc", serde_json::json!(round_to(input.vwc, 6)));
    fields.insert("previous_hash", serde_json::Value::String(previous_hash.to_string()));

    if let Some(t) = input.soil_temp_c {
        fields.insert("soil_temp_c", serde_json::json!(round_to(t, 2)));
    }
    if let Some(p) = input.water_potential {
        fields.insert("water_potential", serde_json::json!(round_to(p, 4)));
    }
    fields.insert("signal_quality", serde_json::json!(round_to(input.signal_quality, 4)));

    serde_json::to_string(&fields).map_err(HubError::from)
}

/// Produces the canonical byte string for a batch's binding metadata
/// (§3, §4.1): previous batch hash, first/last own-hash, Merkle root,
/// count, and timestamp.
pub fn canonicalise_batch(
    previous_batch_hash: &str,
    first_own_hash: &str,
    last_own_hash: &str,
    merkle_root: &str,
    count: usize,
    timestamp: DateTime<Utc>,
) -> String {
    let mut fields: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
    fields.insert("count", serde_json::json!(count));
    fields.insert("first_own_hash", serde_json::Value::String(first_own_hash.to_string()));
    fields.insert("last_own_hash", serde_json::Value::String(last_own_hash.to_string()));
    fields.insert("merkle_root", serde_json::Value::String(merkle_root.to_string()));
    fields.insert("previous_batch_hash", serde_json::Value::String(previous_batch_hash.to_string()));
    fields.insert("timestamp", serde_json::Value::String(timestamp.to_rfc3339()));

    serde_json::to_string(&fields).expect("BTreeMap<&str, Value> always serialises")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> MeasurementInput {
        MeasurementInput {
            sensor_id: "B001".to_string(),
            depth_inches: 18,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            vwc: 0.123456789,
            soil_temp_c: None,
            water_potential: None,
            signal_quality: 1.0,
        }
    }

    #[test]
    fn canonical_form_is_stable_given_identical_inputs() {
        let a = canonicalise_measurement(&sample(), "prev").unwrap();
        let b = canonicalise_measurement(&sample(), "prev").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn vwc_is_rounded_to_six_decimals() {
        let canonical = canonicalise_measurement(&sample(), "prev").unwrap();
        assert!(canonical.contains("0.123457"));
    }

    #[test]
    fn optional_fields_are_omitted_when_absent() {
        let canonical = canonicalise_measurement(&sample(), "prev").unwrap();
        assert!(!canonical.contains("soil_temp_c"));
        assert!(!canonical.contains("water_potential"));
    }

    #[test]
    fn rejects_missing_sensor_id() {
        let mut input = sample();
        input.sensor_id.clear();
        assert!(canonicalise_measurement(&input, "prev").is_err());
    }
}
