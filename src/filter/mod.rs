//! Component E: the recursive Bayesian soil-parameter filter (§4.5).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::model::soil::SoilParameters;

/// Predicted moisture state at a location, cached per (zone, depth) so the
/// next predict call has a baseline (§3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictedState {
    pub latitude: f64,
    pub longitude: f64,
    pub depth_inches: u32,
    pub predicted_vwc: f64,
    pub prediction_variance: f64,
    pub confidence: f64,
}

impl PredictedState {
    pub fn from_variance(latitude: f64, longitude: f64, depth_inches: u32, predicted_vwc: f64, variance: f64) -> Self {
        Self { latitude, longitude, depth_inches, predicted_vwc, prediction_variance: variance, confidence: 1.0 / (1.0 + variance) }
    }
}

/// Outcome of an update step, mirroring what the original engine returns
/// for diagnostics / sync payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub zone_id: String,
    pub residual: f64,
    pub parameters_updated: bool,
}

/// Per-zone state: learned soil parameters plus the last-prediction cache
/// keyed by depth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ZoneState {
    parameters: SoilParameters,
    last_predictions: BTreeMap<u32, PredictedState>,
}

/// Serialisable snapshot of the filter's learned state, used for
/// mirror-sync export/import (§4.5, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FilterSnapshot {
    pub zones: BTreeMap<String, SoilParameters>,
}

/// The recursive Bayesian filter. Updates are serialised per zone; cross-zone
/// updates are independent (§4.5).
pub struct BayesianFilter {
    learning_rate: f64,
    update_threshold: f64,
    zones: RwLock<BTreeMap<String, ZoneState>>,
}

impl BayesianFilter {
    pub fn new(learning_rate: f64, update_threshold: f64) -> Self {
        Self { learning_rate, update_threshold, zones: RwLock::new(BTreeMap::new()) }
    }

    /// `predict(zone, lat, lon, depth, ET_mm_per_day, hours_since_last) ->
    /// predicted_state` (§4.5).
    pub async fn predict(
        &self,
        zone_id: &str,
        latitude: f64,
        longitude: f64,
        depth_inches: u32,
        et_rate_mm_per_day: f64,
        hours_since_last: f64,
    ) -> PredictedState {
        let mut zones = self.zones.write().await;
        let zone = zones.entry(zone_id.to_string()).or_default();
        let params = zone.parameters;

        let baseline_vwc = zone
            .last_predictions
            .get(&depth_inches)
            .map(|p| p.predicted_vwc)
            .unwrap_or(params.field_capacity);

        let et_fraction = if depth_inches <= 18 {
            0.6
        } else if depth_inches <= 36 {
            0.3
        } else {
            0.1
        };
        let et_loss = (et_rate_mm_per_day / 24.0 * hours_since_last) / 1000.0 * et_fraction;

        let drainage = if baseline_vwc > params.field_capacity {
            let excess = baseline_vwc - params.field_capacity;
            (params.k_sat_cm_per_hr / 100.0 * (hours_since_last / 24.0) * 0.1).min(excess)
        } else {
            0.0
        };

        let predicted_vwc = (baseline_vwc - et_loss - drainage).clamp(params.wilting_point, 0.5);
        let variance = params.coefficient_variance * (1.0 + hours_since_last / 24.0);

        let state = PredictedState::from_variance(latitude, longitude, depth_inches, predicted_vwc, variance);
        zone.last_predictions.insert(depth_inches, state);
        state
    }

    /// `update(zone, sensor, depth, observed, predicted) -> update_record`
    /// (§4.5).
    pub async fn update(
        &self,
        zone_id: &str,
        depth_inches: u32,
        observed_vwc: f64,
        predicted_vwc: f64,
    ) -> UpdateOutcome {
        let mut zones = self.zones.write().await;
        let zone = zones.entry(zone_id.to_string()).or_default();

        let residual = observed_vwc - predicted_vwc;
        let mut parameters_updated = false;

        if residual.abs() > self.update_threshold {
            apply_residual(&mut zone.parameters, residual, self.learning_rate);
            parameters_updated = true;
        }

        if let Some(state) = zone.last_predictions.get_mut(&depth_inches) {
            state.predicted_vwc = observed_vwc;
            state.prediction_variance *= 0.5;
            state.confidence = 1.0 / (1.0 + state.prediction_variance);
        }

        UpdateOutcome { zone_id: zone_id.to_string(), residual, parameters_updated }
    }

    pub async fn parameters(&self, zone_id: &str) -> SoilParameters {
        self.zones.read().await.get(zone_id).map(|z| z.parameters).unwrap_or_default()
    }

    pub async fn export_snapshot(&self) -> FilterSnapshot {
        let zones = self.zones.read().await;
        FilterSnapshot { zones: zones.iter().map(|(id, z)| (id.clone(), z.parameters)).collect() }
    }

    pub async fn import_snapshot(&self, snapshot: FilterSnapshot) {
        let mut zones = self.zones.write().await;
        for (zone_id, parameters) in snapshot.zones {
            zones.entry(zone_id).or_default().parameters = parameters;
        }
    }
}

/// Shifts textural fractions toward more-clay/less-sand for a positive
/// (wetter than expected) residual, or the reverse, bounded and
/// renormalised, then recomputes the derived hydraulic properties (§4.5).
fn apply_residual(params: &mut SoilParameters, residual: f64, learning_rate: f64) {
    if residual.abs() < 0.02 {
        return;
    }

    if residual > 0.0 {
        params.clay_ratio = (params.clay_ratio + learning_rate * 0.05).min(0.6);
        params.sand_ratio = (params.sand_ratio - learning_rate * 0.05).max(0.1);
    } else {
        params.sand_ratio = (params.sand_ratio + learning_rate * 0.05).min(0.8);
        params.clay_ratio = (params.clay_ratio - learning_rate * 0.05).max(0.1);
    }

    let total = params.sand_ratio + params.silt_ratio + params.clay_ratio;
    params.sand_ratio /= total;
    params.silt_ratio /= total;
    params.clay_ratio /= total;

    recalculate_hydraulics(params);

    params.update_count += 1;
    params.coefficient_variance *= 0.95;
}

fn recalculate_hydraulics(params: &mut SoilParameters) {
    params.k_sat_cm_per_hr = 10f64.powf(-0.6 + 1.3 * params.sand_ratio - 0.6 * params.clay_ratio) * 100.0;
    params.field_capacity = 0.2576 - 0.002 * params.sand_ratio + 0.0036 * params.clay_ratio;
    params.wilting_point = 0.026 + 0.005 * params.clay_ratio;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn predict_falls_back_to_field_capacity_with_no_history() {
        let filter = BayesianFilter::new(0.05, 0.03);
        let state = filter.predict("Z1", 37.5, -105.8, 18, 5.0, 0.25).await;
        assert!(state.predicted_vwc <= 0.5 && state.predicted_vwc >= 0.08);
    }

    #[tokio::test]
    async fn update_below_threshold_does_not_mutate_parameters() {
        let filter = BayesianFilter::new(0.05, 0.03);
        let before = filter.parameters("Z1").await;
        filter.update("Z1", 18, 0.201, 0.2).await;
        let after = filter.parameters("Z1").await;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn repeated_positive_residual_shifts_toward_clay_and_invariants_hold() {
        let filter = BayesianFilter::new(0.05, 0.03);
        let initial = filter.parameters("Z1").await;

        for _ in 0..200 {
            let predicted = filter.predict("Z1", 37.5, -105.8, 18, 5.0, 0.25).await;
            filter.update("Z1", 18, predicted.predicted_vwc + 0.05, predicted.predicted_vwc).await;
        }

        let finalp = filter.parameters("Z1").await;
        assert!(finalp.sand_ratio <= initial.sand_ratio);
        assert!(finalp.clay_ratio >= initial.clay_ratio);
        assert!(finalp.coefficient_variance <= initial.coefficient_variance);
        assert!(finalp.invariants_hold());
    }

    #[tokio::test]
    async fn export_import_round_trips_predictions() {
        let filter = BayesianFilter::new(0.05, 0.03);
        filter.update("Z1", 18, 0.3, 0.2).await;
        let snapshot = filter.export_snapshot().await;

        let restored = BayesianFilter::new(0.05, 0.03);
        restored.import_snapshot(snapshot).await;

        let a = filter.predict("Z1", 37.5, -105.8, 18, 5.0, 1.0).await;
        let b = restored.predict("Z1", 37.5, -105.8, 18, 5.0, 1.0).await;
        assert_eq!(a.predicted_vwc, b.predicted_vwc);
    }
}
