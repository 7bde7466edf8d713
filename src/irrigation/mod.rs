//! Component G: the irrigation decision engine (§4.7).

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::model::decision::{IrrigationDecision, IrrigationStatus};
use crate::model::grid::GridCell;
use crate::model::soil::SoilParameters;
use crate::storage::audit_log::AuditLog;

const SATURATION_FRACTION: f64 = 0.5;
const RECOMMEND_DEFICIT_FRACTION: f64 = 0.3;
const TARGET_FRACTION_OF_FIELD_CAPACITY: f64 = 0.9;
const DURATION_MINUTES_PER_DEFICIT_UNIT: f64 = 1500.0;
const MAX_DURATION_MINUTES: i64 = 120;

/// Outcome of a deep-percolation check, surfaced so the caller can decide
/// whether an `emergency_stop_all` is mandatory (§4.7 rule 1).
#[derive(Debug, Clone, PartialEq)]
pub struct DeepPercolationAlert {
    pub zone_id: String,
    pub field_id: String,
    pub offending_cell_ids: Vec<String>,
    pub max_vwc: f64,
}

/// Stateless decision engine: every call is a pure function of its inputs
/// plus, on a deep-percolation finding, a side effect of logging an audit
/// event (§4.4, §4.7).
pub struct IrrigationDecisionEngine<'a> {
    audit_log: &'a AuditLog,
    deep_percolation_threshold: f64,
}

impl<'a> IrrigationDecisionEngine<'a> {
    pub fn new(audit_log: &'a AuditLog, deep_percolation_threshold: f64) -> Self {
        Self { audit_log, deep_percolation_threshold }
    }

    /// Evaluates §4.7's four rules in order; the first match wins.
    pub async fn evaluate(
        &self,
        zone_id: &str,
        field_id: &str,
        cells: &[GridCell],
        soil: SoilParameters,
        timestamp: DateTime<Utc>,
    ) -> IrrigationDecision {
        if cells.is_empty() {
            return IrrigationDecision {
                zone_id: zone_id.to_string(),
                field_id: field_id.to_string(),
                timestamp,
                mean_vwc: 0.0,
                target_vwc: soil.field_capacity * TARGET_FRACTION_OF_FIELD_CAPACITY,
                status: IrrigationStatus::None,
                recommended_duration_minutes: 0,
                confidence: 0.0,
                cells_considered: 0,
            };
        }

        let surface_cells: Vec<&GridCell> = cells.iter().filter(|c| !c.is_deep()).collect();
        let deep_cells: Vec<&GridCell> = cells.iter().filter(|c| c.is_deep()).collect();

        let offending: Vec<&GridCell> =
            deep_cells.iter().copied().filter(|c| c.estimated_vwc > self.deep_percolation_threshold).collect();

        let mean_vwc = mean(cells.iter().map(|c| c.estimated_vwc));
        let target_vwc = soil.field_capacity * TARGET_FRACTION_OF_FIELD_CAPACITY;
        let confidence = confidence_from_variance(cells.iter().map(|c| c.estimated_vwc), mean_vwc);

        if !offending.is_empty() {
            let max_vwc = offending.iter().map(|c| c.estimated_vwc).fold(f64::MIN, f64::max);
            let mut details = BTreeMap::new();
            details.insert("zone_id".to_string(), zone_id.to_string());
            details.insert("field_id".to_string(), field_id.to_string());
            details.insert("max_vwc".to_string(), format!("{max_vwc:.6}"));
            details.insert(
                "offending_cell_ids".to_string(),
                offending.iter().map(|c| c.cell_id.as_str()).collect::<Vec<_>>().join(","),
            );
            let _ = self.audit_log.log_event("deep_percolation_alert", "system", details).await;

            return IrrigationDecision {
                zone_id: zone_id.to_string(),
                field_id: field_id.to_string(),
                timestamp,
                mean_vwc,
                target_vwc,
                status: IrrigationStatus::DeepPercolationRisk,
                recommended_duration_minutes: 0,
                confidence,
                cells_considered: cells.len(),
            };
        }

        let above_fc = surface_cells.iter().filter(|c| c.estimated_vwc > soil.field_capacity).count();
        if !surface_cells.is_empty() && (above_fc as f64) > SATURATION_FRACTION * surface_cells.len() as f64 {
            return IrrigationDecision {
                zone_id: zone_id.to_string(),
                field_id: field_id.to_string(),
                timestamp,
                mean_vwc,
                target_vwc,
                status: IrrigationStatus::Saturation,
                recommended_duration_minutes: 0,
                confidence,
                cells_considered: cells.len(),
            };
        }

        let below_target = cells.iter().filter(|c| c.estimated_vwc < target_vwc).count();
        if mean_vwc < target_vwc && (below_target as f64) >= RECOMMEND_DEFICIT_FRACTION * cells.len() as f64 {
            let deficit = target_vwc - mean_vwc;
            let duration = ((deficit * DURATION_MINUTES_PER_DEFICIT_UNIT).floor() as i64).min(MAX_DURATION_MINUTES);

            return IrrigationDecision {
                zone_id: zone_id.to_string(),
                field_id: field_id.to_string(),
                timestamp,
                mean_vwc,
                target_vwc,
                status: IrrigationStatus::Recommended,
                recommended_duration_minutes: duration,
                confidence,
                cells_considered: cells.len(),
            };
        }

        IrrigationDecision {
            zone_id: zone_id.to_string(),
            field_id: field_id.to_string(),
            timestamp,
            mean_vwc,
            target_vwc,
            status: IrrigationStatus::None,
            recommended_duration_minutes: 0,
            confidence,
            cells_considered: cells.len(),
        }
    }
}

fn mean(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Confidence = max(0.5, 1 - 10·var(VWC)) (§4.7).
fn confidence_from_variance(values: impl Iterator<Item = f64> + Clone, mean_vwc: f64) -> f64 {
    let (sum_sq, count) = values.fold((0.0, 0usize), |(s, c), v| (s + (v - mean_vwc).powi(2), c + 1));
    if count == 0 {
        0.5
    } else {
        let variance = sum_sq / count as f64;
        (1.0 - 10.0 * variance).max(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_pool::test_pool;

    mod tempfile_pool {
        use sqlx::sqlite::SqlitePoolOptions;
        use sqlx::SqlitePool;

        pub async fn test_pool() -> SqlitePool {
            let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
            crate::storage::schema::ensure_schema(&pool).await.unwrap();
            pool
        }
    }

    fn cell(depth: u32, vwc: f64) -> GridCell {
        GridCell {
            cell_id: format!("c-{depth}-{vwc}"),
            field_id: "F001".to_string(),
            depth_inches: depth,
            latitude: 37.5,
            longitude: -105.8,
            timestamp: Utc::now(),
            estimated_vwc: vwc,
            estimation_variance: 0.001,
            confidence: 0.9,
            is_hard_anchor: false,
            anchor_sensor: None,
            trend_value: None,
            is_fallback: false,
            cell_hash: "h".to_string(),
        }
    }

    #[tokio::test]
    async fn deep_percolation_wins_over_every_other_rule() {
        let pool = test_pool().await;
        let audit = AuditLog::new(pool);
        let engine = IrrigationDecisionEngine::new(&audit, 0.42);
        let cells = vec![cell(48, 0.5), cell(18, 0.05)];
        let soil = SoilParameters::default();
        let decision = engine.evaluate("Z1", "F001", &cells, soil, Utc::now()).await;
        assert_eq!(decision.status, IrrigationStatus::DeepPercolationRisk);
    }

    #[tokio::test]
    async fn saturation_detected_when_majority_of_surface_above_field_capacity() {
        let pool = test_pool().await;
        let audit = AuditLog::new(pool);
        let engine = IrrigationDecisionEngine::new(&audit, 0.42);
        let soil = SoilParameters::default();
        let cells = vec![cell(12, soil.field_capacity + 0.05), cell(12, soil.field_capacity + 0.05), cell(12, 0.1)];
        let decision = engine.evaluate("Z1", "F001", &cells, soil, Utc::now()).await;
        assert_eq!(decision.status, IrrigationStatus::Saturation);
    }

    #[tokio::test]
    async fn recommends_irrigation_on_significant_deficit() {
        let pool = test_pool().await;
        let audit = AuditLog::new(pool);
        let engine = IrrigationDecisionEngine::new(&audit, 0.42);
        let soil = SoilParameters::default();
        let cells = vec![cell(12, 0.05), cell(12, 0.05), cell(12, 0.05), cell(12, 0.05)];
        let decision = engine.evaluate("Z1", "F001", &cells, soil, Utc::now()).await;
        assert_eq!(decision.status, IrrigationStatus::Recommended);
        assert!(decision.recommended_duration_minutes > 0);
        assert!(decision.recommended_duration_minutes <= MAX_DURATION_MINUTES);
    }

    #[tokio::test]
    async fn no_action_when_moisture_is_adequate() {
        let pool = test_pool().await;
        let audit = AuditLog::new(pool);
        let engine = IrrigationDecisionEngine::new(&audit, 0.42);
        let soil = SoilParameters::default();
        let cells = vec![cell(12, soil.field_capacity * 0.95), cell(12, soil.field_capacity * 0.92)];
        let decision = engine.evaluate("Z1", "F001", &cells, soil, Utc::now()).await;
        assert_eq!(decision.status, IrrigationStatus::None);
    }
}
