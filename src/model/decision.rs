use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Irrigation decision status (§3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrrigationStatus {
    None,
    Recommended,
    Active,
    Saturation,
    DeepPercolationRisk,
}

/// Per-zone decision record emitted by the irrigation decision engine
/// (§3, §4.7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationDecision {
    pub zone_id: String,
    pub field_id: String,
    pub timestamp: DateTime<Utc>,
    pub mean_vwc: f64,
    pub target_vwc: f64,
    pub status: IrrigationStatus,
    pub recommended_duration_minutes: i64,
    pub confidence: f64,
    pub cells_considered: usize,
}

impl IrrigationDecision {
    /// A decision recommending irrigation is fireable iff status =
    /// RECOMMENDED, confidence > 0.7, and duration > 0 (§3).
    pub fn is_fireable(&self) -> bool {
        self.status == IrrigationStatus::Recommended
            && self.confidence > 0.7
            && self.recommended_duration_minutes > 0
    }
}

/// An operator- or planner-supplied irrigation window, distinct from the
/// engine's own recommendations; carried in the system state snapshot.
/// Supplemental, grounded in the original engine's scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledIrrigation {
    pub zone_id: String,
    pub start: DateTime<Utc>,
    pub duration_minutes: u32,
    pub principal: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(status: IrrigationStatus, confidence: f64, duration: i64) -> IrrigationDecision {
        IrrigationDecision {
            zone_id: "Z1".to_string(),
            field_id: "F001".to_string(),
            timestamp: Utc::now(),
            mean_vwc: 0.2,
            target_vwc: 0.225,
            status,
            recommended_duration_minutes: duration,
            confidence,
            cells_considered: 10,
        }
    }

    #[test]
    fn fireable_requires_all_three_conditions() {
        assert!(base(IrrigationStatus::Recommended, 0.8, 30).is_fireable());
        assert!(!base(IrrigationStatus::Recommended, 0.6, 30).is_fireable());
        assert!(!base(IrrigationStatus::Recommended, 0.8, 0).is_fireable());
        assert!(!base(IrrigationStatus::None, 0.8, 30).is_fireable());
    }
}
