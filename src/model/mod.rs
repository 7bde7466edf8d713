pub mod sensor;
pub mod measurement;
pub mod soil;
pub mod grid;
pub mod valve;
pub mod decision;
pub mod audit;
pub mod snapshot;

pub use sensor::{Sensor, SensorKind};
pub use measurement::{Measurement, MeasurementInput, Batch};
pub use soil::SoilParameters;
pub use grid::GridCell;
pub use valve::{Valve, ValveState};
pub use decision::{IrrigationDecision, IrrigationStatus, ScheduledIrrigation};
pub use audit::AuditEvent;
pub use snapshot::SystemStateSnapshot;

/// Genesis hash: 64 hex zeros, the previous-hash of the first record in any
/// chain (§3).
pub fn genesis_hash() -> String {
    "0".repeat(64)
}

#[cfg(test)]
mod tests {
    use super::genesis_hash;

    #[test]
    fn genesis_hash_is_64_hex_chars() {
        let g = genesis_hash();
        assert_eq!(g.len(), 64);
        assert!(g.chars().all(|c| c == '0'));
    }
}
