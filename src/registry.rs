//! Component K: the sensor registry (§2 "Supplemented components").
//!
//! Grounded in the original engine's `SensorNetwork`: a flat collection of
//! installed sensors, queryable by field, with an aggregate network hash for
//! audit purposes.

use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::forensic::sha256_hex;
use crate::model::sensor::Sensor;

pub struct SensorRegistry {
    sensors: RwLock<BTreeMap<String, Sensor>>,
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self { sensors: RwLock::new(BTreeMap::new()) }
    }

    pub async fn register(&self, sensor: Sensor) {
        self.sensors.write().await.insert(sensor.sensor_id.clone(), sensor);
    }

    pub async fn get(&self, sensor_id: &str) -> Option<Sensor> {
        self.sensors.read().await.get(sensor_id).cloned()
    }

    pub async fn sensors_by_field(&self, field_id: &str) -> Vec<Sensor> {
        self.sensors.read().await.values().filter(|s| s.field_id == field_id).cloned().collect()
    }

    pub async fn sensors_by_zone(&self, zone_id: &str) -> Vec<Sensor> {
        self.sensors.read().await.values().filter(|s| s.zone_id == zone_id).cloned().collect()
    }

    pub async fn total_sensors(&self) -> usize {
        self.sensors.read().await.len()
    }

    pub async fn total_measurement_points(&self) -> usize {
        self.sensors.read().await.values().map(|s| s.measurement_point_count()).sum()
    }

    pub async fn master_nail_count(&self) -> usize {
        self.sensors.read().await.values().filter(|s| s.is_master_nail()).count()
    }

    /// Aggregate hash of every sensor's identity hash, sorted for
    /// determinism, for inclusion in audit snapshots.
    pub async fn compute_network_hash(&self) -> String {
        let mut hashes: Vec<String> = self.sensors.read().await.values().map(|s| s.compute_identity_hash()).collect();
        hashes.sort();
        let canonical = format!("[{}]", hashes.iter().map(|h| format!("\"{h}\"")).collect::<Vec<_>>().join(","));
        sha256_hex(canonical.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sensor::SensorKind;

    #[tokio::test]
    async fn registers_and_filters_by_field() {
        let registry = SensorRegistry::new();
        registry.register(Sensor::new("B001", SensorKind::SurfaceBlanket2Depth, "F001", "Z1", 37.5, -105.8)).await;
        registry.register(Sensor::new("B002", SensorKind::SurfaceBlanket2Depth, "F002", "Z2", 37.6, -105.9)).await;

        let f1_sensors = registry.sensors_by_field("F001").await;
        assert_eq!(f1_sensors.len(), 1);
        assert_eq!(registry.total_sensors().await, 2);
    }

    #[tokio::test]
    async fn network_hash_is_order_independent() {
        let blanket = Sensor::new("B001", SensorKind::SurfaceBlanket2Depth, "F001", "Z1", 37.5, -105.8);
        let master = Sensor::new("M001", SensorKind::VerticalMedium5Depth, "F001", "Z1", 37.5, -105.8);

        let a = SensorRegistry::new();
        a.register(blanket.clone()).await;
        a.register(master.clone()).await;

        let b = SensorRegistry::new();
        b.register(master).await;
        b.register(blanket).await;

        assert_eq!(a.compute_network_hash().await, b.compute_network_hash().await);
    }
}
