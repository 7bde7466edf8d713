use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Nail-architecture sensor kind (§3). Each kind has a canonical default
/// depth set assigned at construction when depths are not given explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SensorKind {
    SurfaceBlanket2Depth,
    VerticalMedium5Depth,
    VerticalLarge7Depth,
}

impl SensorKind {
    /// Canonical installed depths (inches) for this kind.
    pub fn default_depths(&self) -> Vec<u32> {
        match self {
            SensorKind::SurfaceBlanket2Depth => vec![12, 18],
            SensorKind::VerticalMedium5Depth => vec![18, 24, 30, 36, 42],
            SensorKind::VerticalLarge7Depth => vec![18, 24, 30, 36, 42, 52, 60],
        }
    }

    pub fn is_master_nail(&self) -> bool {
        matches!(self, SensorKind::VerticalMedium5Depth | SensorKind::VerticalLarge7Depth)
    }

    fn label(&self) -> &'static str {
        match self {
            SensorKind::SurfaceBlanket2Depth => "surface-blanket-2depth",
            SensorKind::VerticalMedium5Depth => "vertical-medium-5depth",
            SensorKind::VerticalLarge7Depth => "vertical-large-7depth",
        }
    }
}

/// Geographic location with an owning field reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorLocation {
    pub field_id_hash: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: Option<f64>,
}

/// A stable, immutable-after-installation sensor fixture (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sensor {
    pub sensor_id: String,
    pub kind: SensorKind,
    pub field_id: String,
    pub zone_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: Option<f64>,
    pub depths_inches: Vec<u32>,
    pub installed_at: DateTime<Utc>,
    pub hardware_version: String,
    pub public_key_hash: Option<String>,
}

impl Sensor {
    /// Construct a sensor, defaulting its installed depths from its kind
    /// when none are given (mirrors the original engine's `__post_init__`).
    pub fn new(
        sensor_id: impl Into<String>,
        kind: SensorKind,
        field_id: impl Into<String>,
        zone_id: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        let depths = kind.default_depths();
        Self {
            sensor_id: sensor_id.into(),
            kind,
            field_id: field_id.into(),
            zone_id: zone_id.into(),
            latitude,
            longitude,
            elevation_m: None,
            depths_inches: depths,
            installed_at: Utc::now(),
            hardware_version: "v1.0".to_string(),
            public_key_hash: None,
        }
    }

    pub fn measurement_point_count(&self) -> usize {
        self.depths_inches.len()
    }

    pub fn is_master_nail(&self) -> bool {
        self.kind.is_master_nail()
    }

    pub fn has_depth(&self, depth_inches: u32) -> bool {
        self.depths_inches.contains(&depth_inches)
    }

    /// SHA-256 over the canonical sensor identity, a supplemental forensic
    /// field beyond the distilled data model.
    pub fn compute_identity_hash(&self) -> String {
        let canonical = format!(
            "{{\"depths\":{:?},\"field_id\":\"{}\",\"hardware\":\"{}\",\"installed\":\"{}\",\"kind\":\"{}\",\"latitude\":{},\"longitude\":{},\"sensor_id\":\"{}\",\"zone_id\":\"{}\"}}",
            self.depths_inches,
            self.field_id,
            self.hardware_version,
            self.installed_at.to_rfc3339(),
            self.kind.label(),
            self.latitude,
            self.longitude,
            self.sensor_id,
            self.zone_id,
        );
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blanket_defaults_to_two_depths() {
        let s = Sensor::new("B001", SensorKind::SurfaceBlanket2Depth, "F001", "Z1", 37.5, -105.8);
        assert_eq!(s.depths_inches, vec![12, 18]);
        assert!(!s.is_master_nail());
    }

    #[test]
    fn master_medium_defaults_to_five_depths() {
        let s = Sensor::new("M001", SensorKind::VerticalMedium5Depth, "F001", "Z1", 37.5, -105.8);
        assert_eq!(s.depths_inches, vec![18, 24, 30, 36, 42]);
        assert!(s.is_master_nail());
    }

    #[test]
    fn identity_hash_is_64_hex_chars_and_stable() {
        let s = Sensor::new("M001", SensorKind::VerticalLarge7Depth, "F001", "Z1", 37.5, -105.8);
        let h1 = s.compute_identity_hash();
        let h2 = s.compute_identity_hash();
        assert_eq!(h1.len(), 64);
        assert_eq!(h1, h2);
    }
}
