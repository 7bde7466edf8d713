use serde::{Deserialize, Serialize};

/// Per-zone soil hydraulic parameters, online-learned by the Bayesian
/// filter (§4.5). Created on first reference to a zone, mutated only by the
/// filter's update step, never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoilParameters {
    pub k_sat_cm_per_hr: f64,
    pub field_capacity: f64,
    pub wilting_point: f64,
    pub sand_ratio: f64,
    pub silt_ratio: f64,
    pub clay_ratio: f64,
    pub coefficient_variance: f64,
    pub update_count: u64,
}

impl Default for SoilParameters {
    fn default() -> Self {
        Self {
            k_sat_cm_per_hr: 10.0,
            field_capacity: 0.25,
            wilting_point: 0.08,
            sand_ratio: 0.33,
            silt_ratio: 0.33,
            clay_ratio: 0.34,
            coefficient_variance: 0.1,
            update_count: 0,
        }
    }
}

impl SoilParameters {
    /// Invariant check used by tests and by the filter after every mutation
    /// (§8 quantified invariants).
    pub fn invariants_hold(&self) -> bool {
        let texture_sum_ok = (self.sand_ratio + self.silt_ratio + self.clay_ratio - 1.0).abs() < 1e-9;
        let fractions_in_range = [self.sand_ratio, self.silt_ratio, self.clay_ratio]
            .iter()
            .all(|f| (0.05..=0.95).contains(f));
        let fc_le_half = self.field_capacity <= 0.5;
        let pwp_le_fc = self.wilting_point <= self.field_capacity;
        let ksat_positive = self.k_sat_cm_per_hr > 0.0;

        texture_sum_ok && fractions_in_range && fc_le_half && pwp_le_fc && ksat_positive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parameters_satisfy_invariants() {
        assert!(SoilParameters::default().invariants_hold());
    }
}
