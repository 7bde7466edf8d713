//! Spherical variogram model (§4.6).

/// Spherical variogram parameters: nugget c0, sill c, range a (metres).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalVariogram {
    pub nugget: f64,
    pub sill: f64,
    pub range_m: f64,
}

impl SphericalVariogram {
    pub fn new(nugget: f64, sill: f64, range_m: f64) -> Self {
        Self { nugget, sill, range_m }
    }

    /// γ(h) = c0 + c·(1.5 h/a − 0.5 (h/a)³) for h ≤ a, else c0 + c.
    pub fn gamma(&self, h: f64) -> f64 {
        if h <= self.range_m {
            let ratio = h / self.range_m;
            self.nugget + self.sill * (1.5 * ratio - 0.5 * ratio.powi(3))
        } else {
            self.nugget + self.sill
        }
    }

    pub fn gamma_matrix(&self, distances: &[f64]) -> Vec<f64> {
        distances.iter().map(|&h| self.gamma(h)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gamma_at_zero_is_nugget() {
        let v = SphericalVariogram::new(0.001, 0.05, 150.0);
        assert!((v.gamma(0.0) - 0.001).abs() < 1e-12);
    }

    #[test]
    fn gamma_beyond_range_is_nugget_plus_sill() {
        let v = SphericalVariogram::new(0.001, 0.05, 150.0);
        assert!((v.gamma(200.0) - 0.051).abs() < 1e-12);
    }

    #[test]
    fn gamma_is_monotonic_within_range() {
        let v = SphericalVariogram::new(0.001, 0.05, 150.0);
        assert!(v.gamma(10.0) < v.gamma(50.0));
        assert!(v.gamma(50.0) < v.gamma(100.0));
    }
}
