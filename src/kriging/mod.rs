//! Component F: regression-kriging virtual-grid engine (§4.6).

pub mod variogram;

use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, DVector};

use crate::forensic::{round_to, sha256_hex};
use crate::model::grid::GridCell;
use variogram::SphericalVariogram;

const HARD_ANCHOR_TOLERANCE_M: f64 = 5.0;
const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// Not a calibrated quantity: the fallback path's confidence is fixed at
/// 0.5 regardless of this value. Kept populated only so the field isn't
/// left at a misleading 0.0.
const FALLBACK_VARIANCE_PLACEHOLDER: f64 = 1.0;

/// A single probe reading fed into the interpolator.
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub sensor_id_hash: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub vwc: f64,
}

/// Rectangular field bounds in (min_lat, min_lon, max_lat, max_lon).
#[derive(Debug, Clone, Copy)]
pub struct FieldBounds {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl FieldBounds {
    fn reference_latitude(&self) -> f64 {
        (self.min_lat + self.max_lat) / 2.0
    }
}

/// Planar metre-space projection using a per-field longitude scale
/// (§4.6, §9 "Additional resolution — longitude scale constant").
#[derive(Debug, Clone, Copy)]
struct Projection {
    lat_scale: f64,
    lon_scale: f64,
}

impl Projection {
    fn for_bounds(bounds: &FieldBounds) -> Self {
        let lat_rad = bounds.reference_latitude().to_radians();
        Self { lat_scale: METERS_PER_DEGREE_LAT, lon_scale: METERS_PER_DEGREE_LAT * lat_rad.cos() }
    }

    fn to_meters(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        (latitude * self.lat_scale, longitude * self.lon_scale)
    }

    fn distance_m(&self, a: (f64, f64), b: (f64, f64)) -> f64 {
        let (ax, ay) = self.to_meters(a.0, a.1);
        let (bx, by) = self.to_meters(b.0, b.1);
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }
}

pub struct RegressionKriging {
    variogram: SphericalVariogram,
    trend_weight: f64,
    grid_resolution_m: f64,
    grid_max_cells: usize,
}

impl RegressionKriging {
    pub fn new(variogram: SphericalVariogram, trend_weight: f64, grid_resolution_m: f64, grid_max_cells: usize) -> Self {
        Self { variogram, trend_weight, grid_resolution_m, grid_max_cells }
    }

    /// Generates the virtual grid for one field at one depth (§4.6).
    pub fn generate_grid(
        &self,
        field_id: &str,
        bounds: FieldBounds,
        probes: &[Probe],
        depth_inches: u32,
        trend_fn: Option<&dyn Fn(f64, f64) -> f64>,
        timestamp: DateTime<Utc>,
    ) -> Vec<GridCell> {
        let projection = Projection::for_bounds(&bounds);
        let (n_lat, n_lon) = self.grid_dimensions(&bounds, &projection);

        if probes.len() < 3 {
            return self.fallback_grid(field_id, bounds, probes, depth_inches, n_lat, n_lon, timestamp);
        }

        self.kriging_grid(field_id, bounds, probes, depth_inches, trend_fn, n_lat, n_lon, &projection, timestamp)
    }

    fn grid_dimensions(&self, bounds: &FieldBounds, projection: &Projection) -> (usize, usize) {
        let lat_meters = (bounds.max_lat - bounds.min_lat) * projection.lat_scale;
        let lon_meters = (bounds.max_lon - bounds.min_lon) * projection.lon_scale;

        let mut n_lat = (lat_meters / self.grid_resolution_m).max(1.0) as usize + 1;
        let mut n_lon = (lon_meters / self.grid_resolution_m).max(1.0) as usize + 1;

        if n_lat.saturating_mul(n_lon) > self.grid_max_cells {
            let scale = ((self.grid_max_cells as f64) / (n_lat as f64 * n_lon as f64)).sqrt();
            n_lat = ((n_lat as f64) * scale).max(1.0) as usize;
            n_lon = ((n_lon as f64) * scale).max(1.0) as usize;
        }

        (n_lat, n_lon)
    }

    #[allow(clippy::too_many_arguments)]
    fn kriging_grid(
        &self,
        field_id: &str,
        bounds: FieldBounds,
        probes: &[Probe],
        depth_inches: u32,
        trend_fn: Option<&dyn Fn(f64, f64) -> f64>,
        n_lat: usize,
        n_lon: usize,
        projection: &Projection,
        timestamp: DateTime<Utc>,
    ) -> Vec<GridCell> {
        let n = probes.len();
        let trend_at_probes: Vec<f64> = probes.iter().map(|p| trend_fn.map(|f| f(p.latitude, p.longitude)).unwrap_or(0.0)).collect();
        let detrended: Vec<f64> = probes.iter().zip(&trend_at_probes).map(|(p, t)| p.vwc - self.trend_weight * t).collect();

        let mut k_matrix = DMatrix::<f64>::zeros(n + 1, n + 1);
        for i in 0..n {
            for j in 0..n {
                let d = projection.distance_m((probes[i].latitude, probes[i].longitude), (probes[j].latitude, probes[j].longitude));
                k_matrix[(i, j)] = self.variogram.gamma(d);
            }
            k_matrix[(i, n)] = 1.0;
            k_matrix[(n, i)] = 1.0;
        }
        k_matrix[(n, n)] = 0.0;

        let k_inv = invert_or_pseudo_inverse(&k_matrix);

        let mut cells = Vec::with_capacity(n_lat * n_lon);
        let mut cell_count = 0usize;
        for i in 0..n_lat {
            let lat = lerp(bounds.min_lat, bounds.max_lat, n_lat, i);
            for j in 0..n_lon {
                let lon = lerp(bounds.min_lon, bounds.max_lon, n_lon, j);

                let (nearest_idx, nearest_dist) = nearest_probe(lat, lon, probes, projection);

                let (estimated_vwc, variance, confidence, is_hard_anchor, anchor_sensor, trend_value) =
                    if nearest_dist < HARD_ANCHOR_TOLERANCE_M {
                        let probe = &probes[nearest_idx];
                        (probe.vwc, 0.0, 1.0, true, Some(probe.sensor_id_hash), trend_fn.map(|f| f(lat, lon)))
                    } else {
                        let distances: Vec<f64> =
                            probes.iter().map(|p| projection.distance_m((lat, lon), (p.latitude, p.longitude))).collect();
                        let k_vec = self.variogram.gamma_matrix(&distances);

                        let mut k_lagrange = DVector::<f64>::zeros(n + 1);
                        for (idx, v) in k_vec.iter().enumerate() {
                            k_lagrange[idx] = *v;
                        }
                        k_lagrange[n] = 1.0;

                        let weights = &k_inv * &k_lagrange;
                        let kriging_weights = weights.rows(0, n);

                        let detrended_estimate: f64 =
                            kriging_weights.iter().zip(&detrended).map(|(w, v)| w * v).sum();
                        let trend_here = trend_fn.map(|f| f(lat, lon)).unwrap_or(0.0);
                        let estimate = detrended_estimate + self.trend_weight * trend_here;

                        let weighted_k: f64 = kriging_weights.iter().zip(&k_vec).map(|(w, k)| w * k).sum();
                        let variance = (self.variogram.sill + self.variogram.nugget - weighted_k).max(0.0);
                        let confidence = 1.0 / (1.0 + 10.0 * variance);

                        (estimate, variance, confidence, false, None, trend_fn.map(|_| trend_here))
                    };

                cells.push(build_cell(
                    field_id,
                    depth_inches,
                    lat,
                    lon,
                    timestamp,
                    estimated_vwc,
                    variance,
                    confidence,
                    is_hard_anchor,
                    anchor_sensor,
                    trend_value,
                    false,
                    cell_count,
                ));
                cell_count += 1;
            }
        }

        cells
    }

    #[allow(clippy::too_many_arguments)]
    fn fallback_grid(
        &self,
        field_id: &str,
        bounds: FieldBounds,
        probes: &[Probe],
        depth_inches: u32,
        n_lat: usize,
        n_lon: usize,
        timestamp: DateTime<Utc>,
    ) -> Vec<GridCell> {
        let projection = Projection::for_bounds(&bounds);
        let effective_probes: Vec<Probe> = if probes.is_empty() {
            vec![Probe {
                sensor_id_hash: 0,
                latitude: (bounds.min_lat + bounds.max_lat) / 2.0,
                longitude: (bounds.min_lon + bounds.max_lon) / 2.0,
                vwc: 0.20,
            }]
        } else {
            probes.to_vec()
        };

        let mut cells = Vec::with_capacity(n_lat * n_lon);
        let mut cell_count = 0usize;
        for i in 0..n_lat {
            let lat = lerp(bounds.min_lat, bounds.max_lat, n_lat, i);
            for j in 0..n_lon {
                let lon = lerp(bounds.min_lon, bounds.max_lon, n_lon, j);

                let distances: Vec<f64> =
                    effective_probes.iter().map(|p| projection.distance_m((lat, lon), (p.latitude, p.longitude))).collect();
                let weights: Vec<f64> = distances.iter().map(|d| 1.0 / (d + 1.0)).collect();
                let weight_sum: f64 = weights.iter().sum();

                let estimated_vwc: f64 =
                    weights.iter().zip(&effective_probes).map(|(w, p)| (w / weight_sum) * p.vwc).sum();

                cells.push(build_cell(
                    field_id,
                    depth_inches,
                    lat,
                    lon,
                    timestamp,
                    estimated_vwc,
                    FALLBACK_VARIANCE_PLACEHOLDER,
                    0.5,
                    false,
                    None,
                    None,
                    true,
                    cell_count,
                ));
                cell_count += 1;
            }
        }

        cells
    }
}

fn lerp(min: f64, max: f64, n: usize, i: usize) -> f64 {
    if n <= 1 {
        min
    } else {
        min + (max - min) * (i as f64) / ((n - 1) as f64)
    }
}

fn nearest_probe(lat: f64, lon: f64, probes: &[Probe], projection: &Projection) -> (usize, f64) {
    probes
        .iter()
        .enumerate()
        .map(|(idx, p)| (idx, projection.distance_m((lat, lon), (p.latitude, p.longitude))))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .expect("probes is non-empty by construction")
}

fn invert_or_pseudo_inverse(m: &DMatrix<f64>) -> DMatrix<f64> {
    m.clone().try_inverse().unwrap_or_else(|| m.clone().pseudo_inverse(1e-10).expect("pseudo-inverse must succeed for a finite matrix"))
}

#[allow(clippy::too_many_arguments)]
fn build_cell(
    field_id: &str,
    depth_inches: u32,
    latitude: f64,
    longitude: f64,
    timestamp: DateTime<Utc>,
    estimated_vwc: f64,
    estimation_variance: f64,
    confidence: f64,
    is_hard_anchor: bool,
    anchor_sensor_hash: Option<u64>,
    trend_value: Option<f64>,
    is_fallback: bool,
    index: usize,
) -> GridCell {
    let cell_id = format!("{field_id}_{depth_inches}in_{index:05}");
    let vwc = round_to(estimated_vwc, 6);
    let variance = round_to(estimation_variance, 8);

    let canonical = format!(
        "{{\"cell_id\":\"{}\",\"depth\":{},\"field_id\":\"{}\",\"lat\":{:.8},\"lon\":{:.8},\"timestamp\":\"{}\",\"variance\":{},\"vwc\":{}}}",
        cell_id,
        depth_inches,
        field_id,
        round_to(latitude, 8),
        round_to(longitude, 8),
        timestamp.to_rfc3339(),
        variance,
        vwc,
    );
    let cell_hash = sha256_hex(canonical.as_bytes());

    GridCell {
        cell_id,
        field_id: field_id.to_string(),
        depth_inches,
        latitude,
        longitude,
        timestamp,
        estimated_vwc: vwc,
        estimation_variance: variance,
        confidence,
        is_hard_anchor,
        anchor_sensor: anchor_sensor_hash.map(|h| h.to_string()),
        trend_value,
        is_fallback,
        cell_hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_probes() -> Vec<Probe> {
        vec![
            Probe { sensor_id_hash: 1, latitude: 37.50, longitude: -105.80, vwc: 0.22 },
            Probe { sensor_id_hash: 2, latitude: 37.501, longitude: -105.799, vwc: 0.25 },
            Probe { sensor_id_hash: 3, latitude: 37.499, longitude: -105.801, vwc: 0.19 },
        ]
    }

    fn bounds() -> FieldBounds {
        FieldBounds { min_lat: 37.499, min_lon: -105.801, max_lat: 37.501, max_lon: -105.799 }
    }

    #[test]
    fn fewer_than_three_probes_uses_fallback_with_fixed_confidence() {
        let engine = RegressionKriging::new(SphericalVariogram::new(0.001, 0.05, 150.0), 0.3, 20.0, 100);
        let probes = vec![sample_probes()[0]];
        let cells = engine.generate_grid("F1", bounds(), &probes, 18, None, Utc::now());
        assert!(!cells.is_empty());
        assert!(cells.iter().all(|c| c.is_fallback && (c.confidence - 0.5).abs() < 1e-12));
    }

    #[test]
    fn hard_anchor_reproduces_probe_value_exactly() {
        let engine = RegressionKriging::new(SphericalVariogram::new(0.001, 0.05, 150.0), 0.3, 20.0, 1000);
        let probes = sample_probes();
        let cells = engine.generate_grid("F1", bounds(), &probes, 18, None, Utc::now());
        let anchors: Vec<_> = cells.iter().filter(|c| c.is_hard_anchor).collect();
        assert!(!anchors.is_empty());
        for anchor in anchors {
            assert_eq!(anchor.estimation_variance, 0.0);
            assert_eq!(anchor.confidence, 1.0);
        }
    }

    #[test]
    fn grid_respects_max_cell_budget() {
        let engine = RegressionKriging::new(SphericalVariogram::new(0.001, 0.05, 150.0), 0.3, 1.0, 50);
        let cells = engine.generate_grid("F1", bounds(), &sample_probes(), 18, None, Utc::now());
        assert!(cells.len() <= 50);
    }

    #[test]
    fn identical_inputs_produce_identical_cell_hashes() {
        let engine = RegressionKriging::new(SphericalVariogram::new(0.001, 0.05, 150.0), 0.3, 20.0, 100);
        let ts = Utc::now();
        let a = engine.generate_grid("F1", bounds(), &sample_probes(), 18, None, ts);
        let b = engine.generate_grid("F1", bounds(), &sample_probes(), 18, None, ts);
        assert_eq!(a, b);
    }

    #[test]
    fn variance_is_never_negative() {
        let engine = RegressionKriging::new(SphericalVariogram::new(0.001, 0.05, 150.0), 0.3, 20.0, 100);
        let cells = engine.generate_grid("F1", bounds(), &sample_probes(), 18, None, Utc::now());
        assert!(cells.iter().all(|c| c.estimation_variance >= 0.0));
    }
}
