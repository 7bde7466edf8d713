//! Default field-hardware bindings for standalone bring-up.
//!
//! No probe wire protocol, valve transport, or mirror link is specified
//! (§6): production deployments plug in whatever Modbus/LoRa/weather-API
//! client the installed hardware speaks. These implementations let the
//! binary run end to end without one, simulating plausible readings and
//! logging the commands a real transport would issue.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::HubResult;
use crate::model::measurement::MeasurementInput;
use crate::model::sensor::Sensor;
use crate::model::snapshot::SystemStateSnapshot;
use crate::orchestrator::ProbeSource;
use crate::sync::MirrorLink;
use crate::valve::{DispatchOutcome, ValveTransport};

/// Walks a per-(sensor, depth) baseline VWC with small bounded jitter,
/// the way the reference platform's simulated fixtures perturb a baseline
/// rather than sampling independently each tick.
pub struct SimulatedProbeSource {
    baselines: RwLock<BTreeMap<(String, u32), f64>>,
}

impl Default for SimulatedProbeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedProbeSource {
    pub fn new() -> Self {
        Self { baselines: RwLock::new(BTreeMap::new()) }
    }
}

#[async_trait]
impl ProbeSource for SimulatedProbeSource {
    async fn read(&self, sensor: &Sensor, depth_inches: u32) -> HubResult<MeasurementInput> {
        let key = (sensor.sensor_id.clone(), depth_inches);
        let mut baselines = self.baselines.write().await;
        let baseline = baselines.entry(key).or_insert(0.22);
        *baseline = (*baseline + (rand::random::<f64>() - 0.5) * 0.01).clamp(0.05, 0.45);

        Ok(MeasurementInput {
            sensor_id: sensor.sensor_id.clone(),
            depth_inches,
            timestamp: Utc::now(),
            vwc: *baseline,
            soil_temp_c: Some(18.0 + (rand::random::<f64>() - 0.5) * 2.0),
            water_potential: None,
            signal_quality: 0.9 + rand::random::<f64>() * 0.1,
        })
    }

    async fn et_rate_mm_per_day(&self, _field_id: &str) -> HubResult<f64> {
        Ok(5.0)
    }
}

/// Logs every command it receives and acknowledges immediately.
pub struct LoggingValveTransport;

#[async_trait]
impl ValveTransport for LoggingValveTransport {
    async fn open(&self, valve_id: &str, duration: Option<std::time::Duration>) -> DispatchOutcome {
        tracing::info!(valve_id, ?duration, "valve open commanded");
        DispatchOutcome::Acked
    }

    async fn close(&self, valve_id: &str) -> DispatchOutcome {
        tracing::info!(valve_id, "valve close commanded");
        DispatchOutcome::Acked
    }
}

/// A loopback mirror: acknowledges every heartbeat and logs snapshots
/// instead of shipping them to a real offsite mirror.
pub struct LoggingMirrorLink;

#[async_trait]
impl MirrorLink for LoggingMirrorLink {
    async fn send_state(&self, snapshot: &SystemStateSnapshot) -> HubResult<()> {
        tracing::debug!(hub_id = %snapshot.hub_id, records = snapshot.total_record_count, "state snapshot synced");
        Ok(())
    }

    async fn send_measurement_hash(&self, own_hash: &str) -> HubResult<()> {
        tracing::trace!(own_hash, "measurement hash synced");
        Ok(())
    }

    async fn send_heartbeat(&self) -> HubResult<bool> {
        Ok(true)
    }
}
