//! Component J: the pipeline orchestrator (§4.10).
//!
//! Owns every other component and drives the three periodic cycles the
//! reference engine spawns on `run()`: a measurement cycle that reads
//! probes, chains and persists them, and feeds the filter; a grid cycle
//! that krigs a fresh virtual grid per field and turns it into an
//! irrigation decision; and a sync cycle that pushes state to the mirror
//! and keeps its heartbeat alive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{hash_map::DefaultHasher, BTreeMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::error::HubResult;
use crate::facade::QueryFacade;
use crate::filter::BayesianFilter;
use crate::forensic::ForensicHasher;
use crate::irrigation::IrrigationDecisionEngine;
use crate::kriging::{FieldBounds, Probe, RegressionKriging};
use crate::model::genesis_hash;
use crate::model::measurement::MeasurementInput;
use crate::model::sensor::Sensor;
use crate::model::snapshot::SystemStateSnapshot;
use crate::model::valve::{Valve, ValveState};
use crate::registry::SensorRegistry;
use crate::scheduler::IrrigationScheduler;
use crate::storage::{AuditLog, GridStore, MeasurementLog};
use crate::sync::{MirrorLink, SyncComponent};
use crate::valve::{ValveDispatcher, ValveTransport};

/// The primary irrigation depth grids are generated at, matching the
/// reference engine's single always-on grid depth.
const PRIMARY_GRID_DEPTH_INCHES: u32 = 18;

/// Supplies a fresh probe reading and the field's current evapotranspiration
/// rate (§6 "Probe ingest"). No wire protocol is specified; production
/// deployments back this with whatever telemetry transport the field
/// hardware and weather service speak.
#[async_trait]
pub trait ProbeSource: Send + Sync {
    async fn read(&self, sensor: &Sensor, depth_inches: u32) -> HubResult<MeasurementInput>;
    async fn et_rate_mm_per_day(&self, field_id: &str) -> HubResult<f64>;
}

#[derive(Debug, Clone, Default)]
pub struct PipelineCounters {
    pub measurements_processed: u64,
    pub grids_generated: u64,
    pub irrigation_decisions: u64,
    pub deep_percolation_alerts: u64,
}

#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub hub_id: String,
    pub uptime_seconds: i64,
    pub emergency_stop_engaged: bool,
    pub counters: PipelineCounters,
}

/// The pipeline orchestrator. Construction order mirrors the reference
/// engine's initialisation order and is a documented invariant: forensic
/// hasher and audit log first, then the measurement/grid stores, then the
/// sensor registry, then the filter and kriging engine, then the decision
/// engine and valve dispatcher, then the sync component (registering its
/// failover callback), and only then is the pipeline ready to `run()`.
pub struct Pipeline<P: ProbeSource, T: ValveTransport, L: MirrorLink> {
    config: Arc<Config>,
    hasher: Arc<ForensicHasher>,
    measurement_log: Arc<MeasurementLog>,
    grid_store: Arc<GridStore>,
    audit_log: Arc<AuditLog>,
    registry: Arc<SensorRegistry>,
    filter: Arc<BayesianFilter>,
    kriging: Arc<RegressionKriging>,
    probe_source: P,
    valves: Arc<ValveDispatcher<T>>,
    sync: Arc<SyncComponent<L>>,
    scheduler: Arc<IrrigationScheduler>,
    facade: Arc<QueryFacade>,
    field_bounds: BTreeMap<String, FieldBounds>,
    emergency_stop: Arc<AtomicBool>,
    started_at: DateTime<Utc>,
    measurements_processed: AtomicU64,
    grids_generated: AtomicU64,
    irrigation_decisions: AtomicU64,
    deep_percolation_alerts: AtomicU64,
}

impl<P, T, L> Pipeline<P, T, L>
where
    P: ProbeSource + 'static,
    T: ValveTransport + 'static,
    L: MirrorLink + 'static,
{
    /// Builds every component in the documented construction order and
    /// registers one valve per field's (currently single) zone.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        config: Arc<Config>,
        pool: sqlx::SqlitePool,
        probe_source: P,
        valve_transport: T,
        mirror_link: L,
        field_bounds: BTreeMap<String, FieldBounds>,
    ) -> HubResult<Self> {
        let hasher = Arc::new(ForensicHasher::new(config.signing_key_id.clone(), None));
        let audit_log = Arc::new(AuditLog::new(pool.clone()));

        let measurement_log = Arc::new(MeasurementLog::new(pool.clone(), hasher.clone()));
        let grid_store = Arc::new(GridStore::new(pool.clone()));

        let registry = Arc::new(SensorRegistry::new());

        let filter = Arc::new(BayesianFilter::new(config.learning_rate, config.update_threshold));
        let kriging = Arc::new(RegressionKriging::new(
            crate::kriging::variogram::SphericalVariogram::new(
                config.variogram.nugget,
                config.variogram.sill,
                config.variogram.range_m,
            ),
            config.trend_weight,
            config.grid_resolution_m,
            config.grid_max_cells,
        ));

        let valves = Arc::new(ValveDispatcher::new(valve_transport, audit_log.clone(), config.valve_timeout));
        for field_id in field_bounds.keys() {
            valves.register(Valve::new(zone_id_of(field_id), zone_id_of(field_id))).await;
        }

        let genesis = measurement_log.last_hash().await.unwrap_or_else(|_| genesis_hash());
        let sync = Arc::new(SyncComponent::new(mirror_link, config.failover_timeout, genesis));
        let emergency_stop = Arc::new(AtomicBool::new(false));
        let emergency_stop_cb = emergency_stop.clone();
        sync.on_failover(Arc::new(move || {
            emergency_stop_cb.store(true, Ordering::SeqCst);
        }))
        .await;

        let scheduler = Arc::new(IrrigationScheduler::new());
        let facade = Arc::new(QueryFacade::new(measurement_log.clone(), grid_store.clone(), audit_log.clone()));

        Ok(Self {
            config,
            hasher,
            measurement_log,
            grid_store,
            audit_log,
            registry,
            filter,
            kriging,
            probe_source,
            valves,
            sync,
            scheduler,
            facade,
            field_bounds,
            emergency_stop,
            started_at: Utc::now(),
            measurements_processed: AtomicU64::new(0),
            grids_generated: AtomicU64::new(0),
            irrigation_decisions: AtomicU64::new(0),
            deep_percolation_alerts: AtomicU64::new(0),
        })
    }

    pub async fn register_sensor(&self, sensor: Sensor) {
        self.registry.register(sensor).await;
    }

    pub fn scheduler(&self) -> &Arc<IrrigationScheduler> {
        &self.scheduler
    }

    pub fn facade(&self) -> &Arc<QueryFacade> {
        &self.facade
    }

    /// Operator acknowledgement that clears the deep-percolation interlock,
    /// resuming valve actuation on the next grid cycle (§7 "Interlock").
    pub fn acknowledge_interlock(&self) {
        self.emergency_stop.store(false, Ordering::SeqCst);
    }

    pub async fn status(&self) -> PipelineStatus {
        PipelineStatus {
            hub_id: self.config.hub_id.clone(),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
            emergency_stop_engaged: self.emergency_stop.load(Ordering::SeqCst),
            counters: PipelineCounters {
                measurements_processed: self.measurements_processed.load(Ordering::SeqCst),
                grids_generated: self.grids_generated.load(Ordering::SeqCst),
                irrigation_decisions: self.irrigation_decisions.load(Ordering::SeqCst),
                deep_percolation_alerts: self.deep_percolation_alerts.load(Ordering::SeqCst),
            },
        }
    }

    /// Spawns the three independent cycles and blocks until all have ended
    /// (they do not end under normal operation; a panic or explicit abort of
    /// the returned handles is how a caller stops them).
    pub async fn run(self: Arc<Self>) {
        self.sync.connect().await;

        let measurement = self.clone();
        let grid = self.clone();
        let sync = self.clone();

        let measurement_handle = tokio::spawn(async move { measurement.measurement_cycle_loop().await });
        let grid_handle = tokio::spawn(async move { grid.grid_cycle_loop().await });
        let sync_handle = tokio::spawn(async move { sync.sync_cycle_loop().await });

        let _ = tokio::join!(measurement_handle, grid_handle, sync_handle);
    }

    async fn measurement_cycle_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.measurement_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_measurement_cycle().await {
                tracing::error!(error = %e, "measurement cycle failed, retrying after backoff");
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            }
        }
    }

    async fn grid_cycle_loop(self: Arc<Self>) {
        tokio::time::sleep(self.config.grid_interval / 2).await;
        let mut ticker = tokio::time::interval(self.config.grid_interval);
        loop {
            ticker.tick().await;
            match tokio::time::timeout(self.config.grid_cycle_soft_deadline, self.run_grid_cycle()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "grid cycle failed, retrying after backoff");
                    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                }
                Err(_) => {
                    tracing::warn!("grid cycle missed its soft deadline; skipping this tick");
                }
            }
        }
    }

    async fn sync_cycle_loop(self: Arc<Self>) {
        let mut sync_ticker = tokio::time::interval(self.config.sync_interval);
        let mut heartbeat_ticker = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            tokio::select! {
                _ = sync_ticker.tick() => {
                    if let Err(e) = self.push_state_snapshot().await {
                        tracing::error!(error = %e, "state sync failed");
                    }
                }
                _ = heartbeat_ticker.tick() => {
                    self.sync.tick_heartbeat().await;
                }
            }
        }
    }

    /// Reads every installed sensor's depths, threading a single previous
    /// hash across the whole sweep, then runs the filter per zone.
    async fn run_measurement_cycle(&self) -> HubResult<()> {
        let mut previous_hash = self.measurement_log.last_hash().await?;
        let mut by_zone: BTreeMap<String, Vec<(f64, f64, u32, f64, f64)>> = BTreeMap::new();

        for field_id in self.field_bounds.keys() {
            let et_rate = self.probe_source.et_rate_mm_per_day(field_id).await.unwrap_or(5.0);

            for sensor in self.registry.sensors_by_field(field_id).await {
                for &depth_inches in &sensor.depths_inches {
                    let input = match self.probe_source.read(&sensor, depth_inches).await {
                        Ok(input) => input,
                        Err(e) => {
                            tracing::warn!(sensor = %sensor.sensor_id, depth_inches, error = %e, "probe read rejected at ingest boundary");
                            continue;
                        }
                    };

                    let measurement = self.hasher.chain_hash(&previous_hash, &input)?;
                    self.measurement_log.append(measurement.clone()).await?;
                    previous_hash = measurement.own_hash.clone();
                    self.measurements_processed.fetch_add(1, Ordering::SeqCst);

                    let _ = self.sync.sync_measurement(&measurement.own_hash).await;

                    by_zone.entry(sensor.zone_id.clone()).or_default().push((
                        sensor.latitude,
                        sensor.longitude,
                        depth_inches,
                        measurement.vwc,
                        et_rate,
                    ));
                }
            }
        }

        let hours_since_last = self.config.measurement_interval.as_secs_f64() / 3600.0;
        for (zone_id, readings) in by_zone {
            for (latitude, longitude, depth_inches, observed_vwc, et_rate) in readings {
                let predicted = self
                    .filter
                    .predict(&zone_id, latitude, longitude, depth_inches, et_rate, hours_since_last)
                    .await;
                self.filter.update(&zone_id, depth_inches, observed_vwc, predicted.predicted_vwc).await;
            }
        }

        for valve_id in self.valves.expired_runs().await {
            self.valves.close(&valve_id).await?;
        }

        self.dispatch_due_schedules().await?;

        Ok(())
    }

    /// Fires any operator-scheduled irrigation windows whose start has
    /// arrived, bypassing the decision engine (§2 "Supplemented components").
    async fn dispatch_due_schedules(&self) -> HubResult<()> {
        if self.emergency_stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        for window in self.scheduler.drain_due(Utc::now()).await {
            if let Some(ValveState::Closed) = self.valves.state_of(&window.zone_id).await {
                self.valves.open(&window.zone_id, window.duration_minutes).await?;

                let mut details = std::collections::BTreeMap::new();
                details.insert("zone_id".to_string(), window.zone_id.clone());
                details.insert("duration_minutes".to_string(), window.duration_minutes.to_string());
                let _ = self
                    .audit_log
                    .log_event("scheduled_irrigation_fired", &window.principal, details)
                    .await;
            }
        }

        Ok(())
    }

    /// Krigs a fresh grid per field at the primary irrigation depth, stores
    /// it, and turns it into an irrigation decision for that field's zone.
    ///
    /// Gathering each field's recent probe readings is I/O-bound and stays
    /// sequential; the interpolation itself is CPU-bound, so every field's
    /// `generate_grid` call runs across the `rayon` pool at once (§5).
    async fn run_grid_cycle(&self) -> HubResult<()> {
        let now = Utc::now();
        let window_start = now - chrono::Duration::hours(1);

        let mut per_field = Vec::new();
        for (field_id, bounds) in &self.field_bounds {
            let sensors = self.registry.sensors_by_field(field_id).await;
            let mut probes = Vec::new();

            for sensor in sensors.iter().filter(|s| s.has_depth(PRIMARY_GRID_DEPTH_INCHES)) {
                let recent = self
                    .measurement_log
                    .range(Some(&sensor.sensor_id), window_start, now, 1000)
                    .await?;
                if let Some(latest) = recent.iter().rev().find(|m| m.depth_inches == PRIMARY_GRID_DEPTH_INCHES) {
                    probes.push(Probe {
                        sensor_id_hash: sensor_id_hash(&sensor.sensor_id),
                        latitude: sensor.latitude,
                        longitude: sensor.longitude,
                        vwc: latest.vwc,
                    });
                }
            }

            if !probes.is_empty() {
                per_field.push((field_id.clone(), *bounds, probes));
            }
        }

        let kriging = self.kriging.clone();
        let generated = tokio::task::spawn_blocking(move || {
            use rayon::prelude::*;
            per_field
                .into_par_iter()
                .map(|(field_id, bounds, probes)| {
                    let cells = kriging.generate_grid(&field_id, bounds, &probes, PRIMARY_GRID_DEPTH_INCHES, None, now);
                    (field_id, cells)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| crate::error::HubError::cancelled(format!("grid interpolation task panicked: {e}")))?;

        for (field_id, cells) in generated {
            self.grid_store.put_grid(&field_id, now, &cells).await?;
            self.grids_generated.fetch_add(1, Ordering::SeqCst);

            let mut details = std::collections::BTreeMap::new();
            details.insert("field_id".to_string(), field_id.clone());
            details.insert("grid_merkle_root".to_string(), self.hasher.merkle_root(
                &cells.iter().map(|c| c.cell_hash.as_str()).collect::<Vec<_>>(),
            ));
            let _ = self.audit_log.log_event("grid_generated", "system", details).await;

            self.make_irrigation_decision(&field_id, &cells).await?;
        }

        self.archive_expired_records().await?;

        Ok(())
    }

    /// Moves records older than the retention horizon into a compressed
    /// archive, piggybacked on the grid cycle's cadence. Idempotent: rows
    /// already archived are skipped (§4.2).
    async fn archive_expired_records(&self) -> HubResult<()> {
        let cutoff = Utc::now() - chrono::Duration::days(30 * self.config.retention_months as i64);
        let archived = self.measurement_log.archive_older_than(cutoff).await?;
        if archived > 0 {
            tracing::info!(archived, "archived measurements past the retention horizon");
        }
        Ok(())
    }

    async fn make_irrigation_decision(&self, field_id: &str, cells: &[crate::model::grid::GridCell]) -> HubResult<()> {
        let zone_id = zone_id_of(field_id);
        let soil = self.filter.parameters(&zone_id).await;

        let engine = IrrigationDecisionEngine::new(&self.audit_log, self.config.deep_percolation_threshold);
        let decision = engine.evaluate(&zone_id, field_id, cells, soil, Utc::now()).await;
        self.irrigation_decisions.fetch_add(1, Ordering::SeqCst);

        if decision.status == crate::model::decision::IrrigationStatus::DeepPercolationRisk {
            self.deep_percolation_alerts.fetch_add(1, Ordering::SeqCst);
            self.emergency_stop.store(true, Ordering::SeqCst);
            self.valves.emergency_stop_all("system").await?;
            return Ok(());
        }

        if self.emergency_stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        if decision.is_fireable() {
            if let Some(ValveState::Closed) = self.valves.state_of(&zone_id).await {
                self.valves.open(&zone_id, decision.recommended_duration_minutes as u32).await?;
            }
        }

        Ok(())
    }

    /// Pushes a full state snapshot to the mirror; a no-op while not
    /// CONNECTED (§4.9).
    async fn push_state_snapshot(&self) -> HubResult<()> {
        let zone_parameters = self.filter.export_snapshot().await.zones;
        let last_measurement_hash = self.measurement_log.last_hash().await?;
        let total_record_count = self.measurement_log.total_records().await?;

        let mut grid_hashes = Vec::new();
        for field_id in self.field_bounds.keys() {
            let cells = self.grid_store.get_latest(field_id, PRIMARY_GRID_DEPTH_INCHES).await?;
            grid_hashes.extend(cells.into_iter().map(|c| c.cell_hash));
        }
        let grid_hash_refs: Vec<&str> = grid_hashes.iter().map(|h| h.as_str()).collect();
        let grid_merkle_root = self.hasher.merkle_root(&grid_hash_refs);

        let mut valve_states = BTreeMap::new();
        for field_id in self.field_bounds.keys() {
            let zone_id = zone_id_of(field_id);
            if let Some(state) = self.valves.state_of(&zone_id).await {
                valve_states.insert(zone_id, state);
            }
        }

        let snapshot = SystemStateSnapshot {
            hub_id: self.config.hub_id.clone(),
            timestamp: Utc::now(),
            zone_parameters,
            last_measurement_hash,
            total_record_count,
            grid_merkle_root,
            valve_states,
            scheduled_irrigation: self.scheduler.pending().await,
        };

        let _ = self.sync.sync_state(&snapshot).await?;
        Ok(())
    }

    /// Logs a shutdown audit event with final counters and disconnects the
    /// mirror link.
    pub async fn shutdown(&self) -> HubResult<()> {
        let status = self.status().await;
        let mut details = std::collections::BTreeMap::new();
        details.insert("uptime_seconds".to_string(), status.uptime_seconds.to_string());
        details.insert("measurements_processed".to_string(), status.counters.measurements_processed.to_string());
        details.insert("grids_generated".to_string(), status.counters.grids_generated.to_string());
        details.insert("irrigation_decisions".to_string(), status.counters.irrigation_decisions.to_string());
        self.audit_log.log_event("engine_shutdown", "system", details).await?;
        self.sync.disconnect().await;
        Ok(())
    }
}

fn zone_id_of(field_id: &str) -> String {
    format!("{field_id}_zone1")
}

fn sensor_id_hash(sensor_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    sensor_id.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sensor::SensorKind;
    use crate::model::snapshot::SystemStateSnapshot as Snapshot;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct FakeProbes;

    #[async_trait]
    impl ProbeSource for FakeProbes {
        async fn read(&self, sensor: &Sensor, depth_inches: u32) -> HubResult<MeasurementInput> {
            Ok(MeasurementInput {
                sensor_id: sensor.sensor_id.clone(),
                depth_inches,
                timestamp: Utc::now(),
                vwc: 0.2,
                soil_temp_c: Some(18.0),
                water_potential: None,
                signal_quality: 1.0,
            })
        }
        async fn et_rate_mm_per_day(&self, _field_id: &str) -> HubResult<f64> {
            Ok(5.0)
        }
    }

    struct FakeValveTransport;

    #[async_trait]
    impl ValveTransport for FakeValveTransport {
        async fn open(&self, _valve_id: &str, _duration: Option<Duration>) -> crate::valve::DispatchOutcome {
            crate::valve::DispatchOutcome::Acked
        }
        async fn close(&self, _valve_id: &str) -> crate::valve::DispatchOutcome {
            crate::valve::DispatchOutcome::Acked
        }
    }

    struct FakeMirror {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MirrorLink for FakeMirror {
        async fn send_state(&self, _snapshot: &Snapshot) -> HubResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn send_measurement_hash(&self, _own_hash: &str) -> HubResult<()> {
            Ok(())
        }
        async fn send_heartbeat(&self) -> HubResult<bool> {
            Ok(true)
        }
    }

    async fn test_pool() -> sqlx::SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::storage::schema::ensure_schema(&pool).await.unwrap();
        pool
    }

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            hub_id: "hub-test".to_string(),
            served_field_ids: vec!["F001".to_string()],
            data_dir: "./data".to_string(),
            measurement_interval: Duration::from_millis(20),
            grid_interval: Duration::from_secs(900),
            sync_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            failover_timeout: Duration::from_secs(30),
            valve_timeout: Duration::from_secs(2),
            grid_cycle_soft_deadline: Duration::from_secs(5),
            retention_months: 24,
            learning_rate: 0.05,
            update_threshold: 0.03,
            variogram: crate::config::VariogramConfig::default(),
            trend_weight: 0.3,
            grid_resolution_m: 1.0,
            grid_max_cells: 10_000,
            deep_percolation_threshold: 0.42,
            signing_key_id: "hub-key-1".to_string(),
        })
    }

    #[tokio::test]
    async fn measurement_cycle_chains_and_updates_the_filter() {
        let pool = test_pool().await;
        let mut bounds = BTreeMap::new();
        bounds.insert(
            "F001".to_string(),
            FieldBounds { min_lat: 37.499, min_lon: -105.801, max_lat: 37.501, max_lon: -105.799 },
        );

        let pipeline = Pipeline::new(
            test_config(),
            pool,
            FakeProbes,
            FakeValveTransport,
            FakeMirror { calls: AtomicUsize::new(0) },
            bounds,
        )
        .await
        .unwrap();

        pipeline.register_sensor(Sensor::new("B001", SensorKind::SurfaceBlanket2Depth, "F001", "Z1", 37.5, -105.8)).await;

        pipeline.run_measurement_cycle().await.unwrap();

        let total = pipeline.measurement_log.total_records().await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(pipeline.status().await.counters.measurements_processed, 2);
    }

    #[tokio::test]
    async fn grid_cycle_generates_and_stores_a_grid() {
        let pool = test_pool().await;
        let mut bounds = BTreeMap::new();
        bounds.insert(
            "F001".to_string(),
            FieldBounds { min_lat: 37.499, min_lon: -105.801, max_lat: 37.501, max_lon: -105.799 },
        );

        let pipeline = Pipeline::new(
            test_config(),
            pool,
            FakeProbes,
            FakeValveTransport,
            FakeMirror { calls: AtomicUsize::new(0) },
            bounds,
        )
        .await
        .unwrap();

        pipeline.register_sensor(Sensor::new("B001", SensorKind::SurfaceBlanket2Depth, "F001", "Z1", 37.5, -105.8)).await;
        pipeline.run_measurement_cycle().await.unwrap();
        pipeline.run_grid_cycle().await.unwrap();

        let cells = pipeline.grid_store.get_latest("F001", PRIMARY_GRID_DEPTH_INCHES).await.unwrap();
        assert!(!cells.is_empty());
        assert_eq!(pipeline.status().await.counters.grids_generated, 1);
    }

    #[tokio::test]
    async fn due_scheduled_window_opens_its_valve_on_the_next_measurement_cycle() {
        let pool = test_pool().await;
        let mut bounds = BTreeMap::new();
        bounds.insert(
            "F001".to_string(),
            FieldBounds { min_lat: 37.499, min_lon: -105.801, max_lat: 37.501, max_lon: -105.799 },
        );

        let pipeline = Pipeline::new(
            test_config(),
            pool,
            FakeProbes,
            FakeValveTransport,
            FakeMirror { calls: AtomicUsize::new(0) },
            bounds,
        )
        .await
        .unwrap();

        pipeline
            .scheduler()
            .schedule(
                crate::model::decision::ScheduledIrrigation {
                    zone_id: "F001_zone1".to_string(),
                    start: Utc::now() - chrono::Duration::minutes(1),
                    duration_minutes: 20,
                    principal: "operator-1".to_string(),
                },
                1,
            )
            .await;

        pipeline.run_measurement_cycle().await.unwrap();

        assert_eq!(pipeline.valves.state_of("F001_zone1").await, Some(ValveState::Open));
        assert!(pipeline.scheduler().pending().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_logs_an_audit_event() {
        let pool = test_pool().await;
        let pipeline = Pipeline::new(
            test_config(),
            pool,
            FakeProbes,
            FakeValveTransport,
            FakeMirror { calls: AtomicUsize::new(0) },
            BTreeMap::new(),
        )
        .await
        .unwrap();

        pipeline.shutdown().await.unwrap();
        let events = pipeline.audit_log.query(Some("engine_shutdown"), None, None, None).await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
