use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod facade;
mod filter;
mod forensic;
mod hardware;
mod irrigation;
mod kriging;
mod model;
mod orchestrator;
mod registry;
mod scheduler;
mod storage;
mod sync;
mod valve;

use config::Config;
use hardware::{LoggingMirrorLink, LoggingValveTransport, SimulatedProbeSource};
use kriging::FieldBounds;
use model::sensor::{Sensor, SensorKind};
use orchestrator::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    let log_dir = env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
    let file_appender = tracing_appender::rolling::daily(&log_dir, "hydrosense-hub.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hydrosense_hub=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    let config = Arc::new(Config::load()?);
    info!(hub_id = %config.hub_id, fields = config.served_field_ids.len(), "configuration loaded");

    let pool = storage::open_pool(&config.data_dir).await?;
    info!("hot store opened at {}", config.data_dir);

    let field_bounds = load_field_bounds(&config.served_field_ids)?;

    let pipeline = Arc::new(
        Pipeline::new(
            config.clone(),
            pool,
            SimulatedProbeSource::new(),
            LoggingValveTransport,
            LoggingMirrorLink,
            field_bounds,
        )
        .await?,
    );

    for sensor in load_sensors()? {
        info!(sensor_id = %sensor.sensor_id, field_id = %sensor.field_id, "sensor registered");
        pipeline.register_sensor(sensor).await;
    }

    info!("hydrosense hub starting");
    pipeline.run().await;

    Ok(())
}

/// Reads `FIELD_BOUNDS` as `field_id:min_lat,min_lon,max_lat,max_lon`
/// entries separated by `;`. Falls back to a single illustrative field so
/// the binary runs out of the box.
fn load_field_bounds(served_field_ids: &[String]) -> Result<BTreeMap<String, FieldBounds>> {
    let raw = env::var("FIELD_BOUNDS").unwrap_or_default();
    if raw.trim().is_empty() {
        let mut bounds = BTreeMap::new();
        for field_id in served_field_ids {
            bounds.insert(
                field_id.clone(),
                FieldBounds { min_lat: 37.490, min_lon: -105.810, max_lat: 37.510, max_lon: -105.790 },
            );
        }
        if bounds.is_empty() {
            bounds.insert(
                "F001".to_string(),
                FieldBounds { min_lat: 37.490, min_lon: -105.810, max_lat: 37.510, max_lon: -105.790 },
            );
        }
        return Ok(bounds);
    }

    let mut bounds = BTreeMap::new();
    for entry in raw.split(';').filter(|s| !s.trim().is_empty()) {
        let (field_id, coords) = entry.split_once(':').context("FIELD_BOUNDS entry missing ':'")?;
        let parts: Vec<f64> = coords
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .context("FIELD_BOUNDS coordinates must be four comma-separated floats")?;
        if parts.len() != 4 {
            anyhow::bail!("FIELD_BOUNDS entry for {field_id} must have exactly 4 coordinates");
        }
        bounds.insert(
            field_id.trim().to_string(),
            FieldBounds { min_lat: parts[0], min_lon: parts[1], max_lat: parts[2], max_lon: parts[3] },
        );
    }
    Ok(bounds)
}

/// Reads `SENSOR_SEED` as `sensor_id:kind:field_id:zone_id:lat:lon` entries
/// separated by `;`, where kind is one of `surface2`, `vertical5`,
/// `vertical7`. Falls back to a single illustrative sensor.
fn load_sensors() -> Result<Vec<Sensor>> {
    let raw = env::var("SENSOR_SEED").unwrap_or_default();
    if raw.trim().is_empty() {
        return Ok(vec![Sensor::new("B001", SensorKind::SurfaceBlanket2Depth, "F001", "F001_zone1", 37.5, -105.8)]);
    }

    let mut sensors = Vec::new();
    for entry in raw.split(';').filter(|s| !s.trim().is_empty()) {
        let parts: Vec<&str> = entry.split(':').collect();
        if parts.len() != 6 {
            anyhow::bail!("SENSOR_SEED entry '{entry}' must have 6 ':'-separated fields");
        }
        let kind = match parts[1] {
            "surface2" => SensorKind::SurfaceBlanket2Depth,
            "vertical5" => SensorKind::VerticalMedium5Depth,
            "vertical7" => SensorKind::VerticalLarge7Depth,
            other => anyhow::bail!("unknown sensor kind '{other}'"),
        };
        let lat: f64 = parts[4].trim().parse().context("invalid latitude in SENSOR_SEED")?;
        let lon: f64 = parts[5].trim().parse().context("invalid longitude in SENSOR_SEED")?;
        sensors.push(Sensor::new(parts[0], kind, parts[2], parts[3], lat, lon));
    }
    Ok(sensors)
}
