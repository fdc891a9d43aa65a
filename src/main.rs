mod config;
mod fill_level;
mod lookup;
mod models;
mod mqtt;
mod pipeline;
mod publisher;
mod source;

use crate::config::Config;
use crate::lookup::DetailLookup;
use crate::pipeline::PipelineStats;
use crate::publisher::Publisher;
use crate::source::SensorSource;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinSet;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,bin_sensor_simulator=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let config = Config::from_env()?;

    let transport = mqtt::load_transport(&config)?;
    let lookup = DetailLookup::new(config.data_dir.clone());
    let (publisher, outbound_rx) = Publisher::channel(config.output_topic(), 256);
    tracing::info!(
        topic = %publisher.topic(),
        source = %config.source,
        sensors = config.sensor_ids.len(),
        "bin sensor simulator starting"
    );

    let mut sources = Vec::with_capacity(config.sensor_ids.len());
    for sensor_id in &config.sensor_ids {
        let source = SensorSource::build(&config, sensor_id, &lookup)
            .await
            .with_context(|| format!("set up source for sensor {sensor_id}"))?;
        if let SensorSource::File(file) = &source {
            tracing::info!(sensor = %sensor_id, samples = file.len(), "loaded sample data");
        }
        sources.push((sensor_id.clone(), source));
    }

    let mqtt_config = config.clone();
    let mut mqtt_handle = tokio::spawn(async move {
        if let Err(err) = mqtt::run_mqtt_publisher(mqtt_config, transport, outbound_rx).await {
            tracing::error!(error=%err, "mqtt publisher exited");
        }
    });

    let stats = Arc::new(PipelineStats::new());
    let mut sensors = JoinSet::new();
    for (sensor_id, source) in sources {
        sensors.spawn(pipeline::run_sensor(
            sensor_id,
            source,
            lookup.clone(),
            publisher.clone(),
            config.interval(),
            stats.clone(),
        ));
    }
    drop(publisher);

    let outcome: Result<()> = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
        _ = &mut mqtt_handle => Ok(()),
        Some(joined) = sensors.join_next() => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.context("sensor pipeline failed")),
            Err(err) => Err(anyhow::Error::new(err).context("sensor task panicked")),
        },
    };

    sensors.abort_all();
    mqtt_handle.abort();

    let (ticks, published, dropped) = stats.snapshot();
    tracing::info!(ticks, published, dropped, "bin sensor simulator stopped");
    outcome
}
