use crate::fill_level::{calculate_fill_level, FillLevelError};
use crate::lookup::DetailLookup;
use crate::models::{OutputRecord, RawReading, SensorDetail};
use crate::publisher::Publisher;
use crate::source::SensorSource;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub ticks: AtomicU64,
    pub published: AtomicU64,
    pub dropped: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.ticks.load(Ordering::Relaxed),
            self.published.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }
}

/// Fill level from the reading and the sensor's calibration. A level carried by the reading
/// wins. Otherwise a missing depth counts as zero and a missing fill-line offset as no offset.
pub fn fill_level_for(raw: &RawReading, detail: &SensorDetail) -> Result<i64, FillLevelError> {
    if let Some(level) = raw.fill_level {
        return Ok(level);
    }
    calculate_fill_level(
        detail.depth_when_empty.unwrap_or(0),
        detail.distance_sensor_to_fill_line.unwrap_or(0),
        raw.ultrasound_distance,
    )
}

pub fn assemble(raw: &RawReading, detail: &SensorDetail, fill_level: Option<i64>) -> OutputRecord {
    OutputRecord {
        sensor_id: detail.sensor_id,
        bin_id: detail.bin_id,
        bin_name: detail.bin_name.clone(),
        bin_category: detail.bin_category.clone(),
        latitude: detail.latitude,
        longitude: detail.longitude,
        fill_level_percent: fill_level,
        temperature: raw.temperature,
        timestamp: raw.timestamp.clone(),
    }
}

/// Lookup, calculate and assemble one reading. Only a failed lookup is an error; a fill level
/// that cannot be computed is published as null.
pub async fn process_reading(lookup: &DetailLookup, raw: &RawReading) -> Result<OutputRecord> {
    let detail = lookup.lookup(&raw.allocation_id).await?;
    let fill_level = match fill_level_for(raw, &detail) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(error = %err, allocation = %raw.allocation_id, "cannot compute fill level");
            None
        }
    };
    Ok(assemble(raw, &detail, fill_level))
}

/// One pass of source -> lookup -> calculate -> assemble -> publish. A publish failure drops
/// that record only. A missing or malformed detail file is returned as an error.
pub async fn run_tick(
    source: &mut SensorSource,
    lookup: &DetailLookup,
    publisher: &Publisher,
    stats: &PipelineStats,
    tick: u64,
) -> Result<()> {
    stats.ticks.fetch_add(1, Ordering::Relaxed);
    let readings = source.poll(tick).await;
    if readings.is_empty() {
        tracing::debug!(tick, "no readings this tick");
        return Ok(());
    }

    for raw in readings {
        let record = process_reading(lookup, &raw)
            .await
            .with_context(|| format!("tick {tick}: allocation {}", raw.allocation_id))?;
        match publisher.publish(&record).await {
            Ok(()) => {
                stats.published.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(tick, fill_level = ?record.fill_level_percent, "queued record");
            }
            Err(err) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %format!("{err:#}"), tick, "failed to publish record");
            }
        }
    }
    Ok(())
}

/// Drives one sensor's pipeline on a fixed interval until the task is aborted or a tick hits
/// a detail lookup failure. Ticks never overlap: a slow tick delays the next one and missed
/// ticks are skipped.
pub async fn run_sensor(
    sensor_id: String,
    mut source: SensorSource,
    lookup: DetailLookup,
    publisher: Publisher,
    interval: Duration,
    stats: Arc<PipelineStats>,
) -> Result<()> {
    tracing::info!(sensor = %sensor_id, source = %source.kind(), ?interval, "sensor pipeline started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;
    loop {
        ticker.tick().await;
        run_tick(&mut source, &lookup, &publisher, &stats, tick)
            .await
            .with_context(|| format!("sensor {sensor_id}"))?;
        tick = tick.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FileSource;
    use serde_json::Value;
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::TempDir;

    fn detail() -> SensorDetail {
        SensorDetail {
            sensor_id: Some(98),
            bin_id: Some(667),
            bin_name: Some("Random Smart Sensor Simulator Module".to_string()),
            bin_category: Some("Smart Sensor Simulator".to_string()),
            latitude: Some(-33.869033),
            longitude: Some(151.208895),
            depth_when_empty: Some(50),
            distance_sensor_to_fill_line: Some(10),
        }
    }

    fn reading(allocation_id: &str, ultrasound: i64, timestamp: &str) -> RawReading {
        RawReading {
            allocation_id: allocation_id.to_string(),
            ultrasound_distance: ultrasound,
            temperature: 23.0,
            timestamp: timestamp.to_string(),
            fill_level: None,
        }
    }

    fn write_detail(dir: &TempDir, allocation_id: &str, body: &str) {
        fs::write(dir.path().join(format!("sensorDetail.{allocation_id}.json")), body).unwrap();
    }

    #[test]
    fn assembled_record_carries_every_field() {
        let raw = reading("38", 20, "2018-01-01T00:00:00Z");
        let fill = fill_level_for(&raw, &detail()).unwrap();
        assert_eq!(fill, 80);

        let record = assemble(&raw, &detail(), Some(fill));
        let value: Value = serde_json::to_value(&record).unwrap();
        let keys: BTreeSet<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        let expected: BTreeSet<&str> = [
            "sensorId",
            "binId",
            "binName",
            "binCategory",
            "latitude",
            "longitude",
            "fillLevel",
            "temperature",
            "timestamp",
        ]
        .into_iter()
        .collect();
        assert_eq!(keys, expected);
        assert_eq!(value["binName"], "Random Smart Sensor Simulator Module");
        assert_eq!(value["latitude"], -33.869033);
        assert_eq!(value["fillLevel"], 80);
        assert_eq!(value["temperature"], 23.0);
        assert_eq!(value["timestamp"], "2018-01-01T00:00:00Z");
    }

    #[test]
    fn missing_depth_is_a_zero_depth_error() {
        let partial = SensorDetail {
            bin_id: Some(1),
            ..SensorDetail::default()
        };
        assert_eq!(
            fill_level_for(&reading("1", 20, "t"), &partial),
            Err(FillLevelError::ZeroDepth)
        );
    }

    #[tokio::test]
    async fn partial_detail_publishes_nulls() {
        let dir = TempDir::new().unwrap();
        write_detail(&dir, "5", r#"{"binId": 12}"#);
        let lookup = DetailLookup::new(dir.path());

        let record = process_reading(&lookup, &reading("5", 20, "t")).await.unwrap();
        assert_eq!(record.bin_id, Some(12));
        assert_eq!(record.sensor_id, None);
        assert_eq!(record.fill_level_percent, None);
    }

    #[tokio::test]
    async fn file_source_cycles_through_publisher() {
        let dir = TempDir::new().unwrap();
        write_detail(
            &dir,
            "38",
            r#"{"sensorId": 98, "binId": 667, "depthWhenEmpty_cm": 50, "distanceSensorToFillLine_cm": 10}"#,
        );
        let lookup = DetailLookup::new(dir.path());
        let samples = vec![
            reading("38", 20, "s0"),
            reading("38", 35, "s1"),
            reading("38", 60, "s2"),
        ];
        let mut source = SensorSource::File(FileSource::new(samples).unwrap());
        let (publisher, mut rx) = Publisher::channel("iot/sim/DataOutput", 16);
        let stats = PipelineStats::new();

        for tick in 0..4 {
            run_tick(&mut source, &lookup, &publisher, &stats, tick).await.unwrap();
        }
        drop(publisher);

        let mut emitted = Vec::new();
        while let Some(message) = rx.recv().await {
            assert_eq!(message.topic, "iot/sim/DataOutput");
            let value: Value = serde_json::from_slice(&message.payload).unwrap();
            emitted.push((
                value["timestamp"].as_str().unwrap().to_string(),
                value["fillLevel"].as_i64().unwrap(),
            ));
        }
        assert_eq!(
            emitted,
            vec![
                ("s0".to_string(), 80),
                ("s1".to_string(), 50),
                ("s2".to_string(), 0),
                ("s0".to_string(), 80),
            ]
        );
        assert_eq!(stats.snapshot(), (4, 4, 0));
    }

    #[tokio::test]
    async fn failed_lookup_stops_the_pipeline() {
        let dir = TempDir::new().unwrap();
        write_detail(&dir, "1", r#"{"depthWhenEmpty_cm": 50}"#);
        let lookup = DetailLookup::new(dir.path());
        let samples = vec![reading("1", 25, "b"), reading("missing", 20, "a")];
        let mut source = SensorSource::File(FileSource::new(samples).unwrap());
        let (publisher, mut rx) = Publisher::channel("t", 4);
        let stats = PipelineStats::new();

        run_tick(&mut source, &lookup, &publisher, &stats, 0).await.unwrap();
        let err = run_tick(&mut source, &lookup, &publisher, &stats, 1)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("sensorDetail.missing.json"));

        let message = rx.try_recv().unwrap();
        let value: Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(value["timestamp"], "b");
        assert_eq!(value["fillLevel"], 50);
        assert!(rx.try_recv().is_err());
        assert_eq!(stats.snapshot(), (2, 1, 0));
    }

    #[tokio::test]
    async fn run_sensor_ends_on_malformed_detail_file() {
        let dir = TempDir::new().unwrap();
        write_detail(&dir, "38", "not json");
        let lookup = DetailLookup::new(dir.path());
        let source = SensorSource::File(FileSource::new(vec![reading("38", 20, "x")]).unwrap());
        let (publisher, mut rx) = Publisher::channel("t", 4);

        let err = run_sensor(
            "38".to_string(),
            source,
            lookup,
            publisher,
            Duration::from_millis(10),
            Arc::new(PipelineStats::new()),
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("parse"));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn carried_fill_level_wins_over_calibration() {
        let mut raw = reading("38", 20, "t");
        raw.fill_level = Some(33);
        assert_eq!(fill_level_for(&raw, &detail()), Ok(33));
        assert_eq!(fill_level_for(&raw, &SensorDetail::default()), Ok(33));
    }

    #[tokio::test]
    async fn bundled_sample_data_produces_records() {
        let data_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("data");
        let lookup = DetailLookup::new(&data_dir);
        let file = FileSource::load(&data_dir, "38").unwrap();
        let count = file.len() as u64;
        let mut source = SensorSource::File(file);
        let (publisher, mut rx) = Publisher::channel("t", count as usize);
        let stats = PipelineStats::new();

        for tick in 0..count {
            run_tick(&mut source, &lookup, &publisher, &stats, tick).await.unwrap();
        }
        for _ in 0..count {
            let message = rx.try_recv().unwrap();
            let value: Value = serde_json::from_slice(&message.payload).unwrap();
            assert_eq!(value["sensorId"], 98);
            assert_eq!(value["binId"], 667);
            assert!(value["fillLevel"].is_i64());
        }
        assert_eq!(stats.snapshot(), (count, count, 0));
    }

    #[tokio::test]
    async fn run_sensor_ticks_on_interval() {
        let dir = TempDir::new().unwrap();
        write_detail(&dir, "38", r#"{"depthWhenEmpty_cm": 50, "distanceSensorToFillLine_cm": 10}"#);
        let lookup = DetailLookup::new(dir.path());
        let source = SensorSource::File(FileSource::new(vec![reading("38", 20, "x")]).unwrap());
        let (publisher, mut rx) = Publisher::channel("t", 16);
        let stats = Arc::new(PipelineStats::new());

        let handle = tokio::spawn(run_sensor(
            "38".to_string(),
            source,
            lookup,
            publisher,
            Duration::from_millis(10),
            stats.clone(),
        ));

        for _ in 0..3 {
            let message = rx.recv().await.unwrap();
            let value: Value = serde_json::from_slice(&message.payload).unwrap();
            assert_eq!(value["fillLevel"], 80);
        }
        handle.abort();
        assert!(stats.snapshot().0 >= 3);
    }
}
