use crate::models::{RawReading, SensorDetail};
use anyhow::{anyhow, bail, Result};
use chrono::{SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Synthesizes one reading per tick with a uniformly random fill level and temperature in
/// `0..=100`. The drawn fill level travels with the reading; the ultrasonic distance is the
/// nearest whole centimetre for that level under the sensor's calibration.
#[derive(Debug)]
pub struct RandomSource {
    allocation_id: String,
    depth_when_empty: i64,
    distance_to_fill_line: i64,
    rng: StdRng,
}

impl RandomSource {
    pub fn new(allocation_id: &str, detail: &SensorDetail) -> Result<Self> {
        Self::with_rng(allocation_id, detail, StdRng::from_entropy())
    }

    pub fn with_rng(allocation_id: &str, detail: &SensorDetail, rng: StdRng) -> Result<Self> {
        let depth_when_empty = detail
            .depth_when_empty
            .ok_or_else(|| anyhow!("sensor {allocation_id} has no depthWhenEmpty_cm"))?;
        if depth_when_empty <= 0 {
            bail!("sensor {allocation_id} has non-positive depthWhenEmpty_cm {depth_when_empty}");
        }
        Ok(Self {
            allocation_id: allocation_id.to_string(),
            depth_when_empty,
            distance_to_fill_line: detail.distance_sensor_to_fill_line.unwrap_or(0),
            rng,
        })
    }

    pub fn next_reading(&mut self) -> RawReading {
        let fill_level: i64 = self.rng.gen_range(0..=100);
        let temperature: f64 = self.rng.gen_range(0.0..=100.0);

        RawReading {
            allocation_id: self.allocation_id.clone(),
            ultrasound_distance: self.ultrasound_for(fill_level),
            temperature: (temperature * 10.0).round() / 10.0,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            fill_level: Some(fill_level),
        }
    }

    fn ultrasound_for(&self, fill_level: i64) -> i64 {
        let depth = i128::from(self.depth_when_empty);
        let filled_cm = (i128::from(fill_level) * depth + 50) / 100;
        let distance = depth + i128::from(self.distance_to_fill_line) - filled_cm;
        distance.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }
}
