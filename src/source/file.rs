use crate::models::{RawReading, ReadingEnvelope};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Replays the bundled sample list for one sensor, wrapping around at the end.
#[derive(Debug, Clone)]
pub struct FileSource {
    samples: Vec<RawReading>,
}

impl FileSource {
    pub fn new(samples: Vec<RawReading>) -> Result<Self> {
        if samples.is_empty() {
            bail!("sample list is empty");
        }
        Ok(Self { samples })
    }

    pub fn load(data_dir: &Path, sensor_id: &str) -> Result<Self> {
        let path = sample_path(data_dir, sensor_id);
        let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let envelope: ReadingEnvelope =
            serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
        Self::new(envelope.into_readings(sensor_id))
            .with_context(|| format!("no samples in {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Distinct allocation ids referenced by the samples, in first-seen order.
    pub fn allocation_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for sample in &self.samples {
            if !ids.contains(&sample.allocation_id.as_str()) {
                ids.push(&sample.allocation_id);
            }
        }
        ids
    }

    pub fn sample_at(&self, tick: u64) -> &RawReading {
        let index = (tick % self.samples.len() as u64) as usize;
        &self.samples[index]
    }
}

pub fn sample_path(data_dir: &Path, sensor_id: &str) -> PathBuf {
    data_dir.join(format!("sensorData.{sensor_id}.json"))
}
