mod file;
mod http;
mod random;

pub use file::FileSource;
pub use http::HttpSource;
pub use random::RandomSource;

use crate::config::{Config, SourceKind};
use crate::lookup::DetailLookup;
use crate::models::RawReading;
use anyhow::{anyhow, Context, Result};

/// Raw reading producer for one sensor, selected by `SIM_SOURCE`.
#[derive(Debug)]
pub enum SensorSource {
    File(FileSource),
    Http(HttpSource),
    Random(RandomSource),
}

impl SensorSource {
    /// Builds the configured source. Anything missing here (sample file, a detail file for
    /// any sampled allocation, API settings, calibration for the generator) is a startup error.
    pub async fn build(config: &Config, sensor_id: &str, lookup: &DetailLookup) -> Result<Self> {
        let source = match config.source {
            SourceKind::File => {
                let file = FileSource::load(lookup.data_dir(), sensor_id)?;
                for allocation_id in file.allocation_ids() {
                    lookup
                        .lookup(allocation_id)
                        .await
                        .with_context(|| format!("load details for allocation {allocation_id}"))?;
                }
                SensorSource::File(file)
            }
            SourceKind::Http => {
                let api = config
                    .api
                    .clone()
                    .ok_or_else(|| anyhow!("http source selected without API settings"))?;
                SensorSource::Http(HttpSource::new(api, sensor_id)?)
            }
            SourceKind::Random => {
                let detail = lookup
                    .lookup(sensor_id)
                    .await
                    .with_context(|| format!("load calibration for sensor {sensor_id}"))?;
                SensorSource::Random(RandomSource::new(sensor_id, &detail)?)
            }
        };
        Ok(source)
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            SensorSource::File(_) => SourceKind::File,
            SensorSource::Http(_) => SourceKind::Http,
            SensorSource::Random(_) => SourceKind::Random,
        }
    }

    /// Readings for tick `tick`, counted from zero.
    pub async fn poll(&mut self, tick: u64) -> Vec<RawReading> {
        match self {
            SensorSource::File(source) => vec![source.sample_at(tick).clone()],
            SensorSource::Http(source) => source.poll(tick).await,
            SensorSource::Random(source) => vec![source.next_reading()],
        }
    }
}
