use crate::models::SensorDetail;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

/// Resolves placement and calibration details from `sensorDetail.<allocation id>.json`.
///
/// The file is re-read on every call so edits show up on the next tick without a restart.
#[derive(Debug, Clone)]
pub struct DetailLookup {
    data_dir: PathBuf,
}

impl DetailLookup {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn detail_path(&self, allocation_id: &str) -> Result<PathBuf> {
        let id = allocation_id.trim();
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            bail!("invalid allocation id {allocation_id:?}");
        }
        Ok(self.data_dir.join(format!("sensorDetail.{id}.json")))
    }

    pub async fn lookup(&self, allocation_id: &str) -> Result<SensorDetail> {
        let path = self.detail_path(allocation_id)?;
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
    }
}
