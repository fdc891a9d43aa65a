use crate::config::ApiConfig;
use crate::models::{RawReading, ReadingEnvelope};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadingsRequest<'a> {
    device_id: &'a str,
    access_token: &'a str,
}

/// Pulls readings from the remote sensor API, one fixed-width time window per tick.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    api: ApiConfig,
    sensor_id: String,
}

impl HttpSource {
    pub fn new(api: ApiConfig, sensor_id: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(api.timeout)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            client,
            api,
            sensor_id: sensor_id.to_string(),
        })
    }

    /// `(dmin, dmax)` in unix seconds for the given tick.
    pub fn window(&self, tick: u64) -> (u64, u64) {
        let start = self
            .api
            .epoch_offset
            .saturating_add(tick.saturating_mul(self.api.window_secs));
        (start, start.saturating_add(self.api.window_secs))
    }

    fn readings_url(&self) -> String {
        format!("{}/sensors/{}/readings", self.api.base_url, self.sensor_id)
    }

    /// Readings for one tick. Every failure, including a non-success status, yields an
    /// empty list so the next tick starts clean.
    pub async fn poll(&self, tick: u64) -> Vec<RawReading> {
        let (dmin, dmax) = self.window(tick);
        match self.fetch(dmin, dmax).await {
            Ok(readings) => readings,
            Err(err) => {
                tracing::warn!(
                    error = %format!("{err:#}"),
                    sensor = %self.sensor_id,
                    dmin,
                    dmax,
                    "sensor API request failed; skipping window"
                );
                Vec::new()
            }
        }
    }

    async fn fetch(&self, dmin: u64, dmax: u64) -> Result<Vec<RawReading>> {
        let body = ReadingsRequest {
            device_id: &self.api.device_id,
            access_token: &self.api.access_token,
        };
        let response = self
            .client
            .post(self.readings_url())
            .query(&[("dmin", dmin), ("dmax", dmax)])
            .json(&body)
            .send()
            .await
            .context("send readings request")?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, sensor = %self.sensor_id, dmin, dmax, "sensor API returned non-success");
            return Ok(Vec::new());
        }

        let envelope: ReadingEnvelope = response.json().await.context("decode readings")?;
        Ok(envelope.into_readings(&self.sensor_id))
    }
}
