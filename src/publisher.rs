use crate::models::OutputRecord;
use anyhow::{Context, Result};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Hands encoded records to the MQTT task. Cloned into every sensor pipeline.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::Sender<OutboundMessage>,
    topic: String,
}

impl Publisher {
    pub fn channel(
        topic: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                topic: topic.into(),
            },
            rx,
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn publish(&self, record: &OutputRecord) -> Result<()> {
        let payload = encode_record(record)?;
        self.tx
            .send(OutboundMessage {
                topic: self.topic.clone(),
                payload,
            })
            .await
            .context("MQTT publisher is gone")?;
        Ok(())
    }
}

pub fn encode_record(record: &OutputRecord) -> Result<Vec<u8>> {
    serde_json::to_vec(record).context("encode output record")
}
