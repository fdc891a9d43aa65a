use serde::{Deserialize, Deserializer, Serialize};

/// One raw sample as produced by a sensor source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub allocation_id: String,
    pub ultrasound_distance: i64,
    pub temperature: f64,
    pub timestamp: String,
    /// Set by producers that draw the percentage directly; used instead of the calibration
    /// calculation.
    pub fill_level: Option<i64>,
}

/// Static placement and calibration data for one allocation id. Every field is optional on
/// disk; anything missing is published as null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDetail {
    pub sensor_id: Option<i64>,
    pub bin_id: Option<i64>,
    pub bin_name: Option<String>,
    pub bin_category: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(rename = "depthWhenEmpty_cm")]
    pub depth_when_empty: Option<i64>,
    #[serde(rename = "distanceSensorToFillLine_cm")]
    pub distance_sensor_to_fill_line: Option<i64>,
}

/// The published message body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRecord {
    pub sensor_id: Option<i64>,
    pub bin_id: Option<i64>,
    pub bin_name: Option<String>,
    pub bin_category: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(rename = "fillLevel")]
    pub fill_level_percent: Option<i64>,
    pub temperature: f64,
    pub timestamp: String,
}

/// Envelope shared by the bundled sample files and the remote readings API.
#[derive(Debug, Deserialize)]
pub struct ReadingEnvelope {
    pub message: ReadingList,
}

#[derive(Debug, Deserialize)]
pub struct ReadingList {
    #[serde(default)]
    pub lists: Vec<ReadingEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingEntry {
    #[serde(default, deserialize_with = "loose_string")]
    pub allocation_id: Option<String>,
    pub ultrasound: i64,
    pub temperature_value: f64,
    #[serde(default, deserialize_with = "loose_string")]
    pub timestampdata: Option<String>,
}

impl ReadingEntry {
    /// Entries that carry no allocation id belong to the sensor the list was read for.
    pub fn into_reading(self, fallback_allocation_id: &str) -> RawReading {
        RawReading {
            allocation_id: self
                .allocation_id
                .unwrap_or_else(|| fallback_allocation_id.to_string()),
            ultrasound_distance: self.ultrasound,
            temperature: self.temperature_value,
            timestamp: self.timestampdata.unwrap_or_default(),
            fill_level: None,
        }
    }
}

impl ReadingEnvelope {
    pub fn into_readings(self, fallback_allocation_id: &str) -> Vec<RawReading> {
        self.message
            .lists
            .into_iter()
            .map(|entry| entry.into_reading(fallback_allocation_id))
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Int(i64),
    Float(f64),
}

/// Ids and timestamps show up both quoted and bare depending on the producer.
fn loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<StringOrNumber>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        StringOrNumber::Str(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        StringOrNumber::Int(i) => Some(i.to_string()),
        StringOrNumber::Float(f) => Some(f.to_string()),
    }))
}
