use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const DEFAULT_OUTPUT_NAME: &str = "DataOutput";
const IOT_EDGE_API_VERSION: &str = "2018-06-30";

/// Where raw readings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    File,
    Http,
    Random,
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "file" | "sample" => Ok(SourceKind::File),
            "http" | "api" => Ok(SourceKind::Http),
            "random" => Ok(SourceKind::Random),
            other => Err(anyhow!("unknown source kind {other:?} (expected file, http or random)")),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::File => "file",
            SourceKind::Http => "http",
            SourceKind::Random => "random",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub device_id: String,
    pub access_token: String,
    pub window_secs: u64,
    pub epoch_offset: u64,
    pub timeout: Duration,
}

/// Fields of an IoT Edge module connection string that matter for the MQTT session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub host_name: String,
    pub device_id: String,
    pub module_id: Option<String>,
    pub gateway_host_name: Option<String>,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut host_name = None;
        let mut device_id = None;
        let mut module_id = None;
        let mut gateway_host_name = None;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed connection string segment {part:?}"))?;
            let value = value.trim().to_string();
            match key.trim() {
                "HostName" => host_name = Some(value),
                "DeviceId" => device_id = Some(value),
                "ModuleId" => module_id = Some(value),
                "GatewayHostName" => gateway_host_name = Some(value),
                _ => {}
            }
        }

        Ok(Self {
            host_name: host_name.ok_or_else(|| anyhow!("connection string missing HostName"))?,
            device_id: device_id.ok_or_else(|| anyhow!("connection string missing DeviceId"))?,
            module_id,
            gateway_host_name,
        })
    }

    /// The host the MQTT session connects to; edge modules talk to their gateway.
    pub fn broker_host(&self) -> &str {
        self.gateway_host_name.as_deref().unwrap_or(&self.host_name)
    }

    pub fn client_id(&self) -> String {
        match &self.module_id {
            Some(module_id) => format!("{}/{}", self.device_id, module_id),
            None => self.device_id.clone(),
        }
    }

    pub fn username(&self) -> String {
        format!(
            "{}/{}/?api-version={IOT_EDGE_API_VERSION}",
            self.host_name,
            self.client_id()
        )
    }

    pub fn output_topic(&self, output_name: &str) -> String {
        match &self.module_id {
            Some(module_id) => format!(
                "devices/{}/modules/{}/messages/events/$.on={}",
                self.device_id, module_id, output_name
            ),
            None => format!("devices/{}/messages/events/", self.device_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub source: SourceKind,
    pub sensor_ids: Vec<String>,
    pub interval_ms: u64,
    pub data_dir: PathBuf,

    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_use_tls: bool,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_topic_prefix: String,
    pub mqtt_keepalive_secs: u64,
    pub mqtt_ca_cert_path: Option<PathBuf>,
    pub output_name: String,
    pub connection: Option<ConnectionString>,

    pub api: Option<ApiConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let source: SourceKind = env_string("SIM_SOURCE", Some("file".to_string()))?.parse()?;
        let sensor_ids = parse_sensor_ids(&env_string("SIM_SENSOR_IDS", Some("38".to_string()))?)?;
        let interval_ms = env_u64("SIM_INTERVAL_MS", Some(1000))?;
        if interval_ms == 0 {
            bail!("SIM_INTERVAL_MS must be greater than zero");
        }
        let data_dir = PathBuf::from(env_string("SIM_DATA_DIR", Some("data".to_string()))?);

        let mqtt_url = env_string("SIM_MQTT_URL", Some("mqtt://127.0.0.1:1883".to_string()))?;
        let url = Url::parse(&mqtt_url).context("invalid SIM_MQTT_URL")?;
        let mut mqtt_use_tls = matches!(url.scheme(), "mqtts" | "ssl" | "tls");
        let mut mqtt_host = url
            .host_str()
            .ok_or_else(|| anyhow!("SIM_MQTT_URL missing host"))?
            .to_string();
        let mut mqtt_port = url.port().unwrap_or(if mqtt_use_tls { 8883 } else { 1883 });

        let mut mqtt_username = env_optional("SIM_MQTT_USERNAME");
        let mqtt_password = env_optional("SIM_MQTT_PASSWORD");
        let mut mqtt_client_id =
            env_string("SIM_MQTT_CLIENT_ID", Some("bin-sensor-simulator".to_string()))?;
        let mqtt_topic_prefix = env_string("SIM_MQTT_TOPIC_PREFIX", Some("iot".to_string()))?;
        let mqtt_keepalive_secs = env_u64("SIM_MQTT_KEEPALIVE_SECS", Some(30))?;
        let mqtt_ca_cert_path = env_optional("SIM_CA_CERT_PATH").map(PathBuf::from);
        let output_name = env_string("SIM_OUTPUT_NAME", Some(DEFAULT_OUTPUT_NAME.to_string()))?;

        let connection = match env_optional("SIM_CONNECTION_STRING") {
            Some(raw) => {
                let parsed =
                    ConnectionString::parse(&raw).context("invalid SIM_CONNECTION_STRING")?;
                mqtt_host = parsed.broker_host().to_string();
                mqtt_port = 8883;
                mqtt_use_tls = true;
                mqtt_client_id = parsed.client_id();
                if mqtt_username.is_none() {
                    mqtt_username = Some(parsed.username());
                }
                Some(parsed)
            }
            None => None,
        };

        if let Some(path) = &mqtt_ca_cert_path {
            if !path.is_file() {
                bail!("missing certificate file {}", path.display());
            }
        } else if mqtt_use_tls {
            bail!("SIM_CA_CERT_PATH is required for a TLS broker connection");
        }

        let api = if source == SourceKind::Http {
            Some(api_from_env()?)
        } else {
            None
        };

        Ok(Self {
            source,
            sensor_ids,
            interval_ms,
            data_dir,
            mqtt_host,
            mqtt_port,
            mqtt_use_tls,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_topic_prefix,
            mqtt_keepalive_secs,
            mqtt_ca_cert_path,
            output_name,
            connection,
            api,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn output_topic(&self) -> String {
        match &self.connection {
            Some(connection) => connection.output_topic(&self.output_name),
            None => format!(
                "{}/{}/{}",
                self.mqtt_topic_prefix, self.mqtt_client_id, self.output_name
            ),
        }
    }
}

fn api_from_env() -> Result<ApiConfig> {
    let base_url = env_string("SIM_API_BASE_URL", None)?;
    Url::parse(&base_url).context("invalid SIM_API_BASE_URL")?;
    let window_secs = env_u64("SIM_API_WINDOW_SECS", Some(60))?;
    if window_secs == 0 {
        bail!("SIM_API_WINDOW_SECS must be greater than zero");
    }
    Ok(ApiConfig {
        base_url: base_url.trim_end_matches('/').to_string(),
        device_id: env_string("SIM_API_DEVICE_ID", Some(String::new()))?,
        access_token: env_string("SIM_API_ACCESS_TOKEN", Some(String::new()))?,
        window_secs,
        epoch_offset: env_u64("SIM_API_EPOCH_OFFSET", Some(1_514_764_800))?,
        timeout: Duration::from_millis(env_u64("SIM_API_TIMEOUT_MS", Some(5000))?),
    })
}

pub fn parse_sensor_ids(raw: &str) -> Result<Vec<String>> {
    let mut ids: Vec<String> = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|v| !v.is_empty()) {
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }
    if ids.is_empty() {
        bail!("SIM_SENSOR_IDS must name at least one sensor");
    }
    Ok(ids)
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
