use anyhow::Context;
use serde::Deserialize;
use std::{collections::HashSet, fs, path::Path, time::Duration};

use meter_core::domain::MeterFamily;
use time::UtcOffset;

use crate::pipeline::PipelineError;

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_forward_batch_size")]
    pub forward_batch_size: u32,
    #[serde(default = "default_history_tolerance_secs")]
    pub history_tolerance_secs: i64,
    /// Raw counter units per reported energy unit (Wh per kWh).
    #[serde(default = "default_energy_divisor")]
    pub energy_divisor: f64,
    /// Fixed offset for hourly buckets, e.g. "+07:00". When unset, the host's
    /// local time zone is looked up every cycle, so daylight-saving changes apply.
    pub utc_offset: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    pub base_url: String,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Path between the base URL and `/telemetry`; defaults to `api/v1/<access token>`.
    pub topic_prefix: Option<String>,
    #[serde(default = "default_publish_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeterTargetConfig {
    pub family: MeterFamily,
    pub host: String,
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    pub unit_ids: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub poll: PollConfig,
    pub telemetry: TelemetryConfig,
    pub meters: Vec<MeterTargetConfig>,
    pub metrics: Option<MetricsConfig>,
}

fn default_store_url() -> String {
    "sqlite://meter-gateway.db".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_retention_days() -> u64 {
    7
}

fn default_interval_secs() -> u64 {
    60
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

fn default_request_timeout_ms() -> u64 {
    1_000
}

fn default_forward_batch_size() -> u32 {
    100
}

fn default_history_tolerance_secs() -> i64 {
    30
}

fn default_energy_divisor() -> f64 {
    1_000.0
}

fn default_publish_timeout_ms() -> u64 {
    5_000
}

fn default_modbus_port() -> u16 {
    502
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "gateway-config.toml".to_string());
        let mut cfg = Self::from_path(Path::new(&path))?;

        if let Ok(token) = env::var("GATEWAY_ACCESS_TOKEN") {
            cfg.telemetry.access_token = Some(token);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: &str| -> Result<(), PipelineError> {
            Err(PipelineError::Config(msg.to_string()))
        };

        if self.meters.is_empty() {
            return invalid("at least one [[meters]] entry is required");
        }
        if let Some(meter) = self.meters.iter().find(|m| m.unit_ids.is_empty()) {
            return Err(PipelineError::Config(format!("meter {} has no unit_ids", meter.host)));
        }
        if self.poll.interval_secs == 0 {
            return invalid("poll.interval_secs must be positive");
        }
        if self.poll.forward_batch_size == 0 {
            return invalid("poll.forward_batch_size must be positive");
        }
        if self.poll.energy_divisor <= 0.0 || !self.poll.energy_divisor.is_finite() {
            return invalid("poll.energy_divisor must be a positive number");
        }
        if self.poll.history_tolerance_secs < 0 {
            return invalid("poll.history_tolerance_secs must not be negative");
        }
        if self.store.retention_days == 0 {
            return invalid("store.retention_days must be positive");
        }
        if self.telemetry.access_token.as_deref().map_or(true, str::is_empty) && self.telemetry.topic_prefix.is_none() {
            return invalid("telemetry.access_token (or GATEWAY_ACCESS_TOKEN) is required");
        }

        let mut endpoints = HashSet::new();
        for meter in &self.meters {
            for &unit_id in &meter.unit_ids {
                if !endpoints.insert((meter.host.as_str(), meter.port, unit_id)) {
                    return Err(PipelineError::Config(format!(
                        "unit {unit_id} at {}:{} is listed more than once",
                        meter.host, meter.port
                    )));
                }
            }
        }
        self.utc_offset()?;

        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.store.retention_days * 86_400)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.poll.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.poll.request_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry.request_timeout_ms)
    }

    pub fn topic_prefix(&self) -> String {
        match (&self.telemetry.topic_prefix, &self.telemetry.access_token) {
            (Some(prefix), _) => prefix.clone(),
            (None, Some(token)) => format!("api/v1/{token}"),
            (None, None) => "api/v1".to_string(),
        }
    }

    /// Fixed offset used to bucket hours, or `None` to follow the host's time zone.
    pub fn utc_offset(&self) -> Result<Option<UtcOffset>, PipelineError> {
        self.poll.utc_offset.as_deref().map(parse_offset).transpose()
    }
}

fn parse_offset(raw: &str) -> Result<UtcOffset, PipelineError> {
    let format = time::macros::format_description!("[offset_hour sign:mandatory]:[offset_minute]");
    UtcOffset::parse(raw.trim(), format)
        .map_err(|e| PipelineError::Config(format!("invalid poll.utc_offset {raw:?}: {e}")))
}
