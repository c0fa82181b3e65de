use crate::cli::Args;
use crate::error::ConfigError;
use crate::kind::{ColourChannels, SensorKind, RGB_FROM_SPECTRAL};
use crate::recording::monitor::MonitorSettings;
use crate::recording::variance::Variance;
use crate::sensors::ProviderKind;
use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DATABASE_PATH: &str = "/opt/node-agent/storage/trigger_recorder.sqlite";
const DEFAULT_SETTINGS_PATH: &str = "/opt/node-agent/config/trigger_recorder.json";

/// Read-side of the recorder's configuration, as seen by the supervisor.
pub trait ConfigStore: Send + Sync {
    fn is_trigger_recording_enabled(&self) -> bool;
    fn is_high_low_recording_enabled(&self) -> bool;
    fn is_installed(&self, kind: SensorKind) -> bool;
    fn colour_channels(&self) -> ColourChannels;
    fn trigger_config(&self, kind: SensorKind) -> Result<TriggerConfig, ConfigError>;
    fn high_low_config(&self, kind: SensorKind) -> Result<HighLowConfig, ConfigError>;
}

/// Immutable snapshot handed to one monitor at start.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerConfig {
    pub enabled: bool,
    pub variance: Variance,
    pub wait_seconds: f64,
}

impl TriggerConfig {
    pub fn wait(&self) -> Duration {
        wait_duration(self.wait_seconds)
    }

    /// Checks a snapshot against a monitor's channel layout. Every path that
    /// hands a snapshot to a monitor goes through here.
    pub fn validate(&self, kind: SensorKind, arity: usize) -> Result<(), ConfigError> {
        validate_wait(kind, self.wait_seconds)?;
        if kind.records_unconditionally() {
            return Ok(());
        }
        if self.variance.arity() != arity {
            return Err(ConfigError::VarianceArity {
                kind,
                expected: arity,
                got: self.variance.arity(),
            });
        }
        match self
            .variance
            .thresholds()
            .iter()
            .copied()
            .find(|value| !value.is_finite() || *value < 0.0)
        {
            Some(bad) => Err(ConfigError::InvalidVariance { kind, value: bad }),
            None => Ok(()),
        }
    }
}

/// Snapshot for one high/low monitor: a `(low, high)` band per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct HighLowConfig {
    pub enabled: bool,
    pub low: Vec<f64>,
    pub high: Vec<f64>,
    pub wait_seconds: f64,
}

impl HighLowConfig {
    pub fn wait(&self) -> Duration {
        wait_duration(self.wait_seconds)
    }

    pub fn arity(&self) -> usize {
        self.low.len()
    }

    pub fn validate(&self, kind: SensorKind, arity: usize) -> Result<(), ConfigError> {
        validate_wait(kind, self.wait_seconds)?;
        if kind.records_unconditionally() {
            return Err(ConfigError::Unavailable {
                kind,
                message: "high/low triggers do not apply to this sensor".to_string(),
            });
        }
        for (bound, values) in [("low", &self.low), ("high", &self.high)] {
            if values.len() != arity {
                return Err(ConfigError::ThresholdArity {
                    kind,
                    bound,
                    expected: arity,
                    got: values.len(),
                });
            }
            if let Some(bad) = values.iter().copied().find(|value| !value.is_finite()) {
                return Err(ConfigError::InvalidThreshold {
                    kind,
                    bound,
                    value: bad,
                });
            }
        }
        match self
            .low
            .iter()
            .zip(&self.high)
            .position(|(low, high)| low >= high)
        {
            Some(channel) => Err(ConfigError::InvertedBand {
                kind,
                channel,
                low: self.low[channel],
                high: self.high[channel],
            }),
            None => Ok(()),
        }
    }
}

/// Rejects waits a timer cannot represent: negative, NaN, infinite or overflowing.
pub fn validate_wait(kind: SensorKind, wait_seconds: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(wait_seconds).map_err(|_| ConfigError::InvalidWait {
        kind,
        value: wait_seconds,
    })
}

fn wait_duration(wait_seconds: f64) -> Duration {
    Duration::try_from_secs_f64(wait_seconds).unwrap_or(Duration::MAX)
}

/// One value for every channel, or one value per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelSetting {
    Scalar(f64),
    PerChannel(Vec<f64>),
}

impl ChannelSetting {
    fn values(&self) -> Vec<f64> {
        match self {
            ChannelSetting::Scalar(value) => vec![*value],
            ChannelSetting::PerChannel(values) => values.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerSetting {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance: Option<ChannelSetting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HighLowSetting {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<ChannelSetting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<ChannelSetting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<f64>,
}

/// Contents of the JSON settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderSettings {
    #[serde(default = "default_true")]
    pub trigger_recording_enabled: bool,
    #[serde(default)]
    pub high_low_recording_enabled: bool,
    #[serde(default)]
    pub installed_sensors: BTreeSet<SensorKind>,
    #[serde(default)]
    pub colour_channels: ColourChannels,
    /// Stamp host name and IP on every row (Linux system installs).
    #[serde(default)]
    pub record_identity: bool,
    #[serde(default)]
    pub triggers: BTreeMap<SensorKind, TriggerSetting>,
    #[serde(default)]
    pub trigger_high_low: BTreeMap<SensorKind, HighLowSetting>,
}

fn default_true() -> bool {
    true
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            trigger_recording_enabled: true,
            high_low_recording_enabled: false,
            installed_sensors: BTreeSet::new(),
            colour_channels: ColourChannels::default(),
            record_identity: false,
            triggers: BTreeMap::new(),
            trigger_high_low: BTreeMap::new(),
        }
    }
}

impl RecorderSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// A settings document listing every kind with its effective values.
    pub fn expanded(&self) -> Self {
        let mut expanded = self.clone();
        for kind in SensorKind::ALL {
            let entry = expanded.triggers.entry(kind).or_default();
            if entry.wait_seconds.is_none() {
                entry.wait_seconds = Some(kind.default_wait_seconds());
            }
            if entry.variance.is_none() && !kind.records_unconditionally() {
                entry.variance = Some(ChannelSetting::PerChannel(
                    kind.default_variance().to_vec(),
                ));
            }

            if kind.records_unconditionally() {
                continue;
            }
            let (low, high) = kind.default_band();
            let entry = expanded.trigger_high_low.entry(kind).or_default();
            entry
                .low
                .get_or_insert_with(|| ChannelSetting::PerChannel(low.to_vec()));
            entry
                .high
                .get_or_insert_with(|| ChannelSetting::PerChannel(high.to_vec()));
            entry
                .wait_seconds
                .get_or_insert_with(|| kind.default_high_low_wait_seconds());
        }
        expanded
    }
}

impl ConfigStore for RecorderSettings {
    fn is_trigger_recording_enabled(&self) -> bool {
        self.trigger_recording_enabled
    }

    fn is_high_low_recording_enabled(&self) -> bool {
        self.high_low_recording_enabled
    }

    fn is_installed(&self, kind: SensorKind) -> bool {
        self.installed_sensors.contains(&kind)
    }

    fn colour_channels(&self) -> ColourChannels {
        self.colour_channels
    }

    fn trigger_config(&self, kind: SensorKind) -> Result<TriggerConfig, ConfigError> {
        resolve_trigger_config(kind, self.triggers.get(&kind), self.colour_channels)
    }

    fn high_low_config(&self, kind: SensorKind) -> Result<HighLowConfig, ConfigError> {
        resolve_high_low_config(kind, self.trigger_high_low.get(&kind), self.colour_channels)
    }
}

/// Spreads configured values over the kind's channels: one value covers
/// every channel, six values on an RGB colour sensor keep red, green and blue.
fn spread_channels(
    kind: SensorKind,
    raw: Vec<f64>,
    colour: ColourChannels,
) -> Result<Vec<f64>, usize> {
    let arity = kind.arity(colour);
    if raw.len() == 1 {
        Ok(vec![raw[0]; arity])
    } else if raw.len() == arity {
        Ok(raw)
    } else if kind == SensorKind::Colour
        && colour == ColourChannels::Rgb
        && raw.len() == RGB_FROM_SPECTRAL.len() * 2
    {
        Ok(RGB_FROM_SPECTRAL.iter().map(|idx| raw[*idx]).collect())
    } else {
        Err(raw.len())
    }
}

pub fn resolve_trigger_config(
    kind: SensorKind,
    setting: Option<&TriggerSetting>,
    colour: ColourChannels,
) -> Result<TriggerConfig, ConfigError> {
    let enabled = setting.map(|s| s.enabled).unwrap_or(false);
    let wait_seconds = setting
        .and_then(|s| s.wait_seconds)
        .unwrap_or_else(|| kind.default_wait_seconds());
    let arity = kind.arity(colour);

    let variance = if kind.records_unconditionally() {
        Variance::none()
    } else {
        let raw = setting
            .and_then(|s| s.variance.as_ref())
            .map(ChannelSetting::values)
            .unwrap_or_else(|| kind.default_variance().to_vec());
        let thresholds = spread_channels(kind, raw, colour).map_err(|got| {
            ConfigError::VarianceArity {
                kind,
                expected: arity,
                got,
            }
        })?;
        Variance::per_channel(thresholds)
    };

    let config = TriggerConfig {
        enabled,
        variance,
        wait_seconds,
    };
    config.validate(kind, arity)?;
    Ok(config)
}

pub fn resolve_high_low_config(
    kind: SensorKind,
    setting: Option<&HighLowSetting>,
    colour: ColourChannels,
) -> Result<HighLowConfig, ConfigError> {
    let arity = kind.arity(colour);
    let (default_low, default_high) = kind.default_band();
    let spread = |bound: &'static str, value: Option<&ChannelSetting>, default: &[f64]| {
        let raw = value
            .map(ChannelSetting::values)
            .unwrap_or_else(|| default.to_vec());
        spread_channels(kind, raw, colour).map_err(|got| ConfigError::ThresholdArity {
            kind,
            bound,
            expected: arity,
            got,
        })
    };

    let config = HighLowConfig {
        enabled: setting.map(|s| s.enabled).unwrap_or(false),
        low: spread("low", setting.and_then(|s| s.low.as_ref()), default_low)?,
        high: spread("high", setting.and_then(|s| s.high.as_ref()), default_high)?,
        wait_seconds: setting
            .and_then(|s| s.wait_seconds)
            .unwrap_or_else(|| kind.default_high_low_wait_seconds()),
    };
    config.validate(kind, arity)?;
    Ok(config)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub settings_path: PathBuf,
    pub settings: RecorderSettings,
    pub sensor_provider: ProviderKind,
    pub sensor_name: Option<String>,
    pub ip: Option<String>,
    pub restart_backoff_ms: u64,
    pub max_trigger_errors: u32,
    pub error_reset_after_secs: u64,
    pub error_backoff_secs: u64,
}

impl Config {
    pub fn from_env(args: &Args) -> Result<Self> {
        dotenv().ok();

        let database_path = match &args.database {
            Some(path) => path.clone(),
            None => PathBuf::from(env_string(
                "TRIGGER_RECORDER_DATABASE_PATH",
                Some(DEFAULT_DATABASE_PATH.to_string()),
            )?),
        };
        let settings_path = match &args.config {
            Some(path) => path.clone(),
            None => PathBuf::from(env_string(
                "TRIGGER_RECORDER_SETTINGS_PATH",
                Some(DEFAULT_SETTINGS_PATH.to_string()),
            )?),
        };

        let mut settings = if settings_path.exists() {
            RecorderSettings::load(&settings_path)?
        } else {
            tracing::warn!(
                path = %settings_path.display(),
                "trigger-recorder settings file not found; every trigger stays disabled"
            );
            RecorderSettings::default()
        };

        if let Some(raw) = env_optional("TRIGGER_RECORDER_ENABLED") {
            settings.trigger_recording_enabled = parse_bool(&raw)
                .ok_or_else(|| anyhow!("invalid TRIGGER_RECORDER_ENABLED {raw:?}"))?;
        }
        if let Some(raw) = env_optional("TRIGGER_RECORDER_HIGH_LOW_ENABLED") {
            settings.high_low_recording_enabled = parse_bool(&raw)
                .ok_or_else(|| anyhow!("invalid TRIGGER_RECORDER_HIGH_LOW_ENABLED {raw:?}"))?;
        }

        let sensor_provider = match env_optional("TRIGGER_RECORDER_SENSOR_PROVIDER") {
            Some(raw) => raw
                .parse::<ProviderKind>()
                .map_err(|err| anyhow!(err))
                .context("invalid TRIGGER_RECORDER_SENSOR_PROVIDER")?,
            None => ProviderKind::default(),
        };

        let sensor_name = env_optional("TRIGGER_RECORDER_SENSOR_NAME");
        let ip = env_optional("TRIGGER_RECORDER_IP");

        let restart_backoff_ms = env_u64("TRIGGER_RECORDER_RESTART_BACKOFF_MS", Some(5_000))?;
        let max_trigger_errors = env_u32("TRIGGER_RECORDER_MAX_ERRORS", Some(10))?;
        let error_reset_after_secs = env_u64("TRIGGER_RECORDER_ERROR_RESET_SECONDS", Some(60))?;
        let error_backoff_secs = env_u64("TRIGGER_RECORDER_ERROR_BACKOFF_SECONDS", Some(60))?;

        Ok(Self {
            database_path,
            settings_path,
            settings,
            sensor_provider,
            sensor_name,
            ip,
            restart_backoff_ms,
            max_trigger_errors,
            error_reset_after_secs,
            error_backoff_secs,
        })
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            max_errors: self.max_trigger_errors,
            error_reset_after: Duration::from_secs(self.error_reset_after_secs),
            error_backoff: Duration::from_secs(self.error_backoff_secs),
            ..MonitorSettings::default()
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
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

fn env_u32(key: &str, default: Option<u32>) -> Result<u32> {
    let value = env_u64(key, default.map(u64::from))?;
    u32::try_from(value).with_context(|| format!("{key} {value} does not fit in 32 bits"))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
