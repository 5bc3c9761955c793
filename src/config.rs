use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::{Duration, Instant, SystemTime},
};

use chrono::format::{Item, StrftimeItems};
use ::config::{Environment, File};
use serde::Deserialize;

use crate::{
    error::ConfigError,
    sensor::{DEFAULT_THERMAL_ZONE, DEFAULT_VCGENCMD},
};

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "THERMAL";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub expiry_hours: u64,
    pub snapshot_interval_seconds: u64,
    pub sample_interval_minutes: u64,
    pub sweep_interval_seconds: u64,
    pub snapshot_file: PathBuf,
    pub listen_address: String,
    pub time_key_format: String,
    pub sensor: SensorKind,
    pub thermal_zone_path: PathBuf,
    pub vcgencmd_path: PathBuf,
    pub sample_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Cpu,
    Gpu,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            expiry_hours: 24,
            snapshot_interval_seconds: 120,
            sample_interval_minutes: 5,
            sweep_interval_seconds: 120,
            snapshot_file: PathBuf::from("cache.dat"),
            listen_address: "0.0.0.0:18181".to_string(),
            time_key_format: "%Y-%m-%d %H:%M:%S".to_string(),
            sensor: SensorKind::Cpu,
            thermal_zone_path: PathBuf::from(DEFAULT_THERMAL_ZONE),
            vcgencmd_path: PathBuf::from(DEFAULT_VCGENCMD),
            sample_timeout_seconds: None,
        }
    }
}

/// Command line flags, `--<parameter> <value>`.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub enum Parameter {
    Config,
    ExpiryHours,
    SnapshotIntervalSeconds,
    SampleIntervalMinutes,
    SweepIntervalSeconds,
    SnapshotFile,
    ListenAddress,
    TimeKeyFormat,
    Sensor,
    ThermalZonePath,
    VcgencmdPath,
    SampleTimeoutSeconds,
}

impl Parameter {
    pub fn deserialize(s: &str) -> Result<Self, ConfigError> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "config" => Ok(Parameter::Config),
            "expiry_hours" => Ok(Parameter::ExpiryHours),
            "snapshot_interval_seconds" => Ok(Parameter::SnapshotIntervalSeconds),
            "sample_interval_minutes" => Ok(Parameter::SampleIntervalMinutes),
            "sweep_interval_seconds" => Ok(Parameter::SweepIntervalSeconds),
            "snapshot_file" => Ok(Parameter::SnapshotFile),
            "listen_address" => Ok(Parameter::ListenAddress),
            "time_key_format" => Ok(Parameter::TimeKeyFormat),
            "sensor" => Ok(Parameter::Sensor),
            "thermal_zone_path" => Ok(Parameter::ThermalZonePath),
            "vcgencmd_path" => Ok(Parameter::VcgencmdPath),
            "sample_timeout_seconds" => Ok(Parameter::SampleTimeoutSeconds),
            _ => Err(ConfigError::InvalidArgument(format!("--{}", s))),
        }
    }

    pub fn serialize(&self) -> &'static str {
        match self {
            Parameter::Config => "config",
            Parameter::ExpiryHours => "expiry_hours",
            Parameter::SnapshotIntervalSeconds => "snapshot_interval_seconds",
            Parameter::SampleIntervalMinutes => "sample_interval_minutes",
            Parameter::SweepIntervalSeconds => "sweep_interval_seconds",
            Parameter::SnapshotFile => "snapshot_file",
            Parameter::ListenAddress => "listen_address",
            Parameter::TimeKeyFormat => "time_key_format",
            Parameter::Sensor => "sensor",
            Parameter::ThermalZonePath => "thermal_zone_path",
            Parameter::VcgencmdPath => "vcgencmd_path",
            Parameter::SampleTimeoutSeconds => "sample_timeout_seconds",
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct Arguments {
    pub config_file: Option<PathBuf>,
    pub overrides: Vec<(Parameter, String)>,
}

/// Parses everything after the program name.
pub fn parse_args<I>(args: I) -> Result<Arguments, ConfigError>
where
    I: IntoIterator<Item = String>,
{
    let mut arguments = Arguments::default();
    let mut current_key = None;
    for arg in args {
        if let Some(key) = current_key.take() {
            match key {
                Parameter::Config => arguments.config_file = Some(PathBuf::from(arg)),
                key => arguments.overrides.push((key, arg)),
            }
        } else if let Some(name) = arg.strip_prefix("--") {
            current_key = Some(Parameter::deserialize(name)?);
        } else {
            return Err(ConfigError::InvalidArgument(arg));
        }
    }
    if let Some(key) = current_key {
        return Err(ConfigError::MissingValue(key.serialize().to_string()));
    }
    Ok(arguments)
}

impl Config {
    /// Defaults, then the config file, then `THERMAL_*` variables, then flags.
    pub fn load(arguments: &Arguments) -> Result<Self, ConfigError> {
        let file = arguments
            .config_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut builder = ::config::Config::builder()
            .add_source(File::from(file).required(arguments.config_file.is_some()))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        for (parameter, value) in &arguments.overrides {
            builder = builder.set_override(parameter.serialize(), value.as_str())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("expiry_hours", self.expiry_hours),
            ("snapshot_interval_seconds", self.snapshot_interval_seconds),
            ("sample_interval_minutes", self.sample_interval_minutes),
            ("sweep_interval_seconds", self.sweep_interval_seconds),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Zero { key });
            }
        }
        if self.sample_timeout_seconds == Some(0) {
            return Err(ConfigError::Zero {
                key: "sample_timeout_seconds",
            });
        }

        // Every period is added to a clock reading at some point
        let periods = [
            ("expiry_hours", self.expiry_hours.checked_mul(60 * 60)),
            ("snapshot_interval_seconds", Some(self.snapshot_interval_seconds)),
            ("sample_interval_minutes", self.sample_interval_minutes.checked_mul(60)),
            ("sweep_interval_seconds", Some(self.sweep_interval_seconds)),
            ("sample_timeout_seconds", Some(self.sample_timeout_seconds.unwrap_or(1))),
        ];
        for (key, seconds) in periods {
            let fits = seconds.map(Duration::from_secs).is_some_and(|period| {
                Instant::now().checked_add(period).is_some()
                    && SystemTime::now().checked_add(period).is_some()
            });
            if !fits {
                return Err(ConfigError::TooLarge { key });
            }
        }

        self.socket_addr()?;

        if self.time_key_format.is_empty()
            || StrftimeItems::new(&self.time_key_format).any(|item| matches!(item, Item::Error))
        {
            return Err(ConfigError::TimeKeyFormat(self.time_key_format.clone()));
        }
        Ok(())
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_hours.saturating_mul(60 * 60))
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_seconds)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_minutes.saturating_mul(60))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn sample_timeout(&self) -> Option<Duration> {
        self.sample_timeout_seconds.map(Duration::from_secs)
    }

    /// Accepts a bare `:port` as shorthand for all interfaces.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let address = if self.listen_address.starts_with(':') {
            format!("0.0.0.0{}", self.listen_address)
        } else {
            self.listen_address.clone()
        };
        address
            .parse()
            .map_err(|_| ConfigError::ListenAddress(self.listen_address.clone()))
    }

    /// Whether keys produced by `time_key_format` sort in time order, which
    /// the table view relies on. True for formats led by the full year.
    pub fn time_key_is_chronological(&self) -> bool {
        self.time_key_format.starts_with("%Y") || self.time_key_format.starts_with("%F")
    }

    /// Relative snapshot paths live next to `base`, normally the executable's directory.
    pub fn snapshot_path(&self, base: Option<&Path>) -> PathBuf {
        match base {
            Some(base) if self.snapshot_file.is_relative() => base.join(&self.snapshot_file),
            _ => self.snapshot_file.clone(),
        }
    }
}
