use std::{
    path::PathBuf,
    process::Command,
};

use crate::error::SampleError;

pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";
pub const DEFAULT_VCGENCMD: &str = "/opt/vc/bin/vcgencmd";

/// Something that yields one reading per call. Implementations block.
pub trait SampleSource: Send + Sync {
    fn read(&self) -> Result<f64, SampleError>;
}

/// CPU temperature from a sysfs thermal zone, reported in millidegrees.
#[derive(Debug, Clone)]
pub struct ThermalZone {
    pub path: PathBuf,
}

impl ThermalZone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ThermalZone { path: path.into() }
    }
}

impl SampleSource for ThermalZone {
    fn read(&self) -> Result<f64, SampleError> {
        let data = std::fs::read_to_string(&self.path).map_err(|error| SampleError::Io {
            source_name: self.path.display().to_string(),
            error,
        })?;
        parse_millidegrees(&data)
    }
}

/// GPU temperature from the Raspberry Pi `vcgencmd measure_temp` tool.
#[derive(Debug, Clone)]
pub struct VcGenCmd {
    pub program: PathBuf,
}

impl VcGenCmd {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        VcGenCmd {
            program: program.into(),
        }
    }
}

impl SampleSource for VcGenCmd {
    fn read(&self) -> Result<f64, SampleError> {
        let output = Command::new(&self.program)
            .arg("measure_temp")
            .output()
            .map_err(|error| SampleError::Io {
                source_name: self.program.display().to_string(),
                error,
            })?;
        if !output.status.success() {
            return Err(SampleError::Parse {
                output: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        parse_measure_temp(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_millidegrees(data: &str) -> Result<f64, SampleError> {
    let trimmed = data.trim();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|millis| millis.is_finite())
        .map(|millis| millis / 1000.0)
        .ok_or_else(|| SampleError::Parse {
            output: trimmed.to_string(),
        })
}

// "temp=41.2'C"
fn parse_measure_temp(data: &str) -> Result<f64, SampleError> {
    let trimmed = data.trim();
    trimmed
        .strip_prefix("temp=")
        .and_then(|s| s.strip_suffix("'C"))
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|celsius| celsius.is_finite())
        .ok_or_else(|| SampleError::Parse {
            output: trimmed.to_string(),
        })
}
