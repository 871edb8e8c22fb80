//! Temperature acquisition from hwmon sysfs
//!
//! Discovers CPU and GPU thermal sensors under `/sys/class/hwmon` and turns
//! them into per-tick readings for the control loop. The loop consumes the
//! hotter of the two valid readings; sensor failures are reported through
//! the reading's `success` flag and recovered by the driver, never here.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// hwmon names accepted as CPU temperature sources
pub const CPU_HWMON_NAMES: &[&str] = &["k10temp", "coretemp", "zenpower"];

/// hwmon names accepted as GPU temperature sources
pub const GPU_HWMON_NAMES: &[&str] = &["amdgpu", "nouveau"];

/// One temperature sample set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempReading {
    /// CPU temperature in Celsius (0 when unavailable)
    pub cpu: i32,
    /// GPU temperature in Celsius (0 when unavailable)
    pub gpu: i32,
    /// Hotter of the valid readings (0 when none are valid)
    pub max: i32,
    /// Whether at least one sensor produced a value
    pub success: bool,
    /// Failure description when `success` is false
    pub error: Option<String>,
}

impl TempReading {
    /// Build a reading from raw per-sensor values, computing `max` and the
    /// success flag
    pub fn from_sensors(cpu: i32, gpu: i32) -> Self {
        let max = match (cpu > 0, gpu > 0) {
            (true, true) => cpu.max(gpu),
            (true, false) => cpu,
            (false, true) => gpu,
            (false, false) => 0,
        };
        TempReading {
            cpu,
            gpu,
            max,
            success: max > 0,
            error: None,
        }
    }

    /// A failed sample set
    pub fn failed(message: impl Into<String>) -> Self {
        TempReading {
            cpu: 0,
            gpu: 0,
            max: 0,
            success: false,
            error: Some(message.into()),
        }
    }
}

/// Source of temperature sample sets, one per control tick
pub trait TempSource {
    fn read(&mut self) -> TempReading;
}

/// Errors from hwmon discovery
#[derive(Debug)]
pub enum SensorError {
    /// No usable hwmon device was found
    NoDevice(String),
    /// I/O error walking the sysfs tree
    Io(io::Error),
}

impl std::fmt::Display for SensorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorError::NoDevice(s) => write!(f, "no hwmon temperature source: {}", s),
            SensorError::Io(e) => write!(f, "hwmon I/O error: {}", e),
        }
    }
}

impl std::error::Error for SensorError {}

impl From<io::Error> for SensorError {
    fn from(e: io::Error) -> Self {
        SensorError::Io(e)
    }
}

/// hwmon-backed temperature source
///
/// Sensor files are resolved once at construction; a vanished file turns
/// into a failed reading rather than an error, and the driver's reuse window
/// bridges the gap.
#[derive(Debug)]
pub struct HwmonTempSource {
    cpu_input: Option<PathBuf>,
    gpu_input: Option<PathBuf>,
}

impl HwmonTempSource {
    /// Discover sensors under the given hwmon root
    ///
    /// # Errors
    /// Returns an error when neither a CPU nor a GPU sensor is found.
    pub fn discover(root: &Path) -> Result<Self, SensorError> {
        let cpu_input = find_temp_input(root, CPU_HWMON_NAMES)?;
        let gpu_input = find_temp_input(root, GPU_HWMON_NAMES)?;
        if cpu_input.is_none() && gpu_input.is_none() {
            return Err(SensorError::NoDevice(format!(
                "no known sensor names under {:?}",
                root
            )));
        }
        Ok(HwmonTempSource {
            cpu_input,
            gpu_input,
        })
    }

    /// Build a source from explicit sensor file paths (for testing)
    pub fn with_paths(cpu_input: Option<PathBuf>, gpu_input: Option<PathBuf>) -> Self {
        HwmonTempSource {
            cpu_input,
            gpu_input,
        }
    }
}

impl TempSource for HwmonTempSource {
    fn read(&mut self) -> TempReading {
        let cpu = self
            .cpu_input
            .as_deref()
            .and_then(|p| read_millidegrees(p))
            .unwrap_or(0);
        let gpu = self
            .gpu_input
            .as_deref()
            .and_then(|p| read_millidegrees(p))
            .unwrap_or(0);
        if cpu == 0 && gpu == 0 {
            return TempReading::failed("all hwmon sensors failed to read");
        }
        TempReading::from_sensors(cpu, gpu)
    }
}

/// Scripted temperature source for tests and replay
///
/// Yields queued readings in order, then repeats the last one (or reports
/// failure if the script ran dry from the start).
#[derive(Debug, Default)]
pub struct ScriptedTempSource {
    readings: std::collections::VecDeque<TempReading>,
    last: Option<TempReading>,
}

impl ScriptedTempSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a sequence of plain CPU temperatures
    pub fn from_temps(temps: &[i32]) -> Self {
        let mut source = Self::new();
        for &t in temps {
            source.push(TempReading::from_sensors(t, 0));
        }
        source
    }

    pub fn push(&mut self, reading: TempReading) {
        self.readings.push_back(reading);
    }

    pub fn remaining(&self) -> usize {
        self.readings.len()
    }
}

impl TempSource for ScriptedTempSource {
    fn read(&mut self) -> TempReading {
        match self.readings.pop_front() {
            Some(r) => {
                self.last = Some(r.clone());
                r
            }
            None => self
                .last
                .clone()
                .unwrap_or_else(|| TempReading::failed("script exhausted")),
        }
    }
}

/// Find the first `temp*_input` file of an hwmon device whose name matches
/// one of `names`
fn find_temp_input(root: &Path, names: &[&str]) -> Result<Option<PathBuf>, SensorError> {
    let entries = match fs::read_dir(root) {
        Ok(e) => e,
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let dir = entry?.path();
        let name = match fs::read_to_string(dir.join("name")) {
            Ok(n) => n.trim().to_string(),
            Err(_) => continue,
        };
        if !names.contains(&name.as_str()) {
            continue;
        }
        for idx in 1..=9 {
            let candidate = dir.join(format!("temp{}_input", idx));
            if candidate.exists() {
                return Ok(Some(candidate));
            }
        }
    }
    Ok(None)
}

/// Read a millidegree sysfs value, returning whole degrees
fn read_millidegrees(path: &Path) -> Option<i32> {
    let text = fs::read_to_string(path).ok()?;
    let value: i32 = text.trim().parse().ok()?;
    Some(value / 1000)
}
