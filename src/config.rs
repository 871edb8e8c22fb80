//! Configuration structures, normalization, and persistence for bs2ctl
//!
//! The whole application state lives in one JSON document: the control
//! switches, the baseline fan curve, and the `smartControl` block with its
//! tunables and learned arrays. Everything that enters the control loop goes
//! through [`normalize_config`] first, which repairs out-of-range scalars,
//! reconciles array lengths with the curve, and re-derives the blended view.
//!
//! # Normalization rules
//!
//! - Out-of-range scalars are replaced with their defaults (not clamped).
//! - `rampDownLimit` may not exceed `rampUpLimit + 300`.
//! - The per-point offset tables are resized to the curve length, padded
//!   with zeros, and re-clamped into their admissible ranges; the rate
//!   tables are resized to 7 entries and capped.
//! - Normalization is idempotent: a second pass reports no change.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::curve::{self, CurvePoint, DEVICE_MAX_RPM};
use crate::offsets::{blend, clamp_offset_for_point, edge_bounds, rate_cap, RATE_BUCKETS};

/// Valid range and default for the setpoint temperature in Celsius
pub const TARGET_TEMP_RANGE: (i32, i32) = (45, 90);
pub const DEFAULT_TARGET_TEMP: i32 = 68;

/// Valid range and default for the error-term gain
pub const AGGRESSIVENESS_RANGE: (i32, i32) = (1, 10);
pub const DEFAULT_AGGRESSIVENESS: i32 = 5;

/// Valid range and default for the setpoint dead-band in Celsius
pub const HYSTERESIS_RANGE: (i32, i32) = (0, 8);
pub const DEFAULT_HYSTERESIS: i32 = 2;

/// Valid range and default for the minimum effective RPM step
pub const MIN_RPM_CHANGE_RANGE: (i32, i32) = (20, 400);
pub const DEFAULT_MIN_RPM_CHANGE: i32 = 80;

/// Valid range and defaults for the per-tick ramp limits
pub const RAMP_LIMIT_RANGE: (i32, i32) = (50, 1200);
pub const DEFAULT_RAMP_UP_LIMIT: i32 = 220;
pub const DEFAULT_RAMP_DOWN_LIMIT: i32 = 180;
/// rampDownLimit may exceed rampUpLimit by at most this much
pub const RAMP_DOWN_SLACK: i32 = 300;

/// Valid range and default for the learning speed
pub const LEARN_RATE_RANGE: (i32, i32) = (1, 10);
pub const DEFAULT_LEARN_RATE: i32 = 5;

/// Valid range and default for the stability window length in samples
pub const LEARN_WINDOW_RANGE: (usize, usize) = (3, 24);
pub const DEFAULT_LEARN_WINDOW: usize = 4;

/// Valid range and default for the thermal-inertia learn delay in samples
pub const LEARN_DELAY_RANGE: (usize, usize) = (1, 8);
pub const DEFAULT_LEARN_DELAY: usize = 1;

/// Valid range and default for the overheat penalty weight
pub const OVERHEAT_WEIGHT_RANGE: (i32, i32) = (1, 12);
pub const DEFAULT_OVERHEAT_WEIGHT: i32 = 8;

/// Valid range and default for the RPM churn penalty weight
pub const RPM_DELTA_WEIGHT_RANGE: (i32, i32) = (1, 12);
pub const DEFAULT_RPM_DELTA_WEIGHT: i32 = 4;

/// Valid range and default for the high-RPM noise penalty weight
pub const NOISE_WEIGHT_RANGE: (i32, i32) = (0, 12);
pub const DEFAULT_NOISE_WEIGHT: i32 = 4;

/// Valid range and default for the trend feed-forward gain
pub const TREND_GAIN_RANGE: (i32, i32) = (1, 12);
pub const DEFAULT_TREND_GAIN: i32 = 4;

/// Valid range and default for the absolute learned-offset bound
pub const MAX_LEARN_OFFSET_RANGE: (i32, i32) = (100, 2000);
pub const DEFAULT_MAX_LEARN_OFFSET: i32 = 600;

/// Valid range and default for the tick cadence in seconds
pub const TEMP_UPDATE_RATE_RANGE: (u64, u64) = (1, 10);
pub const DEFAULT_TEMP_UPDATE_RATE: u64 = 2;

/// Valid range and default for the raw-sample averaging window
pub const TEMP_SAMPLE_COUNT_RANGE: (usize, usize) = (1, 10);
pub const DEFAULT_TEMP_SAMPLE_COUNT: usize = 3;

pub const DEFAULT_CUSTOM_SPEED_RPM: i32 = 2000;

/// Adaptive control tunables plus the learned state
///
/// The learned arrays are plain positional integer tables: `offsetsHeat` and
/// `offsetsCool` are indexed by curve point, `rateHeat`/`rateCool` by
/// rate-of-change bucket. `blendedOffsets` is derived and kept consistent by
/// the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SmartControl {
    /// Master switch for adaptive control
    pub enabled: bool,
    /// Learning on/off (forced on by normalization)
    pub learning: bool,
    /// Setpoint temperature in Celsius
    pub target_temp: i32,
    /// Gain of the error term
    pub aggressiveness: i32,
    /// Dead-band around the setpoint in Celsius
    pub hysteresis: i32,
    /// Minimum RPM step worth sending to the device
    pub min_rpm_change: i32,
    /// Maximum RPM increase per tick
    pub ramp_up_limit: i32,
    /// Maximum RPM decrease per tick
    pub ramp_down_limit: i32,
    /// Learning speed
    pub learn_rate: i32,
    /// Stability window length in samples
    pub learn_window: usize,
    /// Samples the learner looks backward to compensate thermal inertia
    pub learn_delay: usize,
    /// Overheat penalty weight
    pub overheat_weight: i32,
    /// Penalty weight on RPM churn
    pub rpm_delta_weight: i32,
    /// Penalty weight at high RPM
    pub noise_weight: i32,
    /// Feed-forward gain for temperature deltas
    pub trend_gain: i32,
    /// Absolute bound on any learned offset
    pub max_learn_offset: i32,
    /// Per-point offsets applied while temperature rises or is flat
    pub offsets_heat: Vec<i32>,
    /// Per-point offsets applied while temperature falls
    pub offsets_cool: Vec<i32>,
    /// Element-wise floor mean of heat and cool (derived)
    pub blended_offsets: Vec<i32>,
    /// Rate-bucket biases used while heating
    pub rate_heat: Vec<i32>,
    /// Rate-bucket biases used while cooling
    pub rate_cool: Vec<i32>,
}

impl Default for SmartControl {
    fn default() -> Self {
        SmartControl {
            enabled: true,
            learning: true,
            target_temp: DEFAULT_TARGET_TEMP,
            aggressiveness: DEFAULT_AGGRESSIVENESS,
            hysteresis: DEFAULT_HYSTERESIS,
            min_rpm_change: DEFAULT_MIN_RPM_CHANGE,
            ramp_up_limit: DEFAULT_RAMP_UP_LIMIT,
            ramp_down_limit: DEFAULT_RAMP_DOWN_LIMIT,
            learn_rate: DEFAULT_LEARN_RATE,
            learn_window: DEFAULT_LEARN_WINDOW,
            learn_delay: DEFAULT_LEARN_DELAY,
            overheat_weight: DEFAULT_OVERHEAT_WEIGHT,
            rpm_delta_weight: DEFAULT_RPM_DELTA_WEIGHT,
            noise_weight: DEFAULT_NOISE_WEIGHT,
            trend_gain: DEFAULT_TREND_GAIN,
            max_learn_offset: DEFAULT_MAX_LEARN_OFFSET,
            offsets_heat: Vec::new(),
            offsets_cool: Vec::new(),
            blended_offsets: Vec::new(),
            rate_heat: Vec::new(),
            rate_cool: Vec::new(),
        }
    }
}

impl SmartControl {
    /// Zero every learned array, keeping the lengths consistent with `n`
    /// curve points
    pub fn reset_learning(&mut self, n: usize) {
        self.offsets_heat = vec![0; n];
        self.offsets_cool = vec![0; n];
        self.blended_offsets = vec![0; n];
        self.rate_heat = vec![0; RATE_BUCKETS];
        self.rate_cool = vec![0; RATE_BUCKETS];
    }
}

/// Partial update to the smart-control tunables
///
/// Learned arrays are never patched directly; they change only through the
/// learner or an explicit reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SmartControlPatch {
    pub enabled: Option<bool>,
    pub target_temp: Option<i32>,
    pub aggressiveness: Option<i32>,
    pub hysteresis: Option<i32>,
    pub min_rpm_change: Option<i32>,
    pub ramp_up_limit: Option<i32>,
    pub ramp_down_limit: Option<i32>,
    pub learn_rate: Option<i32>,
    pub learn_window: Option<usize>,
    pub learn_delay: Option<usize>,
    pub overheat_weight: Option<i32>,
    pub rpm_delta_weight: Option<i32>,
    pub noise_weight: Option<i32>,
    pub trend_gain: Option<i32>,
    pub max_learn_offset: Option<i32>,
}

impl SmartControlPatch {
    /// Copy every present field onto `target` (values are validated by the
    /// next normalization pass)
    pub fn apply(&self, target: &mut SmartControl) {
        macro_rules! patch {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field { target.$field = v; })*
            };
        }
        patch!(
            enabled,
            target_temp,
            aggressiveness,
            hysteresis,
            min_rpm_change,
            ramp_up_limit,
            ramp_down_limit,
            learn_rate,
            learn_window,
            learn_delay,
            overheat_weight,
            rpm_delta_weight,
            noise_weight,
            trend_gain,
            max_learn_offset
        );
    }
}

/// Top-level application configuration document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Whether the adaptive loop may command the fan
    pub auto_control: bool,
    /// Baseline fan curve, strictly increasing in temperature
    pub fan_curve: Vec<CurvePoint>,
    /// Tick cadence in seconds
    pub temp_update_rate: u64,
    /// Raw readings averaged per tick
    pub temp_sample_count: usize,
    /// Fixed-RPM override switch
    pub custom_speed_enabled: bool,
    /// Fixed-RPM override value
    pub custom_speed_rpm: i32,
    /// Adaptive control block
    pub smart_control: SmartControl,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            auto_control: true,
            fan_curve: curve::default_curve(),
            temp_update_rate: DEFAULT_TEMP_UPDATE_RATE,
            temp_sample_count: DEFAULT_TEMP_SAMPLE_COUNT,
            custom_speed_enabled: false,
            custom_speed_rpm: DEFAULT_CUSTOM_SPEED_RPM,
            smart_control: SmartControl::default(),
        }
    }
}

fn range_or_default_i32(value: i32, range: (i32, i32), default: i32) -> i32 {
    if value < range.0 || value > range.1 {
        default
    } else {
        value
    }
}

fn range_or_default_usize(value: usize, range: (usize, usize), default: usize) -> usize {
    if value < range.0 || value > range.1 {
        default
    } else {
        value
    }
}

fn range_or_default_u64(value: u64, range: (u64, u64), default: u64) -> u64 {
    if value < range.0 || value > range.1 {
        default
    } else {
        value
    }
}

/// Normalize the smart-control block against the given curve
///
/// Returns true if anything was modified. Idempotent.
pub fn normalize_smart_control(sc: &mut SmartControl, curve: &[CurvePoint]) -> bool {
    let before = sc.clone();

    sc.learning = true;
    sc.target_temp = range_or_default_i32(sc.target_temp, TARGET_TEMP_RANGE, DEFAULT_TARGET_TEMP);
    sc.aggressiveness =
        range_or_default_i32(sc.aggressiveness, AGGRESSIVENESS_RANGE, DEFAULT_AGGRESSIVENESS);
    sc.hysteresis = range_or_default_i32(sc.hysteresis, HYSTERESIS_RANGE, DEFAULT_HYSTERESIS);
    sc.min_rpm_change =
        range_or_default_i32(sc.min_rpm_change, MIN_RPM_CHANGE_RANGE, DEFAULT_MIN_RPM_CHANGE);
    sc.ramp_up_limit =
        range_or_default_i32(sc.ramp_up_limit, RAMP_LIMIT_RANGE, DEFAULT_RAMP_UP_LIMIT);
    sc.ramp_down_limit =
        range_or_default_i32(sc.ramp_down_limit, RAMP_LIMIT_RANGE, DEFAULT_RAMP_DOWN_LIMIT);
    if sc.ramp_down_limit > sc.ramp_up_limit + RAMP_DOWN_SLACK {
        sc.ramp_down_limit = sc.ramp_up_limit + RAMP_DOWN_SLACK;
    }
    sc.learn_rate = range_or_default_i32(sc.learn_rate, LEARN_RATE_RANGE, DEFAULT_LEARN_RATE);
    sc.learn_window =
        range_or_default_usize(sc.learn_window, LEARN_WINDOW_RANGE, DEFAULT_LEARN_WINDOW);
    sc.learn_delay = range_or_default_usize(sc.learn_delay, LEARN_DELAY_RANGE, DEFAULT_LEARN_DELAY);
    sc.overheat_weight =
        range_or_default_i32(sc.overheat_weight, OVERHEAT_WEIGHT_RANGE, DEFAULT_OVERHEAT_WEIGHT);
    sc.rpm_delta_weight = range_or_default_i32(
        sc.rpm_delta_weight,
        RPM_DELTA_WEIGHT_RANGE,
        DEFAULT_RPM_DELTA_WEIGHT,
    );
    sc.noise_weight =
        range_or_default_i32(sc.noise_weight, NOISE_WEIGHT_RANGE, DEFAULT_NOISE_WEIGHT);
    sc.trend_gain = range_or_default_i32(sc.trend_gain, TREND_GAIN_RANGE, DEFAULT_TREND_GAIN);
    sc.max_learn_offset = range_or_default_i32(
        sc.max_learn_offset,
        MAX_LEARN_OFFSET_RANGE,
        DEFAULT_MAX_LEARN_OFFSET,
    );

    let n = curve.len();

    // A config whose curve changed length arrives here with stale arrays.
    // Seed heat/cool from the blended view when both are absent, then pad
    // or truncate everything to the curve length.
    if sc.offsets_heat.is_empty() && sc.offsets_cool.is_empty() && !sc.blended_offsets.is_empty() {
        sc.offsets_heat = sc.blended_offsets.clone();
        sc.offsets_cool = sc.blended_offsets.clone();
    }
    sc.offsets_heat.resize(n, 0);
    sc.offsets_cool.resize(n, 0);

    let (edge_min, edge_max) = edge_bounds(curve);
    for (i, p) in curve.iter().enumerate() {
        sc.offsets_heat[i] = clamp_offset_for_point(
            sc.offsets_heat[i],
            p.rpm,
            edge_min,
            edge_max,
            sc.max_learn_offset,
        );
        sc.offsets_cool[i] = clamp_offset_for_point(
            sc.offsets_cool[i],
            p.rpm,
            edge_min,
            edge_max,
            sc.max_learn_offset,
        );
    }

    sc.rate_heat.resize(RATE_BUCKETS, 0);
    sc.rate_cool.resize(RATE_BUCKETS, 0);
    let cap = rate_cap(sc.max_learn_offset);
    for v in sc.rate_heat.iter_mut().chain(sc.rate_cool.iter_mut()) {
        *v = (*v).clamp(-cap, cap);
    }

    sc.blended_offsets = blend(&sc.offsets_heat, &sc.offsets_cool);
    for (i, p) in curve.iter().enumerate() {
        sc.blended_offsets[i] = clamp_offset_for_point(
            sc.blended_offsets[i],
            p.rpm,
            edge_min,
            edge_max,
            sc.max_learn_offset,
        );
    }

    *sc != before
}

/// Normalize the whole configuration document
///
/// Repairs the curve (sorted, unique temperatures, device-range RPMs), the
/// app-level scalars, and the smart-control block. Returns true if anything
/// changed; the caller should re-persist in that case.
pub fn normalize_config(cfg: &mut AppConfig) -> bool {
    let mut changed = curve::sanitize_curve(&mut cfg.fan_curve);

    let rate = range_or_default_u64(
        cfg.temp_update_rate,
        TEMP_UPDATE_RATE_RANGE,
        DEFAULT_TEMP_UPDATE_RATE,
    );
    if rate != cfg.temp_update_rate {
        cfg.temp_update_rate = rate;
        changed = true;
    }
    let samples = range_or_default_usize(
        cfg.temp_sample_count,
        TEMP_SAMPLE_COUNT_RANGE,
        DEFAULT_TEMP_SAMPLE_COUNT,
    );
    if samples != cfg.temp_sample_count {
        cfg.temp_sample_count = samples;
        changed = true;
    }
    let rpm = cfg.custom_speed_rpm.clamp(0, DEVICE_MAX_RPM);
    if rpm != cfg.custom_speed_rpm {
        cfg.custom_speed_rpm = rpm;
        changed = true;
    }

    changed |= normalize_smart_control(&mut cfg.smart_control, &cfg.fan_curve);
    changed
}

/// Errors from loading or saving the configuration document
#[derive(Debug)]
pub enum ConfigError {
    /// I/O failure reading or writing the file
    Io(io::Error),
    /// The document is not valid JSON
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "config parse error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// Load and normalize the configuration
///
/// A missing file yields the defaults with `changed = true` so the caller
/// persists them. Missing fields are filled from defaults by serde; any
/// structural damage is repaired by normalization.
pub fn load_config(path: &Path) -> Result<(AppConfig, bool), ConfigError> {
    if !path.exists() {
        let mut cfg = AppConfig::default();
        normalize_config(&mut cfg);
        return Ok((cfg, true));
    }
    let text = fs::read_to_string(path)?;
    let mut cfg: AppConfig =
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let changed = normalize_config(&mut cfg);
    Ok((cfg, changed))
}

/// Persist the configuration atomically (write to a sibling temp file, then
/// rename over the target)
pub fn save_config(path: &Path, cfg: &AppConfig) -> Result<(), ConfigError> {
    let json =
        serde_json::to_string_pretty(cfg).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Validate a status interval argument (100ms - 60s)
pub fn validate_status_interval(s: &str) -> Result<u64, String> {
    let val: u64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if val < 100 {
        return Err(format!(
            "Status interval {} ms is too small (minimum: 100 ms)",
            val
        ));
    }
    if val > 60_000 {
        return Err(format!(
            "Status interval {} ms is too large (maximum: 60000 ms)",
            val
        ));
    }
    Ok(val)
}

/// Adaptive fan controller daemon for BS2/BS2 PRO cooling pads
#[derive(Parser, Debug, Clone)]
#[command(name = "bs2ctl")]
#[command(version = "0.1.0")]
#[command(about = "Adaptive fan controller daemon for BS2/BS2 PRO cooling pads", long_about = None)]
pub struct Args {
    /// Path to the configuration document
    #[arg(long, short = 'c', default_value = "bs2ctl.json")]
    pub config: PathBuf,

    /// Status output interval in milliseconds
    #[arg(long = "status-interval", default_value = "1000", value_parser = validate_status_interval)]
    pub status_interval_ms: u64,

    /// Root of the hwmon sysfs tree (overridable for testing)
    #[arg(long = "hwmon-root", default_value = "/sys/class/hwmon")]
    pub hwmon_root: PathBuf,

    /// Enable verbose debug logging to stderr
    #[arg(long, short)]
    pub verbose: bool,
}
