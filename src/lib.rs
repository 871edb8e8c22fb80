//! bs2ctl library exports for testing and external use
//!
//! This module provides public exports of all bs2ctl components for use in
//! tests and potential external integrations. All core functionality is
//! exposed through well-defined interfaces.
//!
//! # Module Organization
//!
//! - **config**: configuration document, normalization, persistence, CLI
//! - **curve**: baseline fan curve and piecewise-linear evaluation
//! - **offsets**: learned offset store operations and invariants
//! - **target**: target RPM calculation
//! - **ramp**: asymmetric ramp-rate limiting between ticks
//! - **learner**: stability-gated learning of offsets and rate biases
//! - **driver**: the control loop tying everything together
//! - **temp_monitor**: hwmon temperature acquisition
//! - **transport**: fan command sink toward the HID bridge
//! - **output**: NDJSON telemetry records
//! - **signals**: SIGTERM/SIGINT/SIGUSR1 handling
//!
//! # Testing
//!
//! The control pipeline is pure integer arithmetic and can be driven
//! deterministically:
//!
//! ```rust
//! use bs2ctl::{compute_target, default_curve, normalize_smart_control, SmartControl};
//!
//! let curve = default_curve();
//! let mut sc = SmartControl::default();
//! normalize_smart_control(&mut sc, &curve);
//! // Flat at 50 C, far under the setpoint: the curve floor governs
//! assert_eq!(compute_target(50, 50, &curve, &sc, 4000), 1800);
//! ```
//!
//! Key properties the test suite leans on:
//!
//! - Learned arrays always match the curve length; rate tables hold 7 entries
//! - Every offset keeps its point inside the curve's endpoint envelope
//! - The effective curve is non-decreasing in RPM
//! - Consecutive emissions differ by at most the ramp limits
//! - Changes under the minimum RPM step are never submitted

pub mod config;
pub mod curve;
pub mod driver;
pub mod learner;
pub mod offsets;
pub mod output;
pub mod ramp;
pub mod signals;
pub mod target;
pub mod temp_monitor;
pub mod transport;

pub use config::{
    load_config, normalize_config, normalize_smart_control, save_config, AppConfig, Args,
    ConfigError, SmartControl, SmartControlPatch,
};

pub use curve::{default_curve, evaluate, sanitize_curve, validate_curve, CurvePoint, DEVICE_MAX_RPM};

pub use offsets::{
    blend, clamp_offset_for_point, edge_bounds, effective_curve, rate_bucket, rate_cap,
    RATE_BUCKETS,
};

pub use target::{compute_target, select_offsets};

pub use ramp::apply_ramp;

pub use learner::{
    learn_tick, nearest_curve_index, raw_score, scale, window_is_stable, LearnInput,
    NOISE_FLOOR_RPM, SCORE_DEAD_BAND,
};

pub use driver::{ControlLoop, ControlMsg, ControlState, TickReport};

pub use temp_monitor::{
    HwmonTempSource, ScriptedTempSource, SensorError, TempReading, TempSource,
};

pub use transport::{FanTransport, RecordingTransport, StdoutTransport, TransportError};

pub use output::{ErrorOutput, OutputWriter, StatusOutput};

pub use signals::{install_handlers, SignalState};
