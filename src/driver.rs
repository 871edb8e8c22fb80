//! Control loop driver
//!
//! Owns the per-tick mutable state and ties the pipeline together: drain
//! inbound control messages, acquire and average a temperature sample,
//! dispatch on the loop state, compute and ramp-limit the target, emit the
//! command when it clears the dead-band, run the learner, and report what
//! happened so the caller can persist and publish telemetry.
//!
//! The loop is single-threaded: one [`ControlLoop::tick`] call per cadence
//! period, never overlapping. External sources (UI, bridge) post messages
//! into the mpsc queue; they are drained at the start of a tick, so one tick
//! always sees one consistent configuration snapshot. A transport failure is
//! reported but never aborts the tick; the learner scores the attempted
//! value.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::config::{normalize_config, AppConfig, SmartControlPatch, TEMP_SAMPLE_COUNT_RANGE};
use crate::curve::{CurvePoint, DEVICE_MAX_RPM};
use crate::learner::{learn_tick, LearnInput};
use crate::ramp::apply_ramp;
use crate::target::compute_target;
use crate::temp_monitor::TempSource;
use crate::transport::FanTransport;

/// Extra slots kept in the averaged-temperature FIFO beyond what the
/// learner's window and delay require
const SAMPLE_FIFO_SLACK: usize = 4;

/// Capacity of the inbound control message queue
const CONTROL_QUEUE_DEPTH: usize = 32;

/// What the loop is doing this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    /// Adaptive control disabled; the fan is left alone
    Idle,
    /// Adaptive control active
    Active,
    /// A fixed user RPM overrides the loop
    SuspendedByCustomRpm,
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlState::Idle => write!(f, "idle"),
            ControlState::Active => write!(f, "active"),
            ControlState::SuspendedByCustomRpm => write!(f, "suspendedByCustomRpm"),
        }
    }
}

/// Inbound control messages from the UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlMsg {
    /// Enable or disable adaptive control
    SetAutoControl { enabled: bool },
    /// Enable or disable the fixed-RPM override
    SetCustomSpeed { enabled: bool, rpm: i32 },
    /// Replace the baseline curve
    SetFanCurve { points: Vec<CurvePoint> },
    /// Patch the smart-control tunables
    UpdateSmartControl { patch: SmartControlPatch },
    /// Zero all learned state
    ResetLearning,
}

/// Outcome of one tick
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// State the tick ran in
    pub state: Option<ControlState>,
    /// Averaged temperature used this tick
    pub avg_temp: i32,
    /// Raw calculator output (0 outside the active state)
    pub target_rpm: i32,
    /// Ramp-limited value carried forward as the last target
    pub emitted_rpm: i32,
    /// RPM actually submitted to the transport, when one was
    pub command_sent: Option<i32>,
    /// Transport failure description, when submission failed
    pub transport_error: Option<String>,
    /// Whether the learner changed the learned state
    pub learned_changed: bool,
    /// Whether the configuration needs re-persisting
    pub config_changed: bool,
    /// Sensor failures have exceeded the reuse window
    pub sensor_warning: bool,
}

/// The adaptive control loop
pub struct ControlLoop<S: TempSource, T: FanTransport> {
    config: AppConfig,
    source: S,
    transport: T,
    rx: mpsc::Receiver<ControlMsg>,
    /// Raw per-tick readings feeding the averaging window
    raw_temps: VecDeque<i32>,
    /// Averaged temperatures, oldest first
    recent_avg_temps: VecDeque<i32>,
    last_avg_temp: i32,
    last_target_rpm: i32,
    /// Custom RPM already submitted while suspended
    last_custom_sent: Option<i32>,
    /// Consecutive failed sensor reads
    sensor_failures: usize,
    last_good_temp: Option<i32>,
    config_dirty: bool,
}

impl<S: TempSource, T: FanTransport> ControlLoop<S, T> {
    /// Build the loop around a normalized configuration
    ///
    /// Returns the loop and the sender half of its control message queue.
    pub fn new(mut config: AppConfig, source: S, transport: T) -> (Self, mpsc::Sender<ControlMsg>) {
        let dirty = normalize_config(&mut config);
        let (tx, rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        let driver = ControlLoop {
            config,
            source,
            transport,
            rx,
            raw_temps: VecDeque::new(),
            recent_avg_temps: VecDeque::new(),
            last_avg_temp: 0,
            last_target_rpm: 0,
            last_custom_sent: None,
            sensor_failures: 0,
            last_good_temp: None,
            config_dirty: dirty,
        };
        (driver, tx)
    }

    /// Current configuration snapshot
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Last device-acknowledged RPM, when the transport knows it
    pub fn current_rpm(&self) -> Option<i32> {
        self.transport.current_rpm()
    }

    /// Last emitted target
    pub fn last_target_rpm(&self) -> i32 {
        self.last_target_rpm
    }

    /// Latest averaged temperature
    pub fn last_avg_temp(&self) -> i32 {
        self.last_avg_temp
    }

    /// State the next tick would run in
    pub fn control_state(&self) -> ControlState {
        if self.config.custom_speed_enabled {
            ControlState::SuspendedByCustomRpm
        } else if self.config.smart_control.enabled && self.config.auto_control {
            ControlState::Active
        } else {
            ControlState::Idle
        }
    }

    /// Run one end-to-end tick
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        self.drain_messages();
        report.config_changed = self.config_dirty;
        self.config_dirty = false;

        let avg = self.sample(&mut report);
        let first_sample = self.recent_avg_temps.is_empty();
        self.recent_avg_temps.push_back(avg);
        let fifo_cap = self.config.smart_control.learn_window
            + self.config.smart_control.learn_delay
            + SAMPLE_FIFO_SLACK;
        while self.recent_avg_temps.len() > fifo_cap {
            self.recent_avg_temps.pop_front();
        }
        if first_sample {
            self.last_avg_temp = avg;
        }
        report.avg_temp = avg;

        let state = self.control_state();
        report.state = Some(state);

        match state {
            ControlState::Idle => {
                self.last_custom_sent = None;
                self.last_avg_temp = avg;
                report.emitted_rpm = self.last_target_rpm;
            }
            ControlState::SuspendedByCustomRpm => {
                // The override forces the loop out of auto control
                if self.config.auto_control {
                    self.config.auto_control = false;
                    self.config_dirty = true;
                }
                let rpm = self.config.custom_speed_rpm.clamp(0, DEVICE_MAX_RPM);
                if self.last_custom_sent != Some(rpm) {
                    match self.transport.set_target_rpm(rpm as u16) {
                        Ok(()) => {
                            self.last_custom_sent = Some(rpm);
                            report.command_sent = Some(rpm);
                        }
                        Err(e) => report.transport_error = Some(e.to_string()),
                    }
                }
                self.last_avg_temp = avg;
                report.emitted_rpm = self.last_target_rpm;
            }
            ControlState::Active => {
                self.last_custom_sent = None;
                self.run_active_tick(avg, &mut report);
            }
        }

        report.config_changed |= self.config_dirty || report.learned_changed;
        self.config_dirty = false;
        report
    }

    fn run_active_tick(&mut self, avg: i32, report: &mut TickReport) {
        if self.config.fan_curve.is_empty() {
            // No curve, no control: leave the fan in its current state
            self.last_avg_temp = avg;
            report.emitted_rpm = self.last_target_rpm;
            return;
        }

        let sc = &self.config.smart_control;
        let target = compute_target(
            avg,
            self.last_avg_temp,
            &self.config.fan_curve,
            sc,
            DEVICE_MAX_RPM,
        );
        let emitted = apply_ramp(
            target,
            self.last_target_rpm,
            sc.ramp_up_limit,
            sc.ramp_down_limit,
        );
        report.target_rpm = target;
        report.emitted_rpm = emitted;

        if (emitted - self.last_target_rpm).abs() >= sc.min_rpm_change {
            match self.transport.set_target_rpm(emitted as u16) {
                Ok(()) => report.command_sent = Some(emitted),
                Err(e) => report.transport_error = Some(e.to_string()),
            }
        }

        let recent: Vec<i32> = self.recent_avg_temps.iter().copied().collect();
        report.learned_changed = learn_tick(
            &mut self.config.smart_control,
            &LearnInput {
                avg_temp: avg,
                prev_temp: self.last_avg_temp,
                target_rpm: emitted,
                last_target_rpm: self.last_target_rpm,
                recent_temps: &recent,
                curve: &self.config.fan_curve,
            },
        );

        self.last_avg_temp = avg;
        self.last_target_rpm = emitted;
    }

    /// Read one sample set and fold it into the averaging window
    ///
    /// A failed read reuses the last good temperature; once failures outlast
    /// the sample window the report carries a warning, but the loop keeps
    /// running on the stale value.
    fn sample(&mut self, report: &mut TickReport) -> i32 {
        let reading = self.source.read();
        let temp = if reading.success {
            self.sensor_failures = 0;
            self.last_good_temp = Some(reading.max);
            reading.max
        } else {
            self.sensor_failures += 1;
            if self.sensor_failures > self.config.temp_sample_count {
                report.sensor_warning = true;
            }
            self.last_good_temp.unwrap_or(0)
        };

        self.raw_temps.push_back(temp);
        while self.raw_temps.len() > TEMP_SAMPLE_COUNT_RANGE.1 {
            self.raw_temps.pop_front();
        }

        let k = self
            .config
            .temp_sample_count
            .min(self.raw_temps.len())
            .max(1);
        let sum: i32 = self.raw_temps.iter().rev().take(k).sum();
        sum / k as i32
    }

    fn drain_messages(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(msg) => self.handle_message(msg),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn handle_message(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::SetAutoControl { enabled } => {
                self.config.auto_control = enabled;
            }
            ControlMsg::SetCustomSpeed { enabled, rpm } => {
                self.config.custom_speed_enabled = enabled;
                self.config.custom_speed_rpm = rpm.clamp(0, DEVICE_MAX_RPM);
                if enabled {
                    self.config.auto_control = false;
                    // Resubmit even if the value matches an earlier override
                    self.last_custom_sent = None;
                }
            }
            ControlMsg::SetFanCurve { points } => {
                self.config.fan_curve = points;
                normalize_config(&mut self.config);
            }
            ControlMsg::UpdateSmartControl { patch } => {
                patch.apply(&mut self.config.smart_control);
                normalize_config(&mut self.config);
            }
            ControlMsg::ResetLearning => {
                let n = self.config.fan_curve.len();
                self.config.smart_control.reset_learning(n);
            }
        }
        self.config_dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temp_monitor::ScriptedTempSource;
    use crate::transport::RecordingTransport;

    fn make_loop(temps: &[i32]) -> (ControlLoop<ScriptedTempSource, RecordingTransport>, mpsc::Sender<ControlMsg>) {
        ControlLoop::new(
            AppConfig::default(),
            ScriptedTempSource::from_temps(temps),
            RecordingTransport::new(),
        )
    }

    #[test]
    fn test_state_dispatch() {
        let (mut driver, _tx) = make_loop(&[50]);
        assert_eq!(driver.control_state(), ControlState::Active);
        driver.config.auto_control = false;
        assert_eq!(driver.control_state(), ControlState::Idle);
        driver.config.custom_speed_enabled = true;
        assert_eq!(driver.control_state(), ControlState::SuspendedByCustomRpm);
        // Custom RPM takes precedence over everything
        driver.config.auto_control = true;
        assert_eq!(driver.control_state(), ControlState::SuspendedByCustomRpm);
    }

    #[test]
    fn test_first_tick_ramps_from_zero() {
        let (mut driver, _tx) = make_loop(&[50, 50, 50]);
        let report = driver.tick();
        assert_eq!(report.state, Some(ControlState::Active));
        // Target 1800 at 50 C, ramped from 0 by the up limit
        assert_eq!(report.target_rpm, 1800);
        assert_eq!(report.emitted_rpm, 220);
        assert_eq!(report.command_sent, Some(220));
    }

    #[test]
    fn test_idle_sends_nothing() {
        let (mut driver, _tx) = make_loop(&[50, 50]);
        driver.config.auto_control = false;
        let report = driver.tick();
        assert_eq!(report.state, Some(ControlState::Idle));
        assert!(report.command_sent.is_none());
        assert!(driver.transport.commands.is_empty());
    }

    #[test]
    fn test_custom_speed_submitted_once() {
        let (mut driver, _tx) = make_loop(&[50, 50, 50]);
        driver.config.custom_speed_enabled = true;
        driver.config.custom_speed_rpm = 2600;
        let report = driver.tick();
        assert_eq!(report.state, Some(ControlState::SuspendedByCustomRpm));
        assert_eq!(report.command_sent, Some(2600));
        // Override forces auto control off
        assert!(!driver.config.auto_control);
        // Unchanged value is not resubmitted
        let report = driver.tick();
        assert!(report.command_sent.is_none());
        assert_eq!(driver.transport.commands, vec![2600]);
    }

    #[test]
    fn test_sensor_failure_reuses_last_good() {
        let mut source = ScriptedTempSource::new();
        source.push(crate::temp_monitor::TempReading::from_sensors(60, 0));
        for _ in 0..5 {
            source.push(crate::temp_monitor::TempReading::failed("unplugged"));
        }
        let (mut driver, _tx) =
            ControlLoop::new(AppConfig::default(), source, RecordingTransport::new());
        let report = driver.tick();
        assert_eq!(report.avg_temp, 60);
        // Failures within the sample window: silent reuse
        let report = driver.tick();
        assert_eq!(report.avg_temp, 60);
        assert!(!report.sensor_warning);
        driver.tick();
        driver.tick();
        // Past the window: warning, still running on the stale value
        let report = driver.tick();
        assert_eq!(report.avg_temp, 60);
        assert!(report.sensor_warning);
    }

    #[test]
    fn test_transport_failure_does_not_abort_tick() {
        let (mut driver, _tx) = make_loop(&[50, 50]);
        driver.transport.fail_next = 1;
        let report = driver.tick();
        assert!(report.transport_error.is_some());
        assert!(report.command_sent.is_none());
        // The attempted value still became the last target
        assert_eq!(driver.last_target_rpm(), 220);
        // Next tick recomputes and submits normally
        let report = driver.tick();
        assert_eq!(report.command_sent, Some(440));
    }

    #[test]
    fn test_empty_curve_suppresses_commands() {
        let mut config = AppConfig::default();
        config.fan_curve.clear();
        let (mut driver, _tx) = ControlLoop::new(
            config,
            ScriptedTempSource::from_temps(&[70, 70]),
            RecordingTransport::new(),
        );
        let report = driver.tick();
        assert_eq!(report.state, Some(ControlState::Active));
        assert!(report.command_sent.is_none());
        assert_eq!(report.emitted_rpm, 0);
        assert!(driver.transport.commands.is_empty());
    }

    #[test]
    fn test_raw_sample_averaging() {
        let (mut driver, _tx) = make_loop(&[60, 64, 68]);
        assert_eq!(driver.tick().avg_temp, 60);
        // Two samples: (60 + 64) / 2
        assert_eq!(driver.tick().avg_temp, 62);
        // Three samples: (60 + 64 + 68) / 3
        assert_eq!(driver.tick().avg_temp, 64);
    }
}
