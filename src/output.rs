//! NDJSON telemetry output for bs2ctl
//!
//! Status, warning, and error records are written as newline-delimited JSON
//! on stdout for the UI front-end. Status output is interval-gated; SIGUSR1
//! forces an immediate line.

use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::time::Instant;

use crate::config::SmartControl;
use crate::driver::ControlState;

/// Periodic status snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusOutput {
    /// Record type identifier
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Control loop state
    pub state: String,
    /// Latest averaged temperature in Celsius
    pub avg_temp: i32,
    /// Last emitted target RPM
    pub last_target_rpm: i32,
    /// Last device-acknowledged RPM, when known
    pub current_rpm: Option<i32>,
    /// Blended learned offsets per curve point
    pub learned_offsets: Vec<i32>,
    /// Heat-side learned offsets per curve point
    pub learned_offsets_heat: Vec<i32>,
    /// Cool-side learned offsets per curve point
    pub learned_offsets_cool: Vec<i32>,
    /// Heat-side rate-bucket biases
    pub rate_heat: Vec<i32>,
    /// Cool-side rate-bucket biases
    pub rate_cool: Vec<i32>,
    /// Milliseconds since daemon start
    pub uptime_ms: u64,
}

impl StatusOutput {
    pub fn new(
        state: ControlState,
        avg_temp: i32,
        last_target_rpm: i32,
        current_rpm: Option<i32>,
        sc: &SmartControl,
        uptime_ms: u64,
    ) -> Self {
        StatusOutput {
            msg_type: "status".to_string(),
            state: state.to_string(),
            avg_temp,
            last_target_rpm,
            current_rpm,
            learned_offsets: sc.blended_offsets.clone(),
            learned_offsets_heat: sc.offsets_heat.clone(),
            learned_offsets_cool: sc.offsets_cool.clone(),
            rate_heat: sc.rate_heat.clone(),
            rate_cool: sc.rate_cool.clone(),
            uptime_ms,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Error or warning record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorOutput {
    /// Record type identifier
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Machine-readable code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl ErrorOutput {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorOutput {
            msg_type: "error".to_string(),
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Interval-gated NDJSON writer
pub struct OutputWriter {
    start_time: Instant,
    output_interval_ms: u64,
    last_output: Option<Instant>,
}

impl OutputWriter {
    /// Create a writer emitting status at most every `output_interval_ms`
    pub fn new(output_interval_ms: u64) -> Self {
        OutputWriter {
            start_time: Instant::now(),
            output_interval_ms,
            last_output: None,
        }
    }

    /// Milliseconds since writer creation
    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Whether the status interval has elapsed
    pub fn should_output(&self) -> bool {
        match self.last_output {
            Some(last) => last.elapsed().as_millis() as u64 >= self.output_interval_ms,
            None => true,
        }
    }

    /// Write a status record if the interval has elapsed; returns whether a
    /// line was written
    pub fn write_status_if_due(&mut self, status: &StatusOutput) -> io::Result<bool> {
        if !self.should_output() {
            return Ok(false);
        }
        self.write_status(status)?;
        Ok(true)
    }

    /// Write a status record unconditionally
    pub fn write_status(&mut self, status: &StatusOutput) -> io::Result<()> {
        self.write_json(status)?;
        self.last_output = Some(Instant::now());
        Ok(())
    }

    /// Write an error or warning record
    pub fn write_error(&mut self, code: &str, message: &str) -> io::Result<()> {
        self.write_json(&ErrorOutput::new(code, message))
    }

    fn write_json<T: Serialize>(&self, value: &T) -> io::Result<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", json)?;
        handle.flush()
    }
}
