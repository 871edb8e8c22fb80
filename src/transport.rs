//! Fan command transport
//!
//! The control core decides *whether* and *when* to command the fan; the
//! actual HID traffic to the cooling pad is owned by a bridge process. The
//! daemon hands commands to that bridge as NDJSON records on stdout, the
//! same channel the telemetry uses. Preset gear commands pass through as
//! opaque byte packets and are never interpreted here.

use std::io::{self, Write};

/// Errors from command submission
#[derive(Debug)]
pub enum TransportError {
    /// The underlying channel failed
    Io(io::Error),
    /// The device rejected or dropped the command
    Rejected(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "transport I/O error: {}", e),
            TransportError::Rejected(s) => write!(f, "command rejected: {}", s),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}

/// Sink for fan commands
pub trait FanTransport {
    /// Command a target fan speed
    fn set_target_rpm(&mut self, rpm: u16) -> Result<(), TransportError>;

    /// Forward an opaque preset-gear packet
    fn send_gear(&mut self, packet: &[u8]) -> Result<(), TransportError>;

    /// Last speed the device acknowledged, when known
    fn current_rpm(&self) -> Option<i32> {
        None
    }
}

/// NDJSON command writer for the HID bridge
#[derive(Debug, Default)]
pub struct StdoutTransport {
    last_rpm: Option<i32>,
}

impl StdoutTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_line(&self, json: String) -> Result<(), TransportError> {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", json)?;
        handle.flush()?;
        Ok(())
    }
}

impl FanTransport for StdoutTransport {
    fn set_target_rpm(&mut self, rpm: u16) -> Result<(), TransportError> {
        self.write_line(format!(
            "{{\"type\":\"command\",\"command\":\"setTargetRpm\",\"rpm\":{}}}",
            rpm
        ))?;
        self.last_rpm = Some(rpm as i32);
        Ok(())
    }

    fn send_gear(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        let hex: String = packet.iter().map(|b| format!("{:02x}", b)).collect();
        self.write_line(format!(
            "{{\"type\":\"command\",\"command\":\"gear\",\"packet\":\"{}\"}}",
            hex
        ))
    }

    fn current_rpm(&self) -> Option<i32> {
        self.last_rpm
    }
}

/// Recording transport for tests
///
/// Captures every submitted command and can be told to fail the next
/// submissions to exercise the driver's error path.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    /// Every RPM submitted, in order
    pub commands: Vec<i32>,
    /// Every gear packet submitted, in order
    pub gears: Vec<Vec<u8>>,
    /// Number of upcoming submissions that should fail
    pub fail_next: usize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_command(&self) -> Option<i32> {
        self.commands.last().copied()
    }
}

impl FanTransport for RecordingTransport {
    fn set_target_rpm(&mut self, rpm: u16) -> Result<(), TransportError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(TransportError::Rejected("injected failure".to_string()));
        }
        self.commands.push(rpm as i32);
        Ok(())
    }

    fn send_gear(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(TransportError::Rejected("injected failure".to_string()));
        }
        self.gears.push(packet.to_vec());
        Ok(())
    }

    fn current_rpm(&self) -> Option<i32> {
        self.last_command()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_transport_captures_commands() {
        let mut transport = RecordingTransport::new();
        transport.set_target_rpm(1800).unwrap();
        transport.set_target_rpm(2020).unwrap();
        assert_eq!(transport.commands, vec![1800, 2020]);
        assert_eq!(transport.current_rpm(), Some(2020));
    }

    #[test]
    fn test_recording_transport_injected_failure() {
        let mut transport = RecordingTransport {
            fail_next: 1,
            ..Default::default()
        };
        assert!(transport.set_target_rpm(1800).is_err());
        assert!(transport.set_target_rpm(1800).is_ok());
        assert_eq!(transport.commands, vec![1800]);
    }

    #[test]
    fn test_gear_packets_pass_through_opaque() {
        let mut transport = RecordingTransport::new();
        transport.send_gear(&[0x02, 0x33, 0x01]).unwrap();
        assert_eq!(transport.gears, vec![vec![0x02, 0x33, 0x01]]);
    }
}
