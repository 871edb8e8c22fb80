//! bs2ctl - Adaptive fan controller daemon for BS2/BS2 PRO cooling pads
//!
//! # Overview
//!
//! bs2ctl is a standalone Rust daemon that closes the loop between the host's
//! thermal sensors and a BS2/BS2 PRO cooling pad. It reads CPU/GPU
//! temperatures from hwmon, evaluates the user's fan curve with learned
//! per-temperature and per-trend offsets, and emits target RPM commands for
//! the HID bridge, while continuously refining the learned state.
//!
//! # Features
//!
//! - **Piecewise-linear fan curve** with endpoint pinning
//! - **Adaptive control**: error, trend, pre-heat, and overheat terms on top
//!   of the curve
//! - **Dual learned offset tables** (heating / cooling) plus rate-of-change
//!   biases, bounded and smoothed
//! - **Ramp limiting** with asymmetric up/down rates
//! - **Dead-band emission**: small RPM changes are never sent to the device
//! - **NDJSON integration**: status, warnings, and fan commands on stdout;
//!   control messages on stdin
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          bs2ctl                              │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ TempMonitor  │─►│  Target RPM  │─►│  Ramp Limiter    │  │
//! │  │ hwmon sysfs  │  │  Calculator  │  │  (per-tick caps) │  │
//! │  └──────────────┘  └──────────────┘  └────────┬─────────┘  │
//! │                                                │             │
//! │                                                ▼             │
//! │  ┌──────────────┐                     ┌──────────────────┐  │
//! │  │   Learner    │◄────────────────────│  FanTransport    │  │
//! │  │ (offsets +   │                     │  (NDJSON bridge) │  │
//! │  │  rate bias)  │                     └──────────────────┘  │
//! │  └──────────────┘                                            │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ SignalState  │  │ ControlMsg   │  │  OutputWriter    │  │
//! │  │ TERM/USR1    │  │ queue (stdin)│  │  (JSON stdout)   │  │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! bs2ctl --config ~/.config/bs2ctl.json --status-interval 1000 --verbose
//! ```
//!
//! Control messages arrive as NDJSON on stdin, for example:
//!
//! ```text
//! {"type":"setAutoControl","enabled":true}
//! {"type":"setCustomSpeed","enabled":true,"rpm":2600}
//! {"type":"resetLearning"}
//! ```
//!
//! # Signal Handling
//!
//! - **SIGTERM/SIGINT**: graceful shutdown (persists learned state)
//! - **SIGUSR1**: force immediate status output

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Duration;

use bs2ctl::config::{load_config, save_config, AppConfig, Args};
use bs2ctl::driver::{ControlLoop, ControlMsg};
use bs2ctl::output::{OutputWriter, StatusOutput};
use bs2ctl::signals::{install_handlers, SignalState};
use bs2ctl::temp_monitor::HwmonTempSource;
use bs2ctl::transport::StdoutTransport;

/// Forward NDJSON control messages from stdin into the loop's queue
fn spawn_stdin_reader(tx: mpsc::Sender<ControlMsg>, verbose: bool) {
    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ControlMsg>(&line) {
                Ok(msg) => {
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("Ignoring malformed control message: {}", e);
                }
            }
        }
        if verbose {
            eprintln!("Control input closed");
        }
    });
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let (config, changed) = match load_config(&args.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Warning: {}; starting from defaults", e);
            (AppConfig::default(), true)
        }
    };
    if changed {
        if let Err(e) = save_config(&args.config, &config) {
            eprintln!("Warning: could not persist repaired config: {}", e);
        }
    }

    if args.verbose {
        eprintln!("bs2ctl starting with configuration:");
        eprintln!("  Config path: {:?}", args.config);
        eprintln!("  Tick cadence: {} s", config.temp_update_rate);
        eprintln!("  Sample window: {}", config.temp_sample_count);
        eprintln!("  Curve points: {}", config.fan_curve.len());
        eprintln!("  Target temp: {} C", config.smart_control.target_temp);
    }

    let source = match HwmonTempSource::discover(&args.hwmon_root) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let signal_state = SignalState::new();
    if let Err(e) = install_handlers(&signal_state) {
        eprintln!("Warning: failed to register signal handlers: {}", e);
    }

    let (mut driver, tx) = ControlLoop::new(config, source, StdoutTransport::new());
    spawn_stdin_reader(tx, args.verbose);

    let mut writer = OutputWriter::new(args.status_interval_ms);

    if args.verbose {
        eprintln!("bs2ctl initialized, entering control loop...");
    }

    loop {
        if signal_state.is_shutdown_requested() {
            if let Err(e) = save_config(&args.config, driver.config()) {
                eprintln!("Warning: could not persist state on shutdown: {}", e);
            }
            if args.verbose {
                eprintln!("Shutdown complete");
            }
            std::process::exit(0);
        }

        let report = driver.tick();

        if report.config_changed {
            if let Err(e) = save_config(&args.config, driver.config()) {
                eprintln!("Warning: could not persist config: {}", e);
            }
        }
        if report.sensor_warning {
            let _ = writer.write_error(
                "sensorStale",
                "temperature source failing, running on last good sample",
            );
        }
        if let Some(e) = &report.transport_error {
            let _ = writer.write_error("transportFailed", e);
        }

        let status = StatusOutput::new(
            report.state.unwrap_or(bs2ctl::driver::ControlState::Idle),
            driver.last_avg_temp(),
            driver.last_target_rpm(),
            driver.current_rpm(),
            &driver.config().smart_control,
            writer.uptime_ms(),
        );
        let result = if signal_state.take_force_status() {
            writer.write_status(&status).map(|_| true)
        } else {
            writer.write_status_if_due(&status)
        };
        if let Err(e) = result {
            eprintln!("Error writing status: {}", e);
        }

        tokio::time::sleep(Duration::from_secs(driver.config().temp_update_rate)).await;
    }
}
