//! Signal handling for bs2ctl
//!
//! - SIGTERM / SIGINT: graceful shutdown; the current tick completes, the
//!   learned state is persisted, then the process exits.
//! - SIGUSR1: force an immediate status record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};

/// Signal state shared between the handler tasks and the control loop
#[derive(Debug, Clone, Default)]
pub struct SignalState {
    shutdown_requested: Arc<AtomicBool>,
    force_status: Arc<AtomicBool>,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether SIGTERM or SIGINT was received
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    /// Check and clear the force-status flag
    pub fn take_force_status(&self) -> bool {
        self.force_status.swap(false, Ordering::SeqCst)
    }

    pub fn set_force_status(&self) {
        self.force_status.store(true, Ordering::SeqCst);
    }
}

/// Install the signal handler tasks
///
/// Spawns background tasks that flip the shared state when signals arrive;
/// the tasks run until the process exits.
///
/// # Errors
/// Returns an error if a handler cannot be registered.
pub fn install_handlers(state: &SignalState) -> Result<(), std::io::Error> {
    let state_term = state.clone();
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        loop {
            sigterm.recv().await;
            eprintln!("Received SIGTERM, shutting down after this tick...");
            state_term.request_shutdown();
        }
    });

    let state_int = state.clone();
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        loop {
            sigint.recv().await;
            eprintln!("Received SIGINT, shutting down after this tick...");
            state_int.request_shutdown();
        }
    });

    let state_usr1 = state.clone();
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    tokio::spawn(async move {
        loop {
            sigusr1.recv().await;
            state_usr1.set_force_status();
        }
    });

    Ok(())
}
