//! # Daemon Management Module
//!
//! Runs and manages the collector's background tasks:
//!
//! - Sensor polling over Modbus TCP
//! - Periodic archive writes of the current readings
//! - Cold-storage compaction of old daily files
//! - System health monitoring (heartbeat)
//!
//! Each service runs as an independent Tokio task sharing a `running` flag;
//! shutdown flips the flag and `join` waits for the tasks to drain.
//!
//! ## Usage
//!
//! ```no_run
//! use coldwatch::{config::Config, daemon::launch_daemon::Daemon, state::AppState};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!     let state = AppState::new(config);
//!
//!     let mut daemon = Daemon::new(state);
//!     daemon.launch()?;
//!
//!     // Later, trigger a graceful shutdown
//!     daemon.shutdown();
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use log::{debug, error, info};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

use crate::archive::{ArchiveCompactor, ArchiveWriter};
use crate::polling::Poller;
use crate::state::AppState;

/// Granularity at which timer loops re-check the running flag.
const TICK: Duration = Duration::from_secs(1);

/// Coordinates the collector's background services.
///
/// The `running` flag is shared between all tasks; each checks it
/// periodically and terminates gracefully once it drops.
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    state: Arc<AppState>,
}

impl Daemon {
    pub fn new(state: Arc<AppState>) -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            state,
        }
    }

    /// Launch all collector tasks.
    pub fn launch(&mut self) -> Result<()> {
        self.start_polling()?;
        self.start_archive_writer()?;
        self.start_compactor()?;
        self.start_heartbeat()?;
        Ok(())
    }

    /// Shared stop flag, for components that watch it directly.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Start the sensor polling task.
    fn start_polling(&mut self) -> Result<()> {
        info!("Starting sensor polling task");

        let poller = Poller::new(self.state.clone(), self.running.clone());
        let task = tokio::spawn(async move {
            poller.run().await;
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start the periodic archive writer.
    fn start_archive_writer(&mut self) -> Result<()> {
        info!(
            "Starting archive writer (every {}ms)",
            self.state.config.archive.write_interval_ms
        );

        let running = self.running.clone();
        let state = self.state.clone();
        let writer = ArchiveWriter::new(state.config.clone(), state.generation.clone());

        let task = tokio::spawn(async move {
            let write_interval = state.config.archive.write_interval();
            let mut elapsed = Duration::ZERO;
            while running.load(Ordering::SeqCst) {
                time::sleep(TICK).await;
                elapsed += TICK;
                if elapsed < write_interval {
                    continue;
                }
                elapsed = Duration::ZERO;
                if let Err(err) = writer.archive_current(&state.store).await {
                    error!("Archive write failed: {:#}", err);
                }
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start the cold-storage compactor. One pass runs at startup so a
    /// collector that was down for a while catches up immediately.
    fn start_compactor(&mut self) -> Result<()> {
        info!(
            "Starting archive compactor (every {}ms)",
            self.state.config.archive.compact_interval_ms
        );

        let running = self.running.clone();
        let state = self.state.clone();
        let compactor = ArchiveCompactor::new(state.config.clone());

        let task = tokio::spawn(async move {
            if let Err(err) = compactor.compact().await {
                error!("Archive compaction failed: {:#}", err);
            }

            let compact_interval = state.config.archive.compact_interval();
            let mut elapsed = Duration::ZERO;
            while running.load(Ordering::SeqCst) {
                time::sleep(TICK).await;
                elapsed += TICK;
                if elapsed < compact_interval {
                    continue;
                }
                elapsed = Duration::ZERO;
                if let Err(err) = compactor.compact().await {
                    error!("Archive compaction failed: {:#}", err);
                }
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start a heartbeat task that logs system status periodically.
    fn start_heartbeat(&mut self) -> Result<()> {
        info!("Starting heartbeat monitor");

        let running = self.running.clone();
        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                debug!("Daemon heartbeat: running");
                time::sleep(Duration::from_secs(60)).await;
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Signal all tasks to stop. Does not wait; call `join` for that.
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for all tasks to complete.
    ///
    /// Task panics are logged, not propagated, so one bad task does not
    /// block the shutdown of the others.
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(result) => {
                    if let Err(e) = result {
                        log::error!("Task panicked: {}", e);
                    }
                }
                Err(_) => {
                    log::warn!("Task did not complete within timeout period, may be hung");
                }
            }
        }
        Ok(())
    }
}
