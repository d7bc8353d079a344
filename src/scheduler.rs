//! Ingestion trigger sources.
//!
//! Runs the engine on a fixed interval and accepts manual triggers. At most
//! one ingestion run executes at a time: a trigger that finds a run in
//! progress is rejected, never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::sync::{RunReport, SyncEngine};

pub struct Scheduler {
    engine: Arc<SyncEngine>,
    interval: Duration,
    running: AtomicBool,
}

impl Scheduler {
    #[must_use]
    pub fn new(engine: Arc<SyncEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            running: AtomicBool::new(false),
        }
    }

    /// Run ingestion on the configured interval, forever.
    pub async fn run_loop(&self) {
        info!(interval_secs = self.interval.as_secs(), "Scheduler started");
        loop {
            tokio::time::sleep(self.interval).await;
            match self.trigger().await {
                Ok(report) => {
                    if !report.errors.is_empty() {
                        warn!(errors = report.errors.len(), "Scheduled sync finished with errors");
                    }
                }
                Err(e) => warn!("Scheduled sync skipped: {e:#}"),
            }
        }
    }

    /// Run one ingestion cycle now, unless one is already in progress.
    ///
    /// # Errors
    ///
    /// Returns an error when a run is already in progress.
    pub async fn trigger(&self) -> Result<RunReport> {
        // Compare-and-set guard: overlapping triggers are skipped, not queued.
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            bail!("sync run is already in progress");
        }

        let report = self.engine.run_once().await;
        self.running.store(false, Ordering::SeqCst);
        Ok(report)
    }

    /// Whether an ingestion run is currently executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
