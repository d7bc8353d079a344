//! The data synchronization engine.
//!
//! One run mirrors the remote forum forward from the local cursor (new posts
//! plus their reply trees), then rescans posts the remote flags as having new
//! replies. Locally-authored rows are pushed back to the remote and
//! reconciled with their remote-assigned ids by the reconciler, which runs
//! per-item and independently of the main run.

pub mod normalize;
mod reconcile;
mod replies;
mod scanner;

pub use reconcile::{spawn_post_reconciliation, spawn_reply_reconciliation};

use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::api::RemoteClient;
use crate::config::Config;
use crate::db::{self, with_retry, Database, RetryPolicy, RunStatus};

/// Outcome of one ingestion run.
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub total_posts: i64,
    pub total_replies: i64,
    pub last_post_external_id: String,
    pub errors: Vec<String>,
}

impl RunReport {
    #[must_use]
    pub fn status(&self) -> RunStatus {
        if self.errors.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::Error
        }
    }

    fn error_message(&self) -> String {
        self.errors.join("; ")
    }
}

pub struct SyncEngine {
    client: RemoteClient,
    db: Database,
    retry: RetryPolicy,
    rate_limit_delay: Duration,
    /// Serializes the check-then-write post upsert; the sequence is not
    /// atomic against the store on its own when reconciliation runs
    /// concurrently.
    save_lock: Mutex<()>,
}

impl SyncEngine {
    #[must_use]
    pub fn new(config: &Config, client: RemoteClient, db: Database) -> Self {
        Self {
            client,
            db,
            retry: RetryPolicy::with_max_retries(config.max_retries),
            rate_limit_delay: config.rate_limit_delay,
            save_lock: Mutex::new(()),
        }
    }

    /// Execute one full ingestion cycle.
    ///
    /// Per-item failures are accumulated into the report, never propagated;
    /// the run always lands a terminal ledger row (best effort) and returns
    /// what it managed to do.
    pub async fn run_once(&self) -> RunReport {
        info!("Starting ingestion run");
        let started_at = normalize::to_stored_time(Utc::now());
        let mut report = RunReport::default();

        if let Err(e) = with_retry(self.retry, || {
            db::insert_sync_status_running(self.db.pool(), &started_at)
        })
        .await
        {
            error!("Failed to record run start: {e:#}");
        }

        // Read the checkpoint before this run lands its own terminal row.
        let checkpoint = match db::last_checkpoint_time(self.db.pool()).await {
            Ok(stored) => stored.as_deref().and_then(normalize::parse_stored_time),
            Err(e) => {
                error!("Failed to read reply-rescan checkpoint: {e:#}");
                None
            }
        };

        if let Err(e) = scanner::scan_new_posts(self, &mut report).await {
            error!("Error scanning new posts: {e:#}");
            report.errors.push(format!("New posts error: {e:#}"));
        }

        if let Err(e) = replies::rescan_posts_with_new_replies(self, checkpoint, &mut report).await
        {
            error!("Error rescanning replies: {e:#}");
            report.errors.push(format!("New replies error: {e:#}"));
        }

        let status = report.status();
        let error_message = report.error_message();
        if let Err(e) = with_retry(self.retry, || {
            db::insert_sync_status_finished(
                self.db.pool(),
                &started_at,
                &report.last_post_external_id,
                report.total_posts,
                report.total_replies,
                status,
                &error_message,
            )
        })
        .await
        {
            error!("Failed to record run outcome: {e:#}");
        }

        info!(
            posts = report.total_posts,
            replies = report.total_replies,
            errors = report.errors.len(),
            "Ingestion run complete"
        );
        report
    }

    pub(crate) const fn client(&self) -> &RemoteClient {
        &self.client
    }

    pub(crate) const fn db(&self) -> &Database {
        &self.db
    }

    pub(crate) const fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub(crate) const fn rate_limit_delay(&self) -> Duration {
        self.rate_limit_delay
    }

    pub(crate) const fn save_lock(&self) -> &Mutex<()> {
        &self.save_lock
    }
}
