//! Forward scan over the remote ID space.
//!
//! Every remote post id in `(local_max, remote_max]` is fetched exactly once
//! per run, in increasing order, and upserted together with its reply tree.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::{normalize, replies, RunReport, SyncEngine};
use crate::api::RemoteTask;
use crate::db::{self, with_retry, NewPost};

/// Lowest remote id the scan will ever claim as its floor. IDs below this
/// belong to an earlier, incompatible data source and must not be re-walked.
const HISTORICAL_CUTOFF: i64 = 300_003;

/// Tag applied to freshly-ingested rows until classification runs.
pub(crate) const DEFAULT_TAG: &str = "unclassified";

/// Scan `(floor, remote_max]` and ingest every post found.
///
/// # Errors
///
/// Returns an error only when the scan cannot start at all (cursor or
/// top-of-feed query failed); per-id failures land in the report instead.
pub(crate) async fn scan_new_posts(engine: &SyncEngine, report: &mut RunReport) -> Result<()> {
    let floor = local_floor(engine).await?;
    let remote_max = engine
        .client()
        .fetch_max_id()
        .await
        .context("Failed to fetch remote max id")?;

    info!(floor, remote_max, "Syncing posts");

    for id in (floor + 1)..=remote_max {
        let task = match engine.client().fetch_post(id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                // Gap in the remote ID space; not an error.
                debug!(id, "Remote post does not exist, skipping");
                continue;
            }
            Err(e) => {
                warn!(id, "Failed to fetch post: {e:#}");
                report.errors.push(format!("Post {id}: {e:#}"));
                continue;
            }
        };

        let post_id = match save_post(engine, &task).await {
            Ok(post_id) => post_id,
            Err(e) => {
                warn!(id, "Failed to save post: {e:#}");
                report.errors.push(format!("Save post {id}: {e:#}"));
                continue;
            }
        };

        match replies::ingest_post_replies(engine, id, post_id).await {
            Ok(accepted) => report.total_replies += accepted as i64,
            Err(e) => {
                warn!(id, "Failed to ingest replies: {e:#}");
                report.errors.push(format!("Comments {id}: {e:#}"));
            }
        }

        report.total_posts += 1;
        report.last_post_external_id = id.to_string();

        if !engine.rate_limit_delay().is_zero() {
            tokio::time::sleep(engine.rate_limit_delay()).await;
        }
    }

    Ok(())
}

/// The greatest external post id already ingested, clamped to the cutoff.
async fn local_floor(engine: &SyncEngine) -> Result<i64> {
    let stored_max = with_retry(engine.retry(), || {
        db::max_external_post_id(engine.db().pool())
    })
    .await
    .context("Failed to read local max post id")?;

    Ok(stored_max.unwrap_or(0).max(HISTORICAL_CUTOFF))
}

/// Upsert one remote post, serialized against concurrent writers.
pub(crate) async fn save_post(engine: &SyncEngine, task: &RemoteTask) -> Result<i64> {
    let post = build_post(task);

    let _guard = engine.save_lock().lock().await;
    with_retry(engine.retry(), || {
        db::upsert_post(engine.db().pool(), &post)
    })
    .await
}

fn build_post(task: &RemoteTask) -> NewPost {
    NewPost {
        external_id: task.id.to_string(),
        title: task.title.clone(),
        content: task.content.clone(),
        author: task.user_name.clone(),
        author_id: task.openid.clone(),
        ip: task.ip.clone(),
        like_count: task.like_num,
        view_count: task.watch_num,
        reply_count: task.comment_num,
        radio_group: task.radio_group.clone(),
        campus_group: task.campus_group.clone(),
        region: task.region.clone(),
        images: normalize::clean_image_list(&task.images),
        cover: normalize::clean_image_list(&task.cover),
        state: normalize::derive_state(task.is_delete, task.is_complaint, task.choose, task.hot)
            .as_str()
            .to_string(),
        tag: DEFAULT_TAG.to_string(),
        created_at: normalize::to_stored_time(normalize::parse_remote_time(&task.c_time)),
    }
}
