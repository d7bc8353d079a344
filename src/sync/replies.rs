//! Reply tree ingestion.
//!
//! Fetches a post's complete paginated comment set, flattens one level of
//! nesting, resolves parent linkage to local internal ids, deduplicates by
//! remote identity, and writes the accepted batch.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::scanner::DEFAULT_TAG;
use super::{normalize, RunReport, SyncEngine};
use crate::api::{RawLevel, RemoteComment};
use crate::db::{self, with_retry, NewReply};

/// Rows per INSERT statement when writing a reply batch.
const BATCH_SIZE: usize = 50;

/// Ingest the full reply tree of one post.
///
/// Returns the number of replies accepted (new rows written).
///
/// # Errors
///
/// Returns an error if the comment fetch fails; persistence failures inside
/// the batch are best-effort and only logged.
pub(crate) async fn ingest_post_replies(
    engine: &SyncEngine,
    post_external_id: i64,
    post_id: i64,
) -> Result<usize> {
    let comments = engine
        .client()
        .fetch_comments(post_external_id)
        .await
        .with_context(|| format!("Failed to fetch comments for post {post_external_id}"))?;

    // Flatten one level of nesting; children of a top-level comment sit at
    // level 2, anything deeper does not occur on this remote.
    let mut batch: Vec<NewReply> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for comment in &comments {
        if let Some(reply) = accept_comment(engine, comment, post_id, 1, &mut seen).await {
            batch.push(reply);
        }
        for nested in &comment.comment_list {
            if let Some(reply) = accept_comment(engine, nested, post_id, 2, &mut seen).await {
                batch.push(reply);
            }
        }
    }

    let accepted = if batch.is_empty() {
        0
    } else {
        db::insert_replies_with_fallback(engine.db().pool(), engine.retry(), &batch, BATCH_SIZE)
            .await
    };

    debug!(
        post = post_external_id,
        accepted, "Ingested replies for post"
    );
    Ok(accepted)
}

/// Build one reply row, or skip it if it is already known.
///
/// Acceptance bumps the owning post's reply counter; the increment is atomic
/// in SQL and retried under contention so it is never lost.
async fn accept_comment(
    engine: &SyncEngine,
    comment: &RemoteComment,
    post_id: i64,
    position_level: i64,
    seen: &mut HashSet<String>,
) -> Option<NewReply> {
    let external_id = comment.id.to_string();

    // The remote feed can deliver the same comment twice (within one page
    // set, or across runs). Replies are immutable once ingested.
    if !seen.insert(external_id.clone()) {
        return None;
    }
    match db::get_reply_by_external_id(engine.db().pool(), &external_id).await {
        Ok(Some(_)) => return None,
        Ok(None) => {}
        Err(e) => {
            warn!(external_id, "Reply dedup lookup failed: {e:#}");
            return None;
        }
    }

    let parent_id = resolve_parent(engine, comment.pid).await;
    let level = comment
        .level
        .as_ref()
        .map_or(position_level, RawLevel::normalize);

    if let Err(e) = with_retry(engine.retry(), || {
        db::increment_reply_count(engine.db().pool(), post_id)
    })
    .await
    {
        // Keep the reply; a missed counter bump is recoverable, a dropped
        // reply is not.
        warn!(post_id, "Failed to increment reply count: {e:#}");
    }

    Some(NewReply {
        post_id,
        external_id,
        content: comment.comment.clone(),
        author: comment.user_name.clone(),
        author_id: comment.openid.clone(),
        reply_to: comment.apply_to.clone(),
        level,
        parent_id,
        like_count: comment.like_num,
        images: normalize::clean_image_list(&comment.images),
        tag: DEFAULT_TAG.to_string(),
        created_at: normalize::to_stored_time(normalize::parse_remote_time(&comment.c_time)),
    })
}

/// Map a remote parent id to the parent reply's internal id, 0 when the
/// parent is unknown locally.
async fn resolve_parent(engine: &SyncEngine, remote_pid: i64) -> i64 {
    if remote_pid <= 0 {
        return 0;
    }

    match db::get_reply_by_external_id(engine.db().pool(), &remote_pid.to_string()).await {
        Ok(Some(parent)) => parent.id,
        Ok(None) => 0,
        Err(e) => {
            warn!(remote_pid, "Parent reply lookup failed: {e:#}");
            0
        }
    }
}

/// Re-ingest reply trees for posts the remote flags as having new replies,
/// bounded by the last completed run's checkpoint.
///
/// Deduplication makes the re-ingest idempotent, so an over-wide window only
/// costs fetches.
pub(crate) async fn rescan_posts_with_new_replies(
    engine: &SyncEngine,
    checkpoint: Option<DateTime<Utc>>,
    report: &mut RunReport,
) -> Result<()> {
    let tasks = engine
        .client()
        .fetch_posts_with_new_replies()
        .await
        .context("Failed to fetch posts with new replies")?;

    info!(count = tasks.len(), "Found posts with new replies");

    for task in tasks {
        let comment_time = normalize::parse_remote_time(&task.comment_time);
        if let Some(checkpoint) = checkpoint {
            if comment_time < checkpoint {
                // Already covered by a previous run.
                continue;
            }
        }

        let post = match db::get_post_by_external_id(engine.db().pool(), &task.id.to_string()).await
        {
            Ok(Some(post)) => post,
            Ok(None) => {
                // Not mirrored yet; the forward scan will pick it up.
                debug!(id = task.id, "Post with new replies not mirrored yet");
                continue;
            }
            Err(e) => {
                report.errors.push(format!("Comments {}: {e:#}", task.id));
                continue;
            }
        };

        match ingest_post_replies(engine, task.id, post.id).await {
            Ok(accepted) => report.total_replies += accepted as i64,
            Err(e) => {
                warn!(id = task.id, "Failed to rescan replies: {e:#}");
                report.errors.push(format!("Comments {}: {e:#}", task.id));
            }
        }
    }

    Ok(())
}
