//! Back-sync reconciliation: push a locally-authored row to the remote, then
//! discover the id the remote assigned it and rewrite the local row.
//!
//! The remote write API returns no submission receipt, so discovery queries
//! "latest item by this author" and takes the first result. That proxy is
//! unsound when one author identity has several items in flight at once; see
//! DESIGN.md. Reconciliation runs fire-and-forget: failures are logged and
//! never surfaced to the caller whose local write already succeeded.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use super::{normalize, SyncEngine};
use crate::api::{CommentSubmission, PostSubmission};
use crate::db::{self, with_retry, Post, Reply, EXTERNAL_ID_UNSYNCED};

/// Spawn post reconciliation detached from the caller.
pub fn spawn_post_reconciliation(engine: Arc<SyncEngine>, post_id: i64) {
    tokio::spawn(async move {
        if let Err(e) = engine.reconcile_post(post_id).await {
            error!(post_id, "Post reconciliation failed: {e:#}");
        }
    });
}

/// Spawn reply reconciliation detached from the caller.
pub fn spawn_reply_reconciliation(engine: Arc<SyncEngine>, reply_id: i64) {
    tokio::spawn(async move {
        if let Err(e) = engine.reconcile_reply(reply_id).await {
            error!(reply_id, "Reply reconciliation failed: {e:#}");
        }
    });
}

impl SyncEngine {
    /// Push a locally-authored post to the remote and adopt the id the
    /// remote assigned it.
    ///
    /// # Errors
    ///
    /// Returns an error if submission, discovery, or the local rewrite fails.
    pub async fn reconcile_post(&self, post_id: i64) -> Result<()> {
        let post = db::get_post(self.db().pool(), post_id)
            .await?
            .with_context(|| format!("Post {post_id} not found"))?;

        if post.is_synced() {
            debug!(post_id, external_id = %post.external_id, "Post already reconciled");
            return Ok(());
        }

        self.client()
            .submit_post(&post_submission(&post))
            .await
            .context("Failed to submit post to remote")?;

        let Some(remote) = self
            .client()
            .fetch_latest_post_by_author(&post.author_id)
            .await
            .context("Failed to discover remote post id")?
        else {
            warn!(author_id = %post.author_id, "No remote posts found for author after submission");
            return Ok(());
        };

        let external_id = remote.id.to_string();

        // Ingestion may already have mirrored the freshly-submitted post; in
        // that race the mirrored row wins and the local draft collapses.
        if let Some(existing) = db::get_post_by_external_id(self.db().pool(), &external_id).await? {
            if existing.id != post.id {
                info!(post_id, external_id = %external_id, "Collapsing duplicate local post");
                return with_retry(self.retry(), || {
                    db::soft_delete_post(self.db().pool(), post.id)
                })
                .await;
            }
            return Ok(());
        }

        with_retry(self.retry(), || {
            db::update_post_external_id(self.db().pool(), post.id, &external_id)
        })
        .await?;
        info!(post_id, external_id = %external_id, "Reconciled post with remote id");
        Ok(())
    }

    /// Push a locally-authored reply to the remote and adopt its remote id.
    ///
    /// Skipped entirely (not an error) when the owning post or the parent
    /// reply has not been reconciled yet — the remote addresses both by
    /// remote-assigned id, and submitting with a wrong parent is worse than
    /// submitting late.
    ///
    /// # Errors
    ///
    /// Returns an error if submission, discovery, or the local rewrite fails.
    pub async fn reconcile_reply(&self, reply_id: i64) -> Result<()> {
        let reply = db::get_reply(self.db().pool(), reply_id)
            .await?
            .with_context(|| format!("Reply {reply_id} not found"))?;

        if reply.is_synced() {
            debug!(reply_id, external_id = %reply.external_id, "Reply already reconciled");
            return Ok(());
        }

        let post = db::get_post(self.db().pool(), reply.post_id)
            .await?
            .with_context(|| format!("Post {} not found for reply {reply_id}", reply.post_id))?;
        if !post.is_synced() {
            warn!(reply_id, post_id = post.id, "Owning post not reconciled yet, skipping reply");
            return Ok(());
        }

        let parent_external_id = match self.resolve_parent_external_id(&reply).await? {
            Some(parent_external_id) => parent_external_id,
            None => {
                warn!(reply_id, parent_id = reply.parent_id, "Parent reply not reconciled yet, skipping");
                return Ok(());
            }
        };

        self.client()
            .submit_comment(&comment_submission(&post, &reply, parent_external_id))
            .await
            .context("Failed to submit reply to remote")?;

        let Some(remote) = self
            .client()
            .fetch_latest_comment_by_author(&reply.author_id)
            .await
            .context("Failed to discover remote comment id")?
        else {
            warn!(author_id = %reply.author_id, "No remote comments found for author after submission");
            return Ok(());
        };

        let external_id = remote.id.to_string();

        if let Some(existing) = db::get_reply_by_external_id(self.db().pool(), &external_id).await?
        {
            if existing.id != reply.id {
                info!(reply_id, external_id = %external_id, "Collapsing duplicate local reply");
                return with_retry(self.retry(), || {
                    db::soft_delete_reply(self.db().pool(), reply.id)
                })
                .await;
            }
            return Ok(());
        }

        with_retry(self.retry(), || {
            db::update_reply_external_id(self.db().pool(), reply.id, &external_id)
        })
        .await?;
        info!(reply_id, external_id = %external_id, "Reconciled reply with remote id");
        Ok(())
    }

    /// The parent's remote id for submission: 0 for top-level replies,
    /// `None` when the parent exists but is not reconciled yet.
    async fn resolve_parent_external_id(&self, reply: &Reply) -> Result<Option<i64>> {
        if reply.parent_id <= 0 {
            return Ok(Some(0));
        }

        let Some(parent) = db::get_reply(self.db().pool(), reply.parent_id).await? else {
            return Ok(None);
        };
        if parent.external_id == EXTERNAL_ID_UNSYNCED {
            return Ok(None);
        }

        Ok(parent.external_id.parse().ok())
    }
}

fn post_submission(post: &Post) -> PostSubmission {
    PostSubmission {
        c_time: normalize::format_for_remote(&post.created_at),
        content: post.content.clone(),
        title: post.title.clone(),
        user_name: post.author.clone(),
        openid: post.author_id.clone(),
        watch_num: post.view_count,
    }
}

fn comment_submission(post: &Post, reply: &Reply, parent_external_id: i64) -> CommentSubmission {
    CommentSubmission {
        c_time: normalize::format_for_remote(&reply.created_at),
        openid: reply.author_id.clone(),
        post_external_id: post.external_id.clone(),
        comment: reply.content.clone(),
        user_name: reply.author.clone(),
        apply_to: reply.reply_to.clone(),
        level: reply.level,
        parent_external_id,
    }
}
