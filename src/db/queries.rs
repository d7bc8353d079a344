use anyhow::{Context, Result};
use sqlx::{QueryBuilder, SqlitePool};
use tracing::warn;

use super::models::{NewPost, NewReply, Post, Reply, RunStatus, SyncStatus};
use super::retry::{with_retry, RetryPolicy};

// ========== Posts ==========

/// Get a live post by its remote-assigned id.
pub async fn get_post_by_external_id(pool: &SqlitePool, external_id: &str) -> Result<Option<Post>> {
    sqlx::query_as("SELECT * FROM posts WHERE external_id = ? AND deleted_at IS NULL")
        .bind(external_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post by external id")
}

/// Get a post by its internal id.
pub async fn get_post(pool: &SqlitePool, id: i64) -> Result<Option<Post>> {
    sqlx::query_as("SELECT * FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post")
}

/// Insert a new post, returning its internal id.
pub async fn insert_post(pool: &SqlitePool, post: &NewPost) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO posts (
            external_id, title, content, author, author_id, ip,
            like_count, view_count, reply_count,
            radio_group, campus_group, region,
            images, cover, state, tag, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(&post.external_id)
    .bind(&post.title)
    .bind(&post.content)
    .bind(&post.author)
    .bind(&post.author_id)
    .bind(&post.ip)
    .bind(post.like_count)
    .bind(post.view_count)
    .bind(post.reply_count)
    .bind(&post.radio_group)
    .bind(&post.campus_group)
    .bind(&post.region)
    .bind(&post.images)
    .bind(&post.cover)
    .bind(&post.state)
    .bind(&post.tag)
    .bind(&post.created_at)
    .execute(pool)
    .await
    .context("Failed to insert post")?;

    Ok(result.last_insert_rowid())
}

/// Insert or fully overwrite a post, keyed by external id.
///
/// The check-then-write pair runs inside one transaction; re-running the scan
/// over an already-ingested range is idempotent and picks up upstream edits.
///
/// Returns the post's internal id.
pub async fn upsert_post(pool: &SqlitePool, post: &NewPost) -> Result<i64> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM posts WHERE external_id = ? AND deleted_at IS NULL")
            .bind(&post.external_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to check for existing post")?;

    let id = if let Some((id,)) = existing {
        sqlx::query(
            r"
            UPDATE posts
            SET title = ?, content = ?, author = ?, author_id = ?, ip = ?,
                like_count = ?, view_count = ?, reply_count = ?,
                radio_group = ?, campus_group = ?, region = ?,
                images = ?, cover = ?, state = ?, tag = ?,
                updated_at = datetime('now')
            WHERE id = ?
            ",
        )
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.author)
        .bind(&post.author_id)
        .bind(&post.ip)
        .bind(post.like_count)
        .bind(post.view_count)
        .bind(post.reply_count)
        .bind(&post.radio_group)
        .bind(&post.campus_group)
        .bind(&post.region)
        .bind(&post.images)
        .bind(&post.cover)
        .bind(&post.state)
        .bind(&post.tag)
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to update post")?;
        id
    } else {
        let result = sqlx::query(
            r"
            INSERT INTO posts (
                external_id, title, content, author, author_id, ip,
                like_count, view_count, reply_count,
                radio_group, campus_group, region,
                images, cover, state, tag, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&post.external_id)
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.author)
        .bind(&post.author_id)
        .bind(&post.ip)
        .bind(post.like_count)
        .bind(post.view_count)
        .bind(post.reply_count)
        .bind(&post.radio_group)
        .bind(&post.campus_group)
        .bind(&post.region)
        .bind(&post.images)
        .bind(&post.cover)
        .bind(&post.state)
        .bind(&post.tag)
        .bind(&post.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert post")?;
        result.last_insert_rowid()
    };

    tx.commit().await.context("Failed to commit post upsert")?;
    Ok(id)
}

/// Greatest remote post id we have ingested, as an integer.
///
/// Locally-authored unsynced posts (sentinel "0") do not move the cursor.
pub async fn max_external_post_id(pool: &SqlitePool) -> Result<Option<i64>> {
    let row: (Option<i64>,) = sqlx::query_as(
        r"
        SELECT MAX(CAST(external_id AS INTEGER))
        FROM posts
        WHERE deleted_at IS NULL AND external_id != '0'
        ",
    )
    .fetch_one(pool)
    .await
    .context("Failed to fetch max external post id")?;

    Ok(row.0)
}

/// Atomically bump a post's reply counter by one.
pub async fn increment_reply_count(pool: &SqlitePool, post_id: i64) -> Result<()> {
    sqlx::query("UPDATE posts SET reply_count = reply_count + 1 WHERE id = ?")
        .bind(post_id)
        .execute(pool)
        .await
        .context("Failed to increment reply count")?;
    Ok(())
}

/// Rewrite a post's external id after reconciliation.
pub async fn update_post_external_id(pool: &SqlitePool, id: i64, external_id: &str) -> Result<()> {
    sqlx::query("UPDATE posts SET external_id = ?, updated_at = datetime('now') WHERE id = ?")
        .bind(external_id)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update post external id")?;
    Ok(())
}

/// Soft-delete a post (duplicate collapse only; ingestion never deletes).
pub async fn soft_delete_post(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE posts SET deleted_at = datetime('now') WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to soft-delete post")?;
    Ok(())
}

// ========== Replies ==========

/// Get a live reply by its remote-assigned id.
pub async fn get_reply_by_external_id(
    pool: &SqlitePool,
    external_id: &str,
) -> Result<Option<Reply>> {
    sqlx::query_as("SELECT * FROM replies WHERE external_id = ? AND deleted_at IS NULL")
        .bind(external_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch reply by external id")
}

/// Get a reply by its internal id.
pub async fn get_reply(pool: &SqlitePool, id: i64) -> Result<Option<Reply>> {
    sqlx::query_as("SELECT * FROM replies WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch reply")
}

/// Live replies for a post, oldest first.
pub async fn get_replies_for_post(pool: &SqlitePool, post_id: i64) -> Result<Vec<Reply>> {
    sqlx::query_as(
        "SELECT * FROM replies WHERE post_id = ? AND deleted_at IS NULL ORDER BY id ASC",
    )
    .bind(post_id)
    .fetch_all(pool)
    .await
    .context("Failed to fetch replies for post")
}

/// Insert a new reply, returning its internal id.
pub async fn insert_reply(pool: &SqlitePool, reply: &NewReply) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO replies (
            post_id, external_id, content, author, author_id, reply_to,
            level, parent_id, like_count, images, tag, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(reply.post_id)
    .bind(&reply.external_id)
    .bind(&reply.content)
    .bind(&reply.author)
    .bind(&reply.author_id)
    .bind(&reply.reply_to)
    .bind(reply.level)
    .bind(reply.parent_id)
    .bind(reply.like_count)
    .bind(&reply.images)
    .bind(&reply.tag)
    .bind(&reply.created_at)
    .execute(pool)
    .await
    .context("Failed to insert reply")?;

    Ok(result.last_insert_rowid())
}

/// Insert replies in chunks of `batch_size` rows per statement.
pub async fn insert_replies_batch(
    pool: &SqlitePool,
    replies: &[NewReply],
    batch_size: usize,
) -> Result<()> {
    if replies.is_empty() {
        return Ok(());
    }

    for chunk in replies.chunks(batch_size.max(1)) {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "INSERT INTO replies (post_id, external_id, content, author, author_id, \
             reply_to, level, parent_id, like_count, images, tag, created_at) ",
        );
        builder.push_values(chunk, |mut b, reply| {
            b.push_bind(reply.post_id)
                .push_bind(&reply.external_id)
                .push_bind(&reply.content)
                .push_bind(&reply.author)
                .push_bind(&reply.author_id)
                .push_bind(&reply.reply_to)
                .push_bind(reply.level)
                .push_bind(reply.parent_id)
                .push_bind(reply.like_count)
                .push_bind(&reply.images)
                .push_bind(&reply.tag)
                .push_bind(&reply.created_at);
        });

        builder
            .build()
            .execute(pool)
            .await
            .context("Failed to batch-insert replies")?;
    }

    Ok(())
}

/// Insert a reply batch, falling back to row-at-a-time inserts when the
/// batched write fails so one bad row cannot block the rest.
///
/// Both paths retry under lock contention. Rows that still fail (e.g. a
/// duplicate external id slipping past dedup in a race) are logged and
/// dropped. Returns the number of rows written via the fallback, or the full
/// batch size when the batched write succeeds.
pub async fn insert_replies_with_fallback(
    pool: &SqlitePool,
    policy: RetryPolicy,
    replies: &[NewReply],
    batch_size: usize,
) -> usize {
    if replies.is_empty() {
        return 0;
    }

    match with_retry(policy, || insert_replies_batch(pool, replies, batch_size)).await {
        Ok(()) => replies.len(),
        Err(e) => {
            warn!("Batch insert failed, falling back to single inserts: {e:#}");
            let mut written = 0;
            for reply in replies {
                match with_retry(policy, || insert_reply(pool, reply)).await {
                    Ok(_) => written += 1,
                    Err(e) => {
                        warn!(external_id = %reply.external_id, "Failed to save reply: {e:#}");
                    }
                }
            }
            written
        }
    }
}

/// Rewrite a reply's external id after reconciliation.
pub async fn update_reply_external_id(pool: &SqlitePool, id: i64, external_id: &str) -> Result<()> {
    sqlx::query("UPDATE replies SET external_id = ?, updated_at = datetime('now') WHERE id = ?")
        .bind(external_id)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update reply external id")?;
    Ok(())
}

/// Soft-delete a reply (duplicate collapse only).
pub async fn soft_delete_reply(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE replies SET deleted_at = datetime('now') WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to soft-delete reply")?;
    Ok(())
}

// ========== Sync status ledger ==========

/// Record the start of an ingestion run.
///
/// The row is written through a transaction so the ledger never holds a
/// half-written entry.
pub async fn insert_sync_status_running(pool: &SqlitePool, started_at: &str) -> Result<i64> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let result = sqlx::query("INSERT INTO sync_statuses (started_at, status) VALUES (?, ?)")
        .bind(started_at)
        .bind(RunStatus::Running.as_str())
        .execute(&mut *tx)
        .await
        .context("Failed to insert running sync status")?;

    tx.commit()
        .await
        .context("Failed to commit sync status insert")?;
    Ok(result.last_insert_rowid())
}

/// Record the terminal outcome of an ingestion run as a fresh ledger row.
pub async fn insert_sync_status_finished(
    pool: &SqlitePool,
    started_at: &str,
    last_post_external_id: &str,
    total_posts: i64,
    total_replies: i64,
    status: RunStatus,
    error_message: &str,
) -> Result<i64> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let result = sqlx::query(
        r"
        INSERT INTO sync_statuses (
            started_at, last_post_external_id, total_posts, total_replies,
            status, error_message
        )
        VALUES (?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(started_at)
    .bind(last_post_external_id)
    .bind(total_posts)
    .bind(total_replies)
    .bind(status.as_str())
    .bind(error_message)
    .execute(&mut *tx)
    .await
    .context("Failed to insert finished sync status")?;

    tx.commit()
        .await
        .context("Failed to commit sync status insert")?;
    Ok(result.last_insert_rowid())
}

/// Most recent ledger row of any status; the engine's health signal.
pub async fn latest_sync_status(pool: &SqlitePool) -> Result<Option<SyncStatus>> {
    sqlx::query_as("SELECT * FROM sync_statuses ORDER BY id DESC LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to fetch latest sync status")
}

/// Start time of the most recent completed run (non-running), used to bound
/// the reply-rescan window.
pub async fn last_checkpoint_time(pool: &SqlitePool) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT started_at FROM sync_statuses WHERE status != 'running' ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await
    .context("Failed to fetch last checkpoint time")?;

    Ok(row.map(|(t,)| t))
}
