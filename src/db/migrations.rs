use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating initial schema");

    // Mirrored forum threads. external_id "0" marks a locally-authored post
    // that has not been reconciled with the remote system yet.
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT NOT NULL DEFAULT '0',
            title TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            author TEXT NOT NULL DEFAULT '',
            author_id TEXT NOT NULL DEFAULT '',
            ip TEXT NOT NULL DEFAULT '',
            like_count INTEGER NOT NULL DEFAULT 0,
            view_count INTEGER NOT NULL DEFAULT 0,
            reply_count INTEGER NOT NULL DEFAULT 0,
            radio_group TEXT NOT NULL DEFAULT '',
            campus_group TEXT NOT NULL DEFAULT '',
            region TEXT NOT NULL DEFAULT '',
            images TEXT NOT NULL DEFAULT '[]',
            cover TEXT NOT NULL DEFAULT '[]',
            state TEXT NOT NULL DEFAULT 'normal',
            tag TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            deleted_at TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create posts table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS replies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id INTEGER NOT NULL REFERENCES posts(id),
            external_id TEXT NOT NULL DEFAULT '0',
            content TEXT NOT NULL DEFAULT '',
            author TEXT NOT NULL DEFAULT '',
            author_id TEXT NOT NULL DEFAULT '',
            reply_to TEXT NOT NULL DEFAULT '',
            level INTEGER NOT NULL DEFAULT 1,
            parent_id INTEGER NOT NULL DEFAULT 0,
            like_count INTEGER NOT NULL DEFAULT 0,
            images TEXT NOT NULL DEFAULT '[]',
            tag TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            deleted_at TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create replies table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS sync_statuses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            last_post_external_id TEXT NOT NULL DEFAULT '',
            total_posts INTEGER NOT NULL DEFAULT 0,
            total_replies INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'running',
            error_message TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create sync_statuses table")?;

    Ok(())
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: indexes for external-id lookups");

    // Lookups by external id are on the hot path of every scan and every
    // reply dedup check. Partial unique index: the '0' sentinel repeats, and
    // soft-deleted rows release their external id.
    sqlx::query(
        r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_posts_external_id
        ON posts(external_id)
        WHERE external_id != '0' AND deleted_at IS NULL
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create posts external_id index")?;

    sqlx::query(
        r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_replies_external_id
        ON replies(external_id)
        WHERE external_id != '0' AND deleted_at IS NULL
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create replies external_id index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_replies_post_id ON replies(post_id)")
        .execute(pool)
        .await
        .context("Failed to create replies post_id index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_statuses_status ON sync_statuses(status)")
        .execute(pool)
        .await
        .context("Failed to create sync_statuses status index")?;

    Ok(())
}
