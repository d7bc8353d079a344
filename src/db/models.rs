use serde::{Deserialize, Serialize};

/// External identity sentinel for rows not yet reconciled with the remote.
pub const EXTERNAL_ID_UNSYNCED: &str = "0";

/// A mirrored (or locally-authored) forum thread.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub author_id: String,
    pub ip: String,
    pub like_count: i64,
    pub view_count: i64,
    pub reply_count: i64,
    pub radio_group: String,
    pub campus_group: String,
    pub region: String,
    pub images: String,
    pub cover: String,
    pub state: String,
    pub tag: String,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl Post {
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.external_id != EXTERNAL_ID_UNSYNCED
    }
}

/// One comment, owned by exactly one post.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reply {
    pub id: i64,
    pub post_id: i64,
    pub external_id: String,
    pub content: String,
    pub author: String,
    pub author_id: String,
    pub reply_to: String,
    pub level: i64,
    pub parent_id: i64,
    pub like_count: i64,
    pub images: String,
    pub tag: String,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl Reply {
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.external_id != EXTERNAL_ID_UNSYNCED
    }
}

/// Derived moderation state of a post, first true flag wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostState {
    Normal,
    Deleted,
    Complaint,
    Chosen,
    Hot,
}

impl PostState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Deleted => "deleted",
            Self::Complaint => "complaint",
            Self::Chosen => "chosen",
            Self::Hot => "hot",
        }
    }
}

/// Outcome of an ingestion run in the status ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Success,
    Error,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Append-only ledger row, one per ingestion run start and end.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncStatus {
    pub id: i64,
    pub started_at: String,
    pub last_post_external_id: String,
    pub total_posts: i64,
    pub total_replies: i64,
    pub status: String,
    pub error_message: String,
    pub created_at: String,
}

/// Data for inserting a new post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub external_id: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub author_id: String,
    pub ip: String,
    pub like_count: i64,
    pub view_count: i64,
    pub reply_count: i64,
    pub radio_group: String,
    pub campus_group: String,
    pub region: String,
    pub images: String,
    pub cover: String,
    pub state: String,
    pub tag: String,
    pub created_at: String,
}

/// Data for inserting a new reply.
#[derive(Debug, Clone)]
pub struct NewReply {
    pub post_id: i64,
    pub external_id: String,
    pub content: String,
    pub author: String,
    pub author_id: String,
    pub reply_to: String,
    pub level: i64,
    pub parent_id: i64,
    pub like_count: i64,
    pub images: String,
    pub tag: String,
    pub created_at: String,
}
