//! Client for the remote tree-hole HTTP API.
//!
//! Reads go through a direct client. Writes (`addtask`/`addcomment`) carry
//! the author's identity and go through a separate client that uses the
//! configured proxy when one is enabled. The write API is GET with
//! query-encoded fields and returns no structured payload; only a 2xx status
//! is checked.

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::config::Config;

/// Feed filter the remote expects on `gettaskbyType` queries.
const FEED_GROUPS: &str = r#"["radio4","radio40","radio41","radio42","radio43"]"#;

/// Avatar attached to posts submitted on behalf of local authors.
const DEFAULT_AVATAR: &str = "http://yqtech.ltd/animal/4.png";

/// Envelope of every remote response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiResponse {
    #[serde(default, rename = "taskList")]
    pub task_list: Vec<RemoteTask>,
    #[serde(default, rename = "commentList")]
    pub comment_list: Vec<RemoteComment>,
}

/// A remote post as it appears on the wire. Never persisted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteTask {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub openid: String,
    #[serde(default, rename = "campusGroup")]
    pub campus_group: String,
    #[serde(default, rename = "commentNum")]
    pub comment_num: i64,
    #[serde(default, rename = "watchNum")]
    pub watch_num: i64,
    #[serde(default, rename = "likeNum")]
    pub like_num: i64,
    #[serde(default, rename = "radioGroup")]
    pub radio_group: String,
    #[serde(default, rename = "img")]
    pub images: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub is_delete: i64,
    #[serde(default)]
    pub is_complaint: i64,
    #[serde(default)]
    pub region: String,
    #[serde(default, rename = "userName")]
    pub user_name: String,
    #[serde(default)]
    pub c_time: String,
    #[serde(default)]
    pub comment_time: String,
    #[serde(default)]
    pub choose: i64,
    #[serde(default)]
    pub hot: i64,
}

/// A remote comment, self-referential one level deep. Never persisted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteComment {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub openid: String,
    #[serde(default, rename = "applyTo")]
    pub apply_to: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub pk: i64,
    #[serde(default, rename = "userName")]
    pub user_name: String,
    #[serde(default)]
    pub c_time: String,
    #[serde(default, rename = "img")]
    pub images: String,
    /// The remote emits this as either a JSON string or a number.
    #[serde(default)]
    pub level: Option<RawLevel>,
    #[serde(default)]
    pub pid: i64,
    #[serde(default)]
    pub like_num: i64,
    #[serde(default, rename = "commentList")]
    pub comment_list: Vec<RemoteComment>,
}

/// Polymorphic `level` field at the deserialization boundary.
///
/// Must not leak past ingestion; callers normalize with [`RawLevel::normalize`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawLevel {
    Int(i64),
    Float(f64),
    Text(String),
    Other(serde_json::Value),
}

impl RawLevel {
    /// Collapse to a definite integer, defaulting to 1 on any unparseable shape.
    #[must_use]
    pub fn normalize(&self) -> i64 {
        match self {
            Self::Int(n) => *n,
            Self::Float(f) => *f as i64,
            Self::Text(s) => s.trim().parse().unwrap_or(1),
            Self::Other(_) => 1,
        }
    }
}

/// Fields for submitting a locally-authored post.
#[derive(Debug, Clone)]
pub struct PostSubmission {
    pub c_time: String,
    pub content: String,
    pub title: String,
    pub user_name: String,
    pub openid: String,
    pub watch_num: i64,
}

/// Fields for submitting a locally-authored reply.
#[derive(Debug, Clone)]
pub struct CommentSubmission {
    pub c_time: String,
    pub openid: String,
    /// External id of the owning post.
    pub post_external_id: String,
    pub comment: String,
    pub user_name: String,
    pub apply_to: String,
    pub level: i64,
    /// External id of the parent comment, 0 for top-level replies.
    pub parent_external_id: i64,
}

#[derive(Debug, Clone)]
pub struct RemoteClient {
    read: reqwest::Client,
    write: reqwest::Client,
    base_url: String,
}

impl RemoteClient {
    /// Build the read and write transports from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a client cannot be constructed or the proxy URL is
    /// invalid.
    pub fn new(config: &Config) -> Result<Self> {
        let read = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build read HTTP client")?;

        let mut write_builder = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone());
        if config.proxy_enabled {
            if let Some(proxy_url) = config.proxy_url.as_deref() {
                let proxy = reqwest::Proxy::all(proxy_url)
                    .with_context(|| format!("Invalid proxy URL: {proxy_url}"))?;
                write_builder = write_builder.proxy(proxy);
            }
        }
        let write = write_builder
            .build()
            .context("Failed to build write HTTP client")?;

        Ok(Self {
            read,
            write,
            base_url: config.source_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, url: Url) -> Result<ApiResponse> {
        let response = self
            .read
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url.path()))?;

        if !response.status().is_success() {
            anyhow::bail!("{} returned status {}", url.path(), response.status());
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to decode response from {}", url.path()))
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}/{path}", self.base_url))
            .with_context(|| format!("Invalid endpoint URL for {path}"))
    }

    /// Top-of-feed query; returns the greatest remote post id, 0 when the
    /// feed is empty.
    pub async fn fetch_max_id(&self) -> Result<i64> {
        let mut url = self.endpoint("gettaskbyType")?;
        url.query_pairs_mut()
            .append_pair("length", "0")
            .append_pair("radioGroup", FEED_GROUPS)
            .append_pair("type", "0");

        let response = self.get(url).await?;
        Ok(response.task_list.first().map_or(0, |task| task.id))
    }

    /// Fetch one post by remote id. `None` means the id does not exist (or
    /// the post was removed) — not an error.
    pub async fn fetch_post(&self, id: i64) -> Result<Option<RemoteTask>> {
        let mut url = self.endpoint("gettaskbyId")?;
        url.query_pairs_mut().append_pair("pk", &id.to_string());

        let mut response = self.get(url).await?;
        Ok(if response.task_list.is_empty() {
            None
        } else {
            Some(response.task_list.swap_remove(0))
        })
    }

    /// Fetch a post's complete comment set, paging with an increasing offset
    /// until the remote returns an empty page.
    pub async fn fetch_comments(&self, post_id: i64) -> Result<Vec<RemoteComment>> {
        let mut all = Vec::new();
        let mut offset = 0usize;

        loop {
            let mut url = self.endpoint("getCommentByType")?;
            url.query_pairs_mut()
                .append_pair("length", &offset.to_string())
                .append_pair("pk", &post_id.to_string())
                .append_pair("type", "0");

            let response = self.get(url).await?;
            if response.comment_list.is_empty() {
                break;
            }

            offset += response.comment_list.len();
            all.extend(response.comment_list);
        }

        Ok(all)
    }

    /// Posts the remote flags as having received new replies.
    pub async fn fetch_posts_with_new_replies(&self) -> Result<Vec<RemoteTask>> {
        let mut url = self.endpoint("gettaskbyType")?;
        url.query_pairs_mut()
            .append_pair("length", "0")
            .append_pair("radioGroup", FEED_GROUPS)
            .append_pair("type", "1");

        let response = self.get(url).await?;
        Ok(response.task_list)
    }

    /// Most recent remote post by the given author identity.
    pub async fn fetch_latest_post_by_author(&self, openid: &str) -> Result<Option<RemoteTask>> {
        let mut url = self.endpoint("gettaskbyOpenId")?;
        url.query_pairs_mut()
            .append_pair("openid", openid)
            .append_pair("length", "0");

        let mut response = self.get(url).await?;
        Ok(if response.task_list.is_empty() {
            None
        } else {
            Some(response.task_list.swap_remove(0))
        })
    }

    /// Most recent remote comment by the given author identity.
    pub async fn fetch_latest_comment_by_author(
        &self,
        openid: &str,
    ) -> Result<Option<RemoteComment>> {
        let mut url = self.endpoint("getCommentByOpenid")?;
        url.query_pairs_mut()
            .append_pair("openid", openid)
            .append_pair("length", "0");

        let mut response = self.get(url).await?;
        Ok(if response.comment_list.is_empty() {
            None
        } else {
            Some(response.comment_list.swap_remove(0))
        })
    }

    /// Submit a locally-authored post. The response body carries no assigned
    /// id; discovery runs separately.
    pub async fn submit_post(&self, submission: &PostSubmission) -> Result<()> {
        let mut url = self.endpoint("addtask")?;
        url.query_pairs_mut()
            .append_pair("c_time", &submission.c_time)
            .append_pair("content", &submission.content)
            .append_pair("price", "")
            .append_pair("title", &submission.title)
            .append_pair("wechat", "")
            .append_pair("avatar", DEFAULT_AVATAR)
            .append_pair("radioGroup", "radio40")
            .append_pair("campusGroup", "2")
            .append_pair("userName", &submission.user_name)
            .append_pair("img", "[]")
            .append_pair("cover", "[]")
            .append_pair("region", "0")
            .append_pair("likeNum", "0")
            .append_pair("commentNum", "0")
            .append_pair("watchNum", &submission.watch_num.to_string())
            .append_pair("openid", &submission.openid);

        self.submit(url).await
    }

    /// Submit a locally-authored reply; parents are addressed by their
    /// remote-assigned ids.
    pub async fn submit_comment(&self, submission: &CommentSubmission) -> Result<()> {
        let mut url = self.endpoint("addcomment")?;
        url.query_pairs_mut()
            .append_pair("c_time", &submission.c_time)
            .append_pair("openid", &submission.openid)
            .append_pair("pk", &submission.post_external_id)
            .append_pair("comment", &submission.comment)
            .append_pair("userName", &submission.user_name)
            .append_pair("avatar", DEFAULT_AVATAR)
            .append_pair("applyTo", &submission.apply_to)
            .append_pair("img", "[]")
            .append_pair("level", &submission.level.to_string())
            .append_pair("pid", &submission.parent_external_id.to_string());

        self.submit(url).await
    }

    async fn submit(&self, url: Url) -> Result<()> {
        let response = self
            .write
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to submit to {}", url.path()))?;

        if !response.status().is_success() {
            anyhow::bail!("{} returned status {}", url.path(), response.status());
        }

        Ok(())
    }
}
