//! Remote read boundary: paged posts and paged nested replies of a thread.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteForum {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portrait: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteThreadInfo {
    pub id: i64,
    pub title: String,
    pub forum: RemoteForum,
    pub author_id: i64,
}

/// A content span as the API returns it: a type tag plus loosely populated fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSpan {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSubReply {
    pub id: i64,
    pub author: RemoteUser,
    #[serde(default)]
    pub content: Vec<RemoteSpan>,
    /// Unix timestamp, seconds.
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePost {
    pub id: i64,
    pub floor: u32,
    pub author_id: i64,
    #[serde(default)]
    pub content: Vec<RemoteSpan>,
    /// Unix timestamp, seconds.
    pub created_at: i64,
    /// Nested replies the post has in total.
    #[serde(default)]
    pub sub_reply_count: u32,
    /// Preview of the first nested replies embedded in the page.
    #[serde(default)]
    pub sub_replies: Vec<RemoteSubReply>,
}

/// One page of top-level posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostsPage {
    pub thread: RemoteThreadInfo,
    /// Thread-wide post count.
    pub total_posts: u64,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub users: Vec<RemoteUser>,
    #[serde(default)]
    pub posts: Vec<RemotePost>,
}

/// One page of a post's nested replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubRepliesPage {
    pub total: u64,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub sub_replies: Vec<RemoteSubReply>,
}

/// Source of thread pages. Pages are 1-based.
#[async_trait]
pub trait ThreadApi: Send + Sync {
    /// Fetch one page of top-level posts.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::ThreadNotFound`] if the thread does not exist,
    /// or another variant on transport or decode failure.
    async fn get_posts(
        &self,
        thread_id: i64,
        page: u32,
        page_size: u32,
    ) -> Result<PostsPage, RemoteError>;

    /// Fetch one page of a post's nested replies.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::PostNotFound`] if the post does not exist,
    /// otherwise as [`ThreadApi::get_posts`].
    async fn get_sub_replies(
        &self,
        thread_id: i64,
        post_id: i64,
        page: u32,
        page_size: u32,
    ) -> Result<SubRepliesPage, RemoteError>;
}
