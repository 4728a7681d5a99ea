//! Archive entity graph.
//!
//! These records are produced fresh by every conversion of a remote snapshot
//! and are immutable afterwards. `Forum` and `Author` are shared by `Arc`
//! between every post that references them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Forum a thread was posted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forum {
    pub id: i64,
    pub name: String,
}

/// Author of a thread, post or sub-reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    /// Avatar image URL.
    #[serde(default)]
    pub portrait: Option<String>,
}

/// Identity of an archived thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: i64,
    pub title: String,
    pub forum: Arc<Forum>,
    pub author: Arc<Author>,
}

/// One piece of post content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentSpan {
    Text {
        text: String,
    },
    Link {
        text: String,
        url: String,
    },
    Emoticon {
        id: String,
        text: String,
    },
    Mention {
        user_id: i64,
        text: String,
    },
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
    },
    Audio {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    Video {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thumbnail_url: Option<String>,
    },
}

impl ContentSpan {
    /// Media asset referenced by this span, if any.
    #[must_use]
    pub fn asset(&self) -> Option<AssetRef> {
        match self {
            Self::Image { url, .. } => Some(AssetRef::new(AssetKind::Image, url)),
            Self::Audio { url, .. } => Some(AssetRef::new(AssetKind::Audio, url)),
            Self::Video { url, .. } => Some(AssetRef::new(AssetKind::Video, url)),
            Self::Text { .. } | Self::Link { .. } | Self::Emoticon { .. } | Self::Mention { .. } => {
                None
            }
        }
    }
}

/// A reply nested under a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubReply {
    pub id: i64,
    pub author: Arc<Author>,
    pub content: Vec<ContentSpan>,
    pub created_at: DateTime<Utc>,
}

/// A top-level post ("floor") of a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub floor: u32,
    pub author: Arc<Author>,
    pub content: Vec<ContentSpan>,
    pub created_at: DateTime<Utc>,
    pub sub_replies: Vec<SubReply>,
}

/// A converted thread, ready to be merged into a local archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveThread {
    pub thread: ThreadInfo,
    pub posts: Vec<Post>,
}

/// Kind of media asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Audio,
    Video,
    Portrait,
}

impl AssetKind {
    pub const ALL: [AssetKind; 4] = [Self::Image, Self::Audio, Self::Video, Self::Portrait];

    /// Directory under the assets root holding this kind.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Audio => "audios",
            Self::Video => "videos",
            Self::Portrait => "portraits",
        }
    }
}

/// Which asset kinds a store downloads. A disabled kind is skipped even when referenced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveOptions {
    #[serde(default)]
    pub images: bool,
    #[serde(default)]
    pub audios: bool,
    #[serde(default)]
    pub videos: bool,
    #[serde(default)]
    pub portraits: bool,
}

impl ArchiveOptions {
    /// Every asset kind enabled.
    #[must_use]
    pub fn all() -> Self {
        Self {
            images: true,
            audios: true,
            videos: true,
            portraits: true,
        }
    }

    #[must_use]
    pub fn is_enabled(&self, kind: AssetKind) -> bool {
        match kind {
            AssetKind::Image => self.images,
            AssetKind::Audio => self.audios,
            AssetKind::Video => self.videos,
            AssetKind::Portrait => self.portraits,
        }
    }
}

/// Reference to a remote media asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetRef {
    pub kind: AssetKind,
    pub url: String,
}

impl AssetRef {
    #[must_use]
    pub fn new(kind: AssetKind, url: &str) -> Self {
        Self {
            kind,
            url: url.to_string(),
        }
    }

    /// Stable local file name derived from the remote URL.
    ///
    /// The SHA256 of the URL keeps repeated downloads of the same reference
    /// landing on the same file; a short alphanumeric extension from the URL
    /// path is kept so the file stays openable.
    #[must_use]
    pub fn file_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.url.as_bytes());
        let stem = hex::encode(hasher.finalize());

        match url_extension(&self.url) {
            Some(ext) => format!("{stem}.{ext}"),
            None => stem,
        }
    }
}

fn url_extension(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
