//! On-disk layout and serialized forms of a store.
//!
//! ```text
//! <root>/
//!   manifest.json            version marker, generation, options, thread identity
//!   posts-<generation>.json  authors and posts of that generation
//!   assets/<kind>/<sha256(url)>[.ext]
//! ```
//!
//! `manifest.json` is the commit point: it names the posts file that belongs
//! to it, so a newer posts file without a matching manifest is ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{ASSETS_DIR, MANIFEST_FILE, TMP_SUFFIX};
use crate::error::{ArchiveError, Result};
use crate::models::{ArchiveOptions, AssetRef, Author, ContentSpan, Post, SubReply, ThreadInfo};

const POSTS_PREFIX: &str = "posts-";
const POSTS_SUFFIX: &str = ".json";

#[must_use]
pub fn manifest_path(root: &Path) -> PathBuf {
    root.join(MANIFEST_FILE)
}

#[must_use]
pub fn posts_path(root: &Path, generation: u64) -> PathBuf {
    root.join(format!("{POSTS_PREFIX}{generation}{POSTS_SUFFIX}"))
}

#[must_use]
pub fn asset_path(root: &Path, asset: &AssetRef) -> PathBuf {
    root.join(ASSETS_DIR)
        .join(asset.kind.dir_name())
        .join(asset.file_name())
}

/// Whether `name` is a file a dump at `generation` leaves behind as garbage.
#[must_use]
pub fn is_stale_file(name: &str, generation: u64) -> bool {
    if name.ends_with(TMP_SUFFIX) {
        return true;
    }
    name.strip_prefix(POSTS_PREFIX)
        .and_then(|rest| rest.strip_suffix(POSTS_SUFFIX))
        .and_then(|n| n.parse::<u64>().ok())
        .is_some_and(|n| n != generation)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    /// Generation of the posts file; 0 means no posts have been written yet.
    pub generation: u64,
    #[serde(default)]
    pub options: ArchiveOptions,
    #[serde(default)]
    pub thread: Option<ThreadInfo>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostsFile {
    pub authors: Vec<Author>,
    pub posts: Vec<StoredPost>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoredPost {
    pub id: i64,
    pub floor: u32,
    pub author_id: i64,
    pub content: Vec<ContentSpan>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sub_replies: Vec<StoredSubReply>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoredSubReply {
    pub id: i64,
    pub author_id: i64,
    pub content: Vec<ContentSpan>,
    pub created_at: DateTime<Utc>,
}

impl PostsFile {
    /// Flatten posts into the stored form, listing each author once.
    #[must_use]
    pub fn from_posts(posts: &[Post]) -> Self {
        let mut authors = BTreeMap::new();
        let mut remember = |author: &Arc<Author>| {
            authors
                .entry(author.id)
                .or_insert_with(|| Author::clone(author));
            author.id
        };

        let posts = posts
            .iter()
            .map(|post| StoredPost {
                id: post.id,
                floor: post.floor,
                author_id: remember(&post.author),
                content: post.content.clone(),
                created_at: post.created_at,
                sub_replies: post
                    .sub_replies
                    .iter()
                    .map(|reply| StoredSubReply {
                        id: reply.id,
                        author_id: remember(&reply.author),
                        content: reply.content.clone(),
                        created_at: reply.created_at,
                    })
                    .collect(),
            })
            .collect();

        Self {
            authors: authors.into_values().collect(),
            posts,
        }
    }

    /// Rebuild posts with shared author records.
    ///
    /// # Errors
    ///
    /// Fails with [`ArchiveError::ConversionInconsistent`] if a post names an
    /// author the file does not list.
    pub fn into_posts(self, path: &Path) -> Result<Vec<Post>> {
        let authors: BTreeMap<i64, Arc<Author>> = self
            .authors
            .into_iter()
            .map(|author| (author.id, Arc::new(author)))
            .collect();
        let lookup = |id: i64| {
            authors.get(&id).cloned().ok_or_else(|| {
                ArchiveError::ConversionInconsistent(format!(
                    "{} references unknown author {id}",
                    path.display()
                ))
            })
        };

        self.posts
            .into_iter()
            .map(|post| {
                let sub_replies = post
                    .sub_replies
                    .into_iter()
                    .map(|reply| {
                        Ok(SubReply {
                            id: reply.id,
                            author: lookup(reply.author_id)?,
                            content: reply.content,
                            created_at: reply.created_at,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Post {
                    id: post.id,
                    floor: post.floor,
                    author: lookup(post.author_id)?,
                    content: post.content,
                    created_at: post.created_at,
                    sub_replies,
                })
            })
            .collect()
    }
}
