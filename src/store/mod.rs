//! Versioned local store of one archived thread.

mod detect;
pub mod layout;

pub use detect::{detect, ArchiveVersion, Detected};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::constants::ASSETS_DIR;
use crate::error::{ArchiveError, Result};
use crate::fs_utils::{is_dir_empty, remove_matching_best_effort, write_atomic};
use crate::models::{ArchiveOptions, ArchiveThread, Post, ThreadInfo};

use self::layout::{is_stale_file, manifest_path, posts_path, Manifest, PostsFile};

/// Counts of what a merge added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub new_posts: usize,
    pub new_sub_replies: usize,
}

impl MergeStats {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_posts == 0 && self.new_sub_replies == 0
    }
}

/// An opened store. Owns its directory exclusively for its lifetime.
#[derive(Debug)]
pub struct LocalArchive {
    root: PathBuf,
    version: ArchiveVersion,
    generation: u64,
    options: ArchiveOptions,
    thread: Option<ThreadInfo>,
    posts: Vec<Post>,
    index: HashMap<i64, usize>,
}

impl LocalArchive {
    /// Open an existing store at the current version.
    ///
    /// # Errors
    ///
    /// Fails with [`ArchiveError::NotAnArchive`] or
    /// [`ArchiveError::UnsupportedVersion`] without touching the directory,
    /// or with a store error if its files cannot be read.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let version = require_supported(&root).await?;

        let manifest: Manifest = read_json(&manifest_path(&root)).await?;
        let posts = if manifest.generation == 0 {
            Vec::new()
        } else {
            let path = posts_path(&root, manifest.generation);
            read_json::<PostsFile>(&path).await?.into_posts(&path)?
        };

        info!(
            path = %root.display(),
            %version,
            generation = manifest.generation,
            posts = posts.len(),
            "Opened local archive"
        );

        let index = build_index(&posts);
        Ok(Self {
            root,
            version,
            generation: manifest.generation,
            options: manifest.options,
            thread: manifest.thread,
            posts,
            index,
        })
    }

    /// Create a new store in an empty (or missing) directory.
    ///
    /// Writes only the version marker; thread data arrives with the first
    /// [`update`](Self::update) and [`dump`](Self::dump).
    ///
    /// # Errors
    ///
    /// Fails with [`ArchiveError::DirectoryNotEmpty`] without touching the
    /// directory if it has any entry.
    pub async fn create(path: impl AsRef<Path>, options: ArchiveOptions) -> Result<Self> {
        let root = path.as_ref().to_path_buf();

        if !is_dir_empty(&root)
            .await
            .map_err(|e| ArchiveError::io(&root, e))?
        {
            return Err(ArchiveError::DirectoryNotEmpty { path: root });
        }
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| ArchiveError::io(&root, e))?;

        let archive = Self {
            root,
            version: ArchiveVersion::CURRENT,
            generation: 0,
            options,
            thread: None,
            posts: Vec::new(),
            index: HashMap::new(),
        };
        archive.write_manifest(0).await?;

        info!(path = %archive.root.display(), "Created local archive");
        Ok(archive)
    }

    /// Merge a converted thread into the in-memory state. Never touches disk.
    ///
    /// Posts are keyed by id and sub-replies by id within their post: unseen
    /// ids are appended in the order given, known ids are left as they are.
    /// The thread identity is replaced wholesale.
    pub fn update(&mut self, thread: ArchiveThread) -> MergeStats {
        let mut stats = MergeStats::default();

        for post in thread.posts {
            if let Some(&position) = self.index.get(&post.id) {
                let existing = &mut self.posts[position];
                let mut known: HashSet<i64> =
                    existing.sub_replies.iter().map(|reply| reply.id).collect();
                for reply in post.sub_replies {
                    if known.insert(reply.id) {
                        existing.sub_replies.push(reply);
                        stats.new_sub_replies += 1;
                    }
                }
            } else {
                self.index.insert(post.id, self.posts.len());
                stats.new_posts += 1;
                stats.new_sub_replies += post.sub_replies.len();
                self.posts.push(post);
            }
        }

        self.thread = Some(thread.thread);
        debug!(
            new_posts = stats.new_posts,
            new_sub_replies = stats.new_sub_replies,
            "Merged thread into archive"
        );
        stats
    }

    /// Persist the in-memory state.
    ///
    /// The posts go to a new generation file first; the manifest naming it is
    /// then atomically replaced. A crash at any point leaves either the old or
    /// the new state readable by [`open`](Self::open).
    ///
    /// # Errors
    ///
    /// Fails with [`ArchiveError::StoreIo`] if a write fails; the previous
    /// on-disk state stays intact.
    pub async fn dump(&mut self) -> Result<()> {
        let next = self.generation + 1;

        let path = posts_path(&self.root, next);
        let body = serde_json::to_vec(&PostsFile::from_posts(&self.posts))
            .map_err(|source| ArchiveError::StoreCorrupt {
                path: path.clone(),
                source,
            })?;
        write_atomic(&path, &body)
            .await
            .map_err(|e| ArchiveError::io(&path, e))?;

        self.write_manifest(next).await?;
        self.generation = next;

        remove_matching_best_effort(&self.root, |name| is_stale_file(name, next)).await;

        info!(
            path = %self.root.display(),
            generation = next,
            posts = self.posts.len(),
            "Archive written"
        );
        Ok(())
    }

    async fn write_manifest(&self, generation: u64) -> Result<()> {
        let manifest = Manifest {
            version: self.version.0,
            generation,
            options: self.options,
            thread: self.thread.clone(),
            updated_at: Some(Utc::now()),
        };
        let path = manifest_path(&self.root);
        let body = serde_json::to_vec_pretty(&manifest).map_err(|source| {
            ArchiveError::StoreCorrupt {
                path: path.clone(),
                source,
            }
        })?;
        write_atomic(&path, &body)
            .await
            .map_err(|e| ArchiveError::io(&path, e))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn version(&self) -> ArchiveVersion {
        self.version
    }

    #[must_use]
    pub fn thread_info(&self) -> Option<&ThreadInfo> {
        self.thread.as_ref()
    }

    #[must_use]
    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    #[must_use]
    pub fn options(&self) -> ArchiveOptions {
        self.options
    }

    /// Change which asset kinds are downloaded. Persisted by the next dump.
    pub fn set_archive_options(&mut self, options: ArchiveOptions) {
        self.options = options;
    }

    #[must_use]
    pub fn assets_dir(&self) -> PathBuf {
        self.root.join(ASSETS_DIR)
    }
}

/// Read just the thread identity of the store at `path`, without loading posts.
///
/// Returns `None` for a store that was created but never synchronized.
///
/// # Errors
///
/// Same version checks as [`LocalArchive::open`].
pub async fn read_thread_info(path: impl AsRef<Path>) -> Result<Option<ThreadInfo>> {
    let root = path.as_ref();
    require_supported(root).await?;
    let manifest: Manifest = read_json(&manifest_path(root)).await?;
    Ok(manifest.thread)
}

async fn require_supported(root: &Path) -> Result<ArchiveVersion> {
    match detect(root).await {
        Detected::Supported(version) => Ok(version),
        Detected::Unsupported(version) => Err(ArchiveError::UnsupportedVersion {
            path: root.to_path_buf(),
            version,
        }),
        Detected::NotAnArchive => Err(ArchiveError::NotAnArchive {
            path: root.to_path_buf(),
        }),
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ArchiveError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|source| ArchiveError::StoreCorrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn build_index(posts: &[Post]) -> HashMap<i64, usize> {
    posts
        .iter()
        .enumerate()
        .map(|(position, post)| (post.id, position))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::DateTime;
    use tempfile::TempDir;

    use super::*;
    use crate::models::{Author, ContentSpan, Forum, SubReply};

    fn author(id: i64) -> Arc<Author> {
        Arc::new(Author {
            id,
            name: format!("user{id}"),
            display_name: format!("User {id}"),
            portrait: None,
        })
    }

    fn thread_info(title: &str) -> ThreadInfo {
        ThreadInfo {
            id: 100,
            title: title.to_string(),
            forum: Arc::new(Forum {
                id: 1,
                name: "rust".to_string(),
            }),
            author: author(1),
        }
    }

    fn post(id: i64, text: &str, replies: &[i64]) -> Post {
        Post {
            id,
            floor: u32::try_from(id).unwrap(),
            author: author(1),
            content: vec![ContentSpan::Text {
                text: text.to_string(),
            }],
            created_at: DateTime::from_timestamp(1_700_000_000 + id, 0).unwrap(),
            sub_replies: replies
                .iter()
                .map(|&reply| SubReply {
                    id: reply,
                    author: author(2),
                    content: Vec::new(),
                    created_at: DateTime::from_timestamp(1_700_001_000 + reply, 0).unwrap(),
                })
                .collect(),
        }
    }

    async fn snapshot_dir(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut entries = tokio::fs::read_dir(path).await.unwrap();
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let contents = tokio::fs::read(entry.path()).await.unwrap_or_default();
            files.push((entry.file_name().to_string_lossy().into_owned(), contents));
        }
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_create_writes_current_marker() {
        let dir = TempDir::new().unwrap();
        let archive = LocalArchive::create(dir.path(), ArchiveOptions::all()).await.unwrap();

        assert_eq!(archive.version(), ArchiveVersion::CURRENT);
        assert!(archive.thread_info().is_none());
        assert_eq!(detect(dir.path()).await, Detected::Supported(ArchiveVersion::CURRENT));
    }

    #[tokio::test]
    async fn test_create_in_missing_directory() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("new-store");
        LocalArchive::create(&root, ArchiveOptions::default()).await.unwrap();
        assert!(manifest_path(&root).exists());
    }

    #[tokio::test]
    async fn test_create_rejects_non_empty_directory() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("keep.txt"), b"mine").await.unwrap();
        let before = snapshot_dir(dir.path()).await;

        let err = LocalArchive::create(dir.path(), ArchiveOptions::all())
            .await
            .unwrap_err();

        assert!(matches!(err, ArchiveError::DirectoryNotEmpty { .. }));
        assert_eq!(snapshot_dir(dir.path()).await, before);
    }

    #[tokio::test]
    async fn test_open_rejects_plain_directory() {
        let dir = TempDir::new().unwrap();
        let err = LocalArchive::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, ArchiveError::NotAnArchive { .. }));
    }

    #[tokio::test]
    async fn test_open_legacy_leaves_directory_unchanged() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(manifest_path(dir.path()), br#"{"version": 2}"#)
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("posts.json"), b"[]").await.unwrap();
        let before = snapshot_dir(dir.path()).await;

        let err = LocalArchive::open(dir.path()).await.unwrap_err();

        assert!(matches!(
            err,
            ArchiveError::UnsupportedVersion {
                version: ArchiveVersion::V2,
                ..
            }
        ));
        assert_eq!(snapshot_dir(dir.path()).await, before);
    }

    #[test]
    fn test_update_is_append_only() {
        let mut archive = LocalArchive {
            root: PathBuf::from("/unused"),
            version: ArchiveVersion::CURRENT,
            generation: 0,
            options: ArchiveOptions::default(),
            thread: None,
            posts: Vec::new(),
            index: HashMap::new(),
        };

        archive.update(ArchiveThread {
            thread: thread_info("first"),
            posts: vec![post(1, "one", &[10]), post(2, "two", &[])],
        });
        let stats = archive.update(ArchiveThread {
            thread: thread_info("renamed"),
            posts: vec![
                post(1, "one edited", &[10, 11]),
                post(2, "two edited", &[]),
                post(3, "three", &[30]),
            ],
        });

        assert_eq!(
            stats,
            MergeStats {
                new_posts: 1,
                new_sub_replies: 2,
            }
        );
        let ids: Vec<i64> = archive.posts().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(archive.posts()[0], post(1, "one", &[10, 11]));
        assert_eq!(archive.posts()[1], post(2, "two", &[]));
        assert_eq!(archive.thread_info().unwrap().title, "renamed");
    }

    #[tokio::test]
    async fn test_dump_and_reopen() {
        let dir = TempDir::new().unwrap();
        let mut archive = LocalArchive::create(dir.path(), ArchiveOptions::all()).await.unwrap();
        archive.update(ArchiveThread {
            thread: thread_info("title"),
            posts: vec![post(1, "one", &[10]), post(2, "two", &[])],
        });
        archive.dump().await.unwrap();
        archive.update(ArchiveThread {
            thread: thread_info("title"),
            posts: vec![post(3, "three", &[])],
        });
        archive.dump().await.unwrap();

        assert_eq!(detect(dir.path()).await, Detected::Supported(ArchiveVersion::CURRENT));
        assert!(!posts_path(dir.path(), 1).exists());
        assert!(posts_path(dir.path(), 2).exists());

        let reopened = LocalArchive::open(dir.path()).await.unwrap();
        assert_eq!(reopened.posts(), archive.posts());
        assert_eq!(reopened.thread_info(), archive.thread_info());
        assert_eq!(reopened.options(), ArchiveOptions::all());

        let info = read_thread_info(dir.path()).await.unwrap().unwrap();
        assert_eq!(info.title, "title");
    }

    #[tokio::test]
    async fn test_interrupted_dump_keeps_previous_state() {
        let dir = TempDir::new().unwrap();
        let mut archive = LocalArchive::create(dir.path(), ArchiveOptions::all()).await.unwrap();
        archive.update(ArchiveThread {
            thread: thread_info("title"),
            posts: vec![post(1, "one", &[])],
        });
        archive.dump().await.unwrap();

        // A crash after the next posts file but before the manifest commit.
        tokio::fs::write(posts_path(dir.path(), 2), b"{\"authors\": [], \"po")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("manifest.json.tmp"), b"{\"vers")
            .await
            .unwrap();

        let reopened = LocalArchive::open(dir.path()).await.unwrap();
        assert_eq!(reopened.posts().len(), 1);
    }

    #[tokio::test]
    async fn test_set_archive_options_persists() {
        let dir = TempDir::new().unwrap();
        let mut archive = LocalArchive::create(dir.path(), ArchiveOptions::all()).await.unwrap();
        let options = ArchiveOptions {
            images: true,
            ..ArchiveOptions::default()
        };
        archive.set_archive_options(options);
        archive.dump().await.unwrap();

        let reopened = LocalArchive::open(dir.path()).await.unwrap();
        assert_eq!(reopened.options(), options);
    }
}
