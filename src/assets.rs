//! Best-effort download of media referenced by an archive.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::TMP_SUFFIX;
use crate::error::{ArchiveError, AssetError, Result};
use crate::fs_utils::{remove_matching_best_effort, write_atomic};
use crate::models::{ArchiveOptions, AssetKind, AssetRef, Author, ContentSpan, Post, ThreadInfo};
use crate::progress::{ProgressReporter, SharedHook, Step};
use crate::store::layout::asset_path;
use crate::store::LocalArchive;

/// A single asset that could not be fetched.
#[derive(Debug)]
pub struct AssetFailure {
    pub asset: AssetRef,
    pub error: AssetError,
}

/// Outcome of one download pass.
#[derive(Debug, Default)]
pub struct AssetSummary {
    /// Distinct enabled assets referenced by the archive.
    pub referenced: usize,
    pub already_present: usize,
    pub downloaded: usize,
    pub failures: Vec<AssetFailure>,
}

#[derive(Clone)]
pub struct AssetDownloader {
    client: reqwest::Client,
    hooks: Vec<SharedHook>,
}

impl AssetDownloader {
    /// Build a downloader using the configured timeout and user agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.asset_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self::with_client(client))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            hooks: Vec::new(),
        }
    }

    pub fn add_shared_hook(&mut self, hook: SharedHook) {
        self.hooks.push(hook);
    }

    /// Fetch every enabled asset the archive references that is not on disk yet.
    ///
    /// Individual fetch failures are logged and collected in the summary;
    /// the pass only fails if fetched data cannot be written locally.
    ///
    /// Unfinished `.tmp` files in the enabled kind directories are removed
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::StoreIo`] if the assets directory cannot be
    /// created or written to.
    pub async fn download_assets(
        &self,
        archive: &LocalArchive,
        options: &ArchiveOptions,
    ) -> Result<AssetSummary> {
        let assets = collect_assets(archive.thread_info(), archive.posts(), options);
        let mut summary = AssetSummary {
            referenced: assets.len(),
            ..AssetSummary::default()
        };

        for kind in AssetKind::ALL.into_iter().filter(|kind| options.is_enabled(*kind)) {
            let dir = archive.assets_dir().join(kind.dir_name());
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| ArchiveError::io(&dir, e))?;
            // Left behind by an interrupted write.
            remove_matching_best_effort(&dir, |name| name.ends_with(TMP_SUFFIX)).await;
        }

        info!(
            path = %archive.root().display(),
            referenced = summary.referenced,
            "Downloading assets"
        );

        let mut reporter = ProgressReporter::begin(&self.hooks, Step::Assets, assets.len() as u64);
        for asset in assets {
            let path = asset_path(archive.root(), &asset);

            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                summary.already_present += 1;
            } else {
                match self.fetch(&asset).await {
                    Ok(bytes) => {
                        write_atomic(&path, &bytes)
                            .await
                            .map_err(|e| ArchiveError::io(&path, e))?;
                        debug!(url = %asset.url, path = %path.display(), "Asset saved");
                        summary.downloaded += 1;
                    }
                    Err(error) => {
                        warn!(url = %asset.url, kind = ?asset.kind, "Failed to fetch asset: {error}");
                        summary.failures.push(AssetFailure { asset, error });
                    }
                }
            }

            reporter.advance_by(1);
        }
        reporter.finish();

        info!(
            downloaded = summary.downloaded,
            already_present = summary.already_present,
            failed = summary.failures.len(),
            "Asset download complete"
        );
        Ok(summary)
    }

    async fn fetch(&self, asset: &AssetRef) -> std::result::Result<Vec<u8>, AssetError> {
        let response = self.client.get(&asset.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::Status(status));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Distinct enabled assets referenced by the thread author, every post and
/// every sub-reply, in first-seen order.
#[must_use]
pub fn collect_assets(
    thread: Option<&ThreadInfo>,
    posts: &[Post],
    options: &ArchiveOptions,
) -> Vec<AssetRef> {
    let mut seen = HashSet::new();
    let mut assets = Vec::new();
    let mut push = |asset: AssetRef| {
        if options.is_enabled(asset.kind) && seen.insert(asset.clone()) {
            assets.push(asset);
        }
    };
    let portrait = |author: &Author| {
        author
            .portrait
            .as_deref()
            .map(|url| AssetRef::new(AssetKind::Portrait, url))
    };
    let spans = |content: &[ContentSpan]| {
        content
            .iter()
            .filter_map(ContentSpan::asset)
            .collect::<Vec<_>>()
    };

    if let Some(asset) = thread.and_then(|thread| portrait(thread.author.as_ref())) {
        push(asset);
    }
    for post in posts {
        portrait(post.author.as_ref()).into_iter().for_each(&mut push);
        spans(&post.content).into_iter().for_each(&mut push);
        for reply in &post.sub_replies {
            portrait(reply.author.as_ref()).into_iter().for_each(&mut push);
            spans(&reply.content).into_iter().for_each(&mut push);
        }
    }

    assets
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::DateTime;
    use tempfile::TempDir;

    use super::*;
    use crate::models::SubReply;

    fn author(id: i64) -> Arc<Author> {
        Arc::new(Author {
            id,
            name: format!("user{id}"),
            display_name: format!("User {id}"),
            portrait: Some(format!("https://img.example.com/portrait/{id}")),
        })
    }

    fn image(url: &str) -> ContentSpan {
        ContentSpan::Image {
            url: url.to_string(),
            width: None,
            height: None,
        }
    }

    fn posts() -> Vec<Post> {
        vec![
            Post {
                id: 1,
                floor: 1,
                author: author(1),
                content: vec![
                    image("https://img.example.com/a.jpg"),
                    ContentSpan::Audio {
                        url: "https://media.example.com/v.mp3".to_string(),
                        duration_ms: Some(1200),
                    },
                ],
                created_at: DateTime::from_timestamp(0, 0).unwrap(),
                sub_replies: vec![SubReply {
                    id: 10,
                    author: author(2),
                    content: vec![image("https://img.example.com/a.jpg")],
                    created_at: DateTime::from_timestamp(0, 0).unwrap(),
                }],
            },
            Post {
                id: 2,
                floor: 2,
                author: author(1),
                content: vec![ContentSpan::Video {
                    url: "https://media.example.com/c.mp4".to_string(),
                    thumbnail_url: None,
                }],
                created_at: DateTime::from_timestamp(0, 0).unwrap(),
                sub_replies: Vec::new(),
            },
        ]
    }

    #[test]
    fn test_collect_all_kinds_deduplicated() {
        let assets = collect_assets(None, &posts(), &ArchiveOptions::all());
        let kinds: Vec<AssetKind> = assets.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AssetKind::Portrait,
                AssetKind::Image,
                AssetKind::Audio,
                AssetKind::Portrait,
                AssetKind::Video,
            ]
        );
    }

    #[tokio::test]
    async fn test_download_removes_unfinished_writes() {
        let dir = TempDir::new().unwrap();
        let archive = LocalArchive::create(dir.path(), ArchiveOptions::all())
            .await
            .unwrap();
        let images = archive.assets_dir().join(AssetKind::Image.dir_name());
        tokio::fs::create_dir_all(&images).await.unwrap();
        tokio::fs::write(images.join("abc.png.tmp"), b"partial").await.unwrap();
        tokio::fs::write(images.join("abc.png"), b"done").await.unwrap();

        let downloader = AssetDownloader::with_client(reqwest::Client::new());
        let summary = downloader
            .download_assets(&archive, &ArchiveOptions::all())
            .await
            .unwrap();

        assert_eq!(summary.referenced, 0);
        assert!(!images.join("abc.png.tmp").exists());
        assert!(images.join("abc.png").exists());
    }

    #[tokio::test]
    async fn test_download_fails_when_assets_dir_is_unusable() {
        let dir = TempDir::new().unwrap();
        let archive = LocalArchive::create(dir.path(), ArchiveOptions::all())
            .await
            .unwrap();
        tokio::fs::write(archive.assets_dir(), b"not a directory")
            .await
            .unwrap();

        let downloader = AssetDownloader::with_client(reqwest::Client::new());
        let err = downloader
            .download_assets(&archive, &ArchiveOptions::all())
            .await
            .unwrap_err();

        assert!(matches!(err, ArchiveError::StoreIo { .. }));
    }

    #[test]
    fn test_collect_respects_options() {
        let options = ArchiveOptions {
            images: true,
            ..ArchiveOptions::default()
        };
        let assets = collect_assets(None, &posts(), &options);
        assert_eq!(
            assets,
            vec![AssetRef::new(AssetKind::Image, "https://img.example.com/a.jpg")]
        );

        assert!(collect_assets(None, &posts(), &ArchiveOptions::default()).is_empty());
    }
}
