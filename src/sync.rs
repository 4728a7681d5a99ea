//! One synchronization run: fetch, convert, merge, persist, download assets.
//!
//! [`Synchronizer::synchronize`] drives a run inline on the caller's task.
//! [`SyncTask::spawn`] moves the archive onto its own tokio task and hands
//! back a `watch` receiver of throttled progress plus a single-resolution
//! handle for the outcome.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::assets::{AssetDownloader, AssetSummary};
use crate::config::Config;
use crate::convert::convert;
use crate::error::{ArchiveError, RemoteError, Result};
use crate::progress::{progress_channel, Progress, ProgressReporter, SharedHook, Step};
use crate::remote::{HttpThreadApi, RemoteThreadFetcher, ThreadApi};
use crate::store::{LocalArchive, MergeStats};

/// What a completed run did.
#[derive(Debug)]
pub struct SyncReport {
    pub thread_id: i64,
    pub merge: MergeStats,
    pub assets: AssetSummary,
}

/// Runs synchronizations against one remote API.
pub struct Synchronizer {
    api: Arc<dyn ThreadApi>,
    downloader: AssetDownloader,
    page_size: u32,
    sub_reply_page_size: u32,
}

impl Synchronizer {
    /// Build a synchronizer talking to the configured HTTP API.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn new(config: &Config) -> std::result::Result<Self, RemoteError> {
        let api = HttpThreadApi::new(config)?;
        let downloader = AssetDownloader::new(config)?;
        Ok(Self::with_api(Arc::new(api), downloader, config))
    }

    /// Build a synchronizer over any [`ThreadApi`] implementation.
    #[must_use]
    pub fn with_api(api: Arc<dyn ThreadApi>, downloader: AssetDownloader, config: &Config) -> Self {
        Self {
            api,
            downloader,
            page_size: config.page_size,
            sub_reply_page_size: config.sub_reply_page_size,
        }
    }

    #[must_use]
    pub fn api(&self) -> &Arc<dyn ThreadApi> {
        &self.api
    }

    /// Bring `archive` up to date with the remote thread.
    ///
    /// `thread_id` defaults to the thread the archive already holds; a fresh
    /// archive needs one. The merged state is dumped before any asset is
    /// fetched, so asset failures never lose thread data.
    ///
    /// # Errors
    ///
    /// Fails with [`ArchiveError::MissingThreadId`] when no id is known,
    /// [`ArchiveError::ThreadMismatch`] when the id names a different thread
    /// than the archive holds, or with the first fetch, conversion or store
    /// failure. Nothing is written when fetching or conversion fails.
    pub async fn synchronize(
        &self,
        archive: &mut LocalArchive,
        thread_id: Option<i64>,
        hook: Option<SharedHook>,
    ) -> Result<SyncReport> {
        let known = archive.thread_info().map(|thread| thread.id);
        let thread_id = match (thread_id, known) {
            (Some(requested), Some(archived)) if requested != archived => {
                return Err(ArchiveError::ThreadMismatch {
                    archived,
                    requested,
                });
            }
            (Some(id), _) | (None, Some(id)) => id,
            (None, None) => return Err(ArchiveError::MissingThreadId),
        };
        let hooks: Vec<SharedHook> = hook.into_iter().collect();

        info!(thread_id, path = %archive.root().display(), "Synchronizing archive");

        let mut fetcher =
            RemoteThreadFetcher::new(Arc::clone(&self.api), self.page_size, self.sub_reply_page_size);
        for hook in &hooks {
            fetcher.add_shared_hook(Arc::clone(hook));
        }
        let snapshot = fetcher.fetch(thread_id).await?;
        let thread = convert(&snapshot)?;

        ProgressReporter::begin(&hooks, Step::Saving, 0).finish();
        let merge = archive.update(thread);
        archive.dump().await?;

        let mut downloader = self.downloader.clone();
        for hook in &hooks {
            downloader.add_shared_hook(Arc::clone(hook));
        }
        let assets = downloader
            .download_assets(archive, &archive.options())
            .await?;

        info!(
            thread_id,
            new_posts = merge.new_posts,
            new_sub_replies = merge.new_sub_replies,
            assets_downloaded = assets.downloaded,
            assets_failed = assets.failures.len(),
            "Synchronization complete"
        );
        Ok(SyncReport {
            thread_id,
            merge,
            assets,
        })
    }
}

/// The archive handed back by a background run, with how the run ended.
#[derive(Debug)]
pub struct SyncOutcome {
    pub archive: LocalArchive,
    pub result: Result<SyncReport>,
}

/// A synchronization running on its own tokio task.
pub struct SyncTask {
    progress: watch::Receiver<Option<Progress>>,
    handle: JoinHandle<SyncOutcome>,
}

impl SyncTask {
    /// Start a run that owns `archive` until it finishes.
    ///
    /// Progress is debounced to at most one delivery per `interval`, keeping
    /// the first and last event of every step.
    #[must_use]
    pub fn spawn(
        synchronizer: Arc<Synchronizer>,
        mut archive: LocalArchive,
        thread_id: Option<i64>,
        interval: Duration,
    ) -> Self {
        let (throttle, progress) = progress_channel(interval);
        let handle = tokio::spawn(async move {
            let hook: SharedHook = throttle.clone();
            let result = synchronizer
                .synchronize(&mut archive, thread_id, Some(hook))
                .await;
            throttle.flush();
            if let Err(e) = &result {
                error!(path = %archive.root().display(), "Synchronization failed: {e}");
            }
            SyncOutcome { archive, result }
        });
        Self { progress, handle }
    }

    /// A receiver of the latest delivered progress value.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<Option<Progress>> {
        self.progress.clone()
    }

    /// Wait for the run to end.
    ///
    /// # Errors
    ///
    /// Fails with [`ArchiveError::TaskFailed`] only if the task panicked or
    /// was cancelled; run failures are in [`SyncOutcome::result`].
    pub async fn join(self) -> Result<SyncOutcome> {
        self.handle
            .await
            .map_err(|e| ArchiveError::TaskFailed(e.to_string()))
    }
}
