//! Error types for the archive synchronization engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::progress::Step;
use crate::store::ArchiveVersion;

/// Result type defaulting to [`ArchiveError`].
pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;

/// Failure at the remote read boundary.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected HTTP status {status} from {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("thread {thread_id} does not exist")]
    ThreadNotFound { thread_id: i64 },
    #[error("post {post_id} of thread {thread_id} does not exist")]
    PostNotFound { thread_id: i64, post_id: i64 },
    #[error("remote API error {code}: {message}")]
    Api { code: i64, message: String },
}

/// Terminal failure of a store operation or synchronization run.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{} is not a thread archive", .path.display())]
    NotAnArchive { path: PathBuf },

    #[error("{} holds archive {version}, which this build cannot read", .path.display())]
    UnsupportedVersion {
        path: PathBuf,
        version: ArchiveVersion,
    },

    #[error("{} is not empty", .path.display())]
    DirectoryNotEmpty { path: PathBuf },

    #[error(
        "failed to fetch {phase} page {page}{}: {source}",
        .post_id.map_or_else(String::new, |id| format!(" of post {id}"))
    )]
    RemoteFetchFailed {
        phase: Step,
        page: u32,
        post_id: Option<i64>,
        #[source]
        source: RemoteError,
    },

    #[error("thread {thread_id} does not exist remotely")]
    ThreadNotFound { thread_id: i64 },

    #[error("inconsistent thread snapshot: {0}")]
    ConversionInconsistent(String),

    #[error("store I/O failed on {}: {source}", .path.display())]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store file {} is corrupt: {source}", .path.display())]
    StoreCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no thread id given and the archive does not record one")]
    MissingThreadId,

    #[error("archive holds thread {archived}, refusing to merge thread {requested} into it")]
    ThreadMismatch { archived: i64, requested: i64 },

    #[error("synchronization task failed: {0}")]
    TaskFailed(String),
}

impl ArchiveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StoreIo {
            path: path.into(),
            source,
        }
    }

    /// Wrap a remote failure, keeping "thread does not exist" distinct from
    /// transport failures. Only the posts phase can decide that a thread is
    /// gone; later phases keep their page and post context.
    pub(crate) fn remote(phase: Step, page: u32, post_id: Option<i64>, source: RemoteError) -> Self {
        match source {
            RemoteError::ThreadNotFound { thread_id } if phase == Step::Posts => {
                Self::ThreadNotFound { thread_id }
            }
            source => Self::RemoteFetchFailed {
                phase,
                page,
                post_id,
                source,
            },
        }
    }
}

/// Failure to fetch a single asset. Recorded in the download summary, never fatal.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),
}
