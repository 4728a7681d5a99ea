//! Thread archiver library.
//!
//! Archives a forum thread (posts, nested replies, authors, media) into a
//! versioned local store and keeps it synchronized with the remote thread.

pub mod assets;
pub mod config;
pub mod constants;
pub mod convert;
pub mod error;
pub mod fs_utils;
pub mod models;
pub mod progress;
pub mod remote;
pub mod store;
pub mod sync;

pub use error::{ArchiveError, Result};
pub use store::{detect, read_thread_info, ArchiveVersion, Detected, LocalArchive};
pub use sync::{SyncOutcome, SyncReport, SyncTask, Synchronizer};
