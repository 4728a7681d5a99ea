//! Shared constants used across the application.

/// User agent string used for remote API and asset requests.
pub const ARCHIVER_USER_AGENT: &str = concat!("thread-archiver/", env!("CARGO_PKG_VERSION"));

/// Page size used when previewing a thread before archiving it.
pub const PREVIEW_PAGE_SIZE: u32 = 3;

/// Default minimum interval between progress deliveries to a slow consumer.
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 50;

/// File holding the version marker and thread identity of a store.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Directory under the store root holding downloaded assets.
pub const ASSETS_DIR: &str = "assets";

/// Suffix of files being written before they are renamed into place.
pub const TMP_SUFFIX: &str = ".tmp";
