//! Read-only probe for the store format a directory holds.

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use tracing::trace;

use super::layout::manifest_path;

/// Store format version, as written in the manifest's `version` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchiveVersion(pub u32);

impl ArchiveVersion {
    /// Legacy format: recognized, never read.
    pub const V2: Self = Self(2);
    pub const V3: Self = Self(3);
    /// The only format this build reads and writes.
    pub const CURRENT: Self = Self::V3;
}

impl fmt::Display for ArchiveVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Outcome of [`detect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detected {
    /// No recognizable version marker (includes empty and missing directories).
    NotAnArchive,
    /// Marker present, but for a format this build cannot read.
    Unsupported(ArchiveVersion),
    Supported(ArchiveVersion),
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Report which store format `path` holds.
///
/// Only the version marker is read; nothing is written, so this is safe to
/// call on a directory another process is reading.
pub async fn detect(path: &Path) -> Detected {
    let manifest = manifest_path(path);
    let bytes = match tokio::fs::read(&manifest).await {
        Ok(bytes) => bytes,
        Err(e) => {
            trace!(path = %manifest.display(), "No readable version marker: {e}");
            return Detected::NotAnArchive;
        }
    };

    match serde_json::from_slice::<VersionProbe>(&bytes) {
        Ok(probe) if ArchiveVersion(probe.version) == ArchiveVersion::CURRENT => {
            Detected::Supported(ArchiveVersion::CURRENT)
        }
        Ok(probe) => Detected::Unsupported(ArchiveVersion(probe.version)),
        Err(e) => {
            trace!(path = %manifest.display(), "Unreadable version marker: {e}");
            Detected::NotAnArchive
        }
    }
}
