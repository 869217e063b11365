//! Session recordings written by the browser tool.
//!
//! The browser tool writes `.webm` files under `<root>/<session_id>/<timestamp>/`
//! while it runs and never signals completion. [`ArtifactStore`] scans that
//! tree on demand; [`RecordingMonitor`] infers whether the newest file is still
//! being written from its modification time.

mod error;

pub use error::{ArtifactError, ArtifactScanError};

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use walkdir::WalkDir;

use crate::util::{is_safe_path_segment, path_within, unix_seconds};

/// Extension of recording files produced by the browser tool.
pub const RECORDING_EXTENSION: &str = "webm";

/// A recording counts as in progress while its last write is this recent.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(10);

/// Snapshot of one recording file at scan time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingArtifact {
    pub filename: String,
    /// Name of the directory the file was written under
    pub timestamp: String,
    pub full_path: String,
    /// Creation time in Unix seconds (modification time when unavailable)
    pub created_time: f64,
    /// Size in bytes
    pub size: u64,
    /// Last write, used for the in-progress heuristic
    #[serde(skip)]
    pub modified: SystemTime,
    #[serde(skip)]
    pub is_latest: bool,
}

/// Read-only view over the recordings root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory the browser tool records into for `session_id`.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    /// All recordings of a session, newest first.
    ///
    /// A missing session directory yields an empty list. Only an unreadable
    /// session directory fails the scan; unreadable entries below it are
    /// skipped. Callers must pass a session id already checked with
    /// [`is_safe_path_segment`].
    pub fn list_artifacts(
        &self,
        session_id: &str,
    ) -> Result<Vec<RecordingArtifact>, ArtifactScanError> {
        let session_dir = self.session_dir(session_id);
        if !session_dir.exists() {
            return Ok(Vec::new());
        }

        let mut artifacts = Vec::new();
        for entry in WalkDir::new(&session_dir).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(ArtifactScanError {
                        path: session_dir,
                        source: e.into(),
                    });
                }
                // A timestamp directory may vanish or be unreadable mid-scan.
                Err(e) => {
                    tracing::debug!(session_id, "Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !has_recording_extension(entry.path()) {
                continue;
            }

            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                // The tool may rotate or remove files mid-scan.
                Err(e) => {
                    tracing::debug!(path = %path.display(), "Skipping recording: {}", e);
                    continue;
                }
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let created = metadata.created().unwrap_or(modified);

            let timestamp = path
                .parent()
                .and_then(Path::file_name)
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            artifacts.push(RecordingArtifact {
                filename: entry.file_name().to_string_lossy().into_owned(),
                timestamp,
                full_path: path.to_string_lossy().into_owned(),
                created_time: unix_seconds(created),
                size: metadata.len(),
                modified,
                is_latest: false,
            });
        }

        sort_newest_first(&mut artifacts);
        Ok(artifacts)
    }
}

fn has_recording_extension(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(RECORDING_EXTENSION)
}

/// Order by creation time descending, ties by path, and flag the head.
fn sort_newest_first(artifacts: &mut [RecordingArtifact]) {
    artifacts.sort_by(|a, b| {
        b.created_time
            .partial_cmp(&a.created_time)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.full_path.cmp(&b.full_path))
    });
    for (index, artifact) in artifacts.iter_mut().enumerate() {
        artifact.is_latest = index == 0;
    }
}

/// Whether a recording last written at `modified` is still in progress at `now`.
fn is_fresh(modified: SystemTime, now: SystemTime) -> bool {
    match now.duration_since(modified) {
        Ok(age) => age < FRESHNESS_WINDOW,
        // Written "after" now: clock skew on a file being written.
        Err(_) => true,
    }
}

/// Whether the newest recording of a listing from
/// [`ArtifactStore::list_artifacts`] is still being written at `now`.
pub fn latest_in_progress(artifacts: &[RecordingArtifact], now: SystemTime) -> bool {
    artifacts
        .first()
        .is_some_and(|latest| is_fresh(latest.modified, now))
}

/// Recording state and file resolution for the HTTP surface.
#[derive(Debug, Clone)]
pub struct RecordingMonitor {
    store: ArtifactStore,
}

impl RecordingMonitor {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Whether the session's newest recording is still being written.
    pub fn is_recording(&self, session_id: &str) -> bool {
        self.is_recording_at(session_id, SystemTime::now())
    }

    /// [`is_recording`](Self::is_recording) against an explicit clock.
    ///
    /// Rescans on every call. Scan failures count as not recording.
    pub fn is_recording_at(&self, session_id: &str, now: SystemTime) -> bool {
        if !is_safe_path_segment(session_id) {
            return false;
        }
        match self.store.list_artifacts(session_id) {
            Ok(artifacts) => latest_in_progress(&artifacts, now),
            Err(e) => {
                tracing::warn!(session_id, "Recording scan failed: {}", e);
                false
            }
        }
    }

    /// Locate a recording for download.
    ///
    /// Every segment must be a plain path component and the resolved file
    /// must stay inside the recordings root; anything else is `NotFound`.
    pub fn resolve_artifact(
        &self,
        session_id: &str,
        timestamp: &str,
        filename: &str,
    ) -> Result<PathBuf, ArtifactError> {
        if ![session_id, timestamp, filename]
            .iter()
            .all(|segment| is_safe_path_segment(segment))
        {
            return Err(ArtifactError::NotFound);
        }

        let path = self
            .store
            .root()
            .join(session_id)
            .join(timestamp)
            .join(filename);
        if !path.is_file() || !path_within(self.store.root(), &path) {
            return Err(ArtifactError::NotFound);
        }
        Ok(path)
    }
}
