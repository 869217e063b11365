use std::path::PathBuf;

use thiserror::Error;

/// The session's recording directory exists but could not be read.
#[derive(Debug, Error)]
#[error("failed to scan recordings under {}: {source}", .path.display())]
pub struct ArtifactScanError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Failure resolving a single recording for download.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Video not found")]
    NotFound,
}
