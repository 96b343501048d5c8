//! Storage discovery: recursive walks and the adaptive poll loop.

mod poller;
mod walker;

pub use poller::{Clock, PollInterval, PollState, Poller, TokioClock};
pub use walker::{RootSet, Walk, Walker};
pub(crate) use walker::has_extension;

use std::path::PathBuf;

/// Result of walking every root once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkOutcome {
    /// All roots walked; discovered paths in root order.
    Success(Vec<PathBuf>),
    /// A root could not be read for lack of permission.
    PermissionDenied(PathBuf),
    /// A root could not be read for another reason.
    IoError {
        /// Root that failed.
        path: PathBuf,
        /// Error description.
        cause: String,
    },
}

impl WalkOutcome {
    /// Whether the walk succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, WalkOutcome::Success(_))
    }

    /// Discovered paths, empty on failure.
    pub fn files(&self) -> &[PathBuf] {
        match self {
            WalkOutcome::Success(files) => files,
            _ => &[],
        }
    }

    /// Classify an I/O error raised while opening `path`.
    pub fn from_io(path: PathBuf, err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            WalkOutcome::PermissionDenied(path)
        } else {
            WalkOutcome::IoError {
                path,
                cause: err.to_string(),
            }
        }
    }
}
