//! Server state shared across handlers.

use crate::error::Result;
use crate::signal::ChangeSignal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared WebDAV state.
#[derive(Clone)]
pub struct DavState {
    /// Canonical served root.
    root: Arc<PathBuf>,
    /// Flipped after every request.
    changes: Arc<ChangeSignal>,
}

impl DavState {
    /// Serve `root`, creating it if needed.
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let root = root.canonicalize()?;

        Ok(Self {
            changes: Arc::new(ChangeSignal::new(root.clone())),
            root: Arc::new(root),
        })
    }

    /// Canonical served root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Change signal for the served root.
    pub fn changes(&self) -> &Arc<ChangeSignal> {
        &self.changes
    }
}
