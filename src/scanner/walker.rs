//! Recursive directory walk with pruning rules.

use super::WalkOutcome;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Marker file that hides its directory from walks.
const NOMEDIA: &str = ".nomedia";

/// Walks storage roots, skipping hidden, system and `.nomedia` directories.
#[derive(Debug, Clone)]
pub struct Walker {
    excluded: Vec<PathBuf>,
    include_dirs: bool,
}

impl Walker {
    /// Create a walker that never descends into `<storage_root>/Android` or
    /// `<storage_root>/data`.
    pub fn new(storage_root: &Path, include_dirs: bool) -> Self {
        Self {
            excluded: vec![storage_root.join("Android"), storage_root.join("data")],
            include_dirs,
        }
    }

    /// Whether a directory below a root must not be entered.
    fn is_pruned(&self, entry: &DirEntry) -> bool {
        if !entry.file_type().is_dir() {
            return false;
        }

        let hidden = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'));

        hidden
            || self.excluded.iter().any(|p| p == entry.path())
            || entry.path().join(NOMEDIA).exists()
    }

    /// Walk one root. Only a failure to read the root itself fails the walk;
    /// unreadable entries below it are skipped.
    pub fn walk_root(&self, root: &Path) -> WalkOutcome {
        if let Err(e) = std::fs::read_dir(root) {
            tracing::debug!(root = %root.display(), error = %e, "Cannot read walk root");
            return WalkOutcome::from_io(root.to_path_buf(), &e);
        }

        let files = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_pruned(e))
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::debug!(error = %err, "Skipping unreadable entry");
                    None
                }
            })
            .filter(|e| e.depth() > 0)
            .filter(|e| self.include_dirs || !e.file_type().is_dir())
            .map(DirEntry::into_path)
            .collect();

        WalkOutcome::Success(files)
    }

    /// Walk every root in order. The first failing root decides the outcome.
    /// Entries reachable from several roots are reported once.
    pub fn walk(&self, roots: &[PathBuf]) -> WalkOutcome {
        let mut all = Vec::new();
        let mut seen = HashSet::new();

        for root in roots {
            match self.walk_root(root) {
                WalkOutcome::Success(files) => {
                    all.extend(files.into_iter().filter(|f| seen.insert(f.clone())))
                }
                failure => return failure,
            }
        }

        WalkOutcome::Success(all)
    }

    /// Walk every root, keeping only entries whose extension is accepted.
    pub fn walk_filtered(&self, roots: &[PathBuf], extensions: &[String]) -> WalkOutcome {
        match self.walk(roots) {
            WalkOutcome::Success(files) => WalkOutcome::Success(
                files
                    .into_iter()
                    .filter(|p| has_extension(p, extensions))
                    .collect(),
            ),
            failure => failure,
        }
    }
}

/// Case-insensitive extension check.
pub(crate) fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// Something the poller can walk once per tick.
pub trait Walk: Send + Sync + 'static {
    /// Perform one full walk.
    fn walk(&self) -> WalkOutcome;
}

/// A walker bound to its roots and extension filter.
#[derive(Debug, Clone)]
pub struct RootSet {
    /// Walker and its pruning rules.
    pub walker: Walker,
    /// Roots walked in order.
    pub roots: Vec<PathBuf>,
    /// Accepted extensions; `None` keeps every entry.
    pub extensions: Option<Vec<String>>,
}

impl Walk for RootSet {
    fn walk(&self) -> WalkOutcome {
        match &self.extensions {
            Some(extensions) => self.walker.walk_filtered(&self.roots, extensions),
            None => self.walker.walk(&self.roots),
        }
    }
}
