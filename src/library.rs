//! Book catalog kept in step with storage walks.

use crate::db::{Database, StoredBook};
use crate::error::{AppError, Result};
use crate::progress::{self, ExternalProgressFile, SyncApp};
use crate::publication::{Publication, PublicationError, PublicationOpener};
use crate::scanner::{Walk, WalkOutcome};
use crate::signal::Change;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;

/// Modification time and size of a file when it last failed to open.
type FileStamp = (Option<SystemTime>, u64);

fn file_stamp(path: &Path) -> Option<FileStamp> {
    std::fs::metadata(path)
        .ok()
        .map(|m| (m.modified().ok(), m.len()))
}

/// Counters for one catalog update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Books added to the catalog.
    pub added: usize,
    /// New locations recorded for known books.
    pub relocated: usize,
    /// Files that could not be opened and were skipped.
    pub skipped: usize,
    /// Books whose progress changed.
    pub progress_updated: usize,
}

/// Catalog service.
pub struct Library {
    db: Database,
    opener: Arc<dyn PublicationOpener>,
    app: SyncApp,
    extensions: Vec<String>,
    workers: usize,
    /// Books that failed to open, retried only once the file changes.
    failed: Mutex<HashMap<PathBuf, FileStamp>>,
}

impl Library {
    /// Create the catalog service.
    pub fn new(
        db: Database,
        opener: Arc<dyn PublicationOpener>,
        app: SyncApp,
        extensions: Vec<String>,
        workers: usize,
    ) -> Self {
        Self {
            db,
            opener,
            app,
            extensions,
            workers: workers.max(1),
            failed: Mutex::new(HashMap::new()),
        }
    }

    /// Extensions a walk must keep for this catalog: books plus progress files.
    pub fn wanted_extensions(&self) -> Vec<String> {
        let mut wanted = self.extensions.clone();
        if let Some(ext) = self.app.progress_extension() {
            wanted.push(ext.to_string());
        }
        wanted
    }

    /// All books, ordered by title.
    pub fn books(&self) -> Result<Vec<StoredBook>> {
        self.db.get_all_books()
    }

    fn is_book(&self, path: &Path) -> bool {
        crate::scanner::has_extension(path, &self.extensions)
    }

    /// Whether `path` already failed to open and has not changed since.
    fn failed_unchanged(&self, path: &Path) -> bool {
        self.failed
            .lock()
            .get(path)
            .is_some_and(|stamp| file_stamp(path).as_ref() == Some(stamp))
    }

    /// Apply one walk outcome. Failed walks leave the catalog untouched.
    pub fn apply(&self, outcome: &WalkOutcome) -> Result<SyncSummary> {
        let WalkOutcome::Success(files) = outcome else {
            tracing::debug!(?outcome, "Walk failed, catalog unchanged");
            return Ok(SyncSummary::default());
        };

        let start = std::time::Instant::now();
        let mut summary = SyncSummary::default();
        let mut books = self.db.get_all_books()?;

        let walked: HashSet<&PathBuf> = files.iter().collect();
        self.failed.lock().retain(|p, _| walked.contains(p));

        let known: HashSet<String> = books.iter().flat_map(|b| b.paths()).collect();
        let new_paths: Vec<&PathBuf> = files
            .iter()
            .filter(|p| self.is_book(p))
            .filter(|p| !known.contains(&*p.to_string_lossy()))
            .filter(|p| !self.failed_unchanged(p))
            .collect();

        if !new_paths.is_empty() {
            tracing::info!(files = new_paths.len(), workers = self.workers, "Opening new books");
            for (path, opened) in self.open_all(&new_paths)? {
                match opened {
                    Ok(publication) => {
                        self.failed.lock().remove(&path);
                        if self.record(&mut books, &path, publication)? {
                            summary.added += 1;
                        } else {
                            summary.relocated += 1;
                        }
                    }
                    Err(e) => {
                        // One broken file must not stop discovery of the rest
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable book");
                        if let Some(stamp) = file_stamp(&path) {
                            self.failed.lock().insert(path, stamp);
                        }
                        summary.skipped += 1;
                    }
                }
            }
        }

        let progress_files = self.read_progress_files(files);
        for book in &books {
            let record = book.progress_record();
            let updated = progress::reconcile(&record, &progress_files, self.app);
            if (updated - record.progress).abs() > f32::EPSILON {
                self.db.update_progress(&book.id, f64::from(updated))?;
                tracing::info!(title = %book.title, progress = updated, "Progress updated");
                summary.progress_updated += 1;
            }
        }

        tracing::info!(
            added = summary.added,
            relocated = summary.relocated,
            skipped = summary.skipped,
            progress = summary.progress_updated,
            elapsed = ?start.elapsed(),
            "Catalog sync complete"
        );

        Ok(summary)
    }

    /// Open publications with a bounded worker pool.
    fn open_all(
        &self,
        paths: &[&PathBuf],
    ) -> Result<Vec<(PathBuf, std::result::Result<Publication, PublicationError>)>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build worker pool: {}", e)))?;

        Ok(pool.install(|| {
            paths
                .par_iter()
                .map(|path| ((*path).clone(), self.opener.open(path)))
                .collect()
        }))
    }

    /// Add a freshly opened publication. A book with the same title and
    /// authors gains a new path instead. Returns true when a book was added.
    fn record(
        &self,
        books: &mut Vec<StoredBook>,
        path: &Path,
        publication: Publication,
    ) -> Result<bool> {
        let path = path.to_string_lossy();

        if let Some(existing) = books
            .iter_mut()
            .find(|b| b.title == publication.title && b.authors() == publication.authors)
        {
            if existing.add_path(&path) {
                existing.updated_at = crate::db::now_timestamp();
                self.db.save_book(existing)?;
            }
            return Ok(false);
        }

        let book = StoredBook::new(&path, &publication.title, &publication.authors);
        self.db.save_book(&book)?;
        books.push(book);
        Ok(true)
    }

    fn read_progress_files(&self, files: &[PathBuf]) -> Vec<ExternalProgressFile> {
        files
            .iter()
            .filter(|p| self.app.is_progress_file(p))
            .filter_map(|p| match ExternalProgressFile::read(p) {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::debug!(path = %p.display(), error = %e, "Cannot read progress file");
                    None
                }
            })
            .collect()
    }

    /// Apply every new walk outcome. A WebDAV change triggers a fresh walk of
    /// `source`, so uploaded files are picked up without waiting for the
    /// poller. Returns when either channel closes.
    pub async fn follow<W: Walk>(
        self: Arc<Self>,
        source: Arc<W>,
        mut outcomes: watch::Receiver<Option<WalkOutcome>>,
        mut changes: watch::Receiver<Change>,
    ) {
        loop {
            let outcome = tokio::select! {
                res = outcomes.changed() => {
                    if res.is_err() {
                        break;
                    }
                    let latest = outcomes.borrow_and_update().clone();
                    match latest {
                        Some(outcome) => outcome,
                        None => continue,
                    }
                }
                res = changes.changed() => {
                    if res.is_err() {
                        break;
                    }
                    let change = changes.borrow_and_update().clone();
                    tracing::debug!(
                        directory = %change.directory.display(),
                        version = change.version,
                        "WebDAV change, rescanning"
                    );
                    let source = Arc::clone(&source);
                    match tokio::task::spawn_blocking(move || source.walk()).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            tracing::error!(error = %e, "Rescan task failed");
                            continue;
                        }
                    }
                }
            };

            let library = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || library.apply(&outcome)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Catalog sync failed"),
                Err(e) => tracing::error!(error = %e, "Catalog sync task failed"),
            }
        }

        tracing::debug!("Catalog follower stopped");
    }
}
