//! Reading-progress reconciliation against third-party sync files.
//!
//! Reading apps drop a small marker file per book into the synced folder.
//! A marker matches a book when its name, minus its own extension, equals the
//! last path segment of one of the book's known paths.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Reading app whose progress files are understood.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncApp {
    /// Moon+ Reader `.po` files, content ending in `:<percent><delim>`.
    #[default]
    MoonReader,
    /// No sync app: progress is never changed.
    None,
}

impl SyncApp {
    /// Extension of the progress files this app writes.
    pub fn progress_extension(&self) -> Option<&'static str> {
        match self {
            SyncApp::MoonReader => Some("po"),
            SyncApp::None => None,
        }
    }

    /// Whether `path` looks like one of this app's progress files.
    pub fn is_progress_file(&self, path: &Path) -> bool {
        match (self.progress_extension(), path.extension()) {
            (Some(wanted), Some(ext)) => ext.eq_ignore_ascii_case(wanted),
            _ => false,
        }
    }

    /// Decode a progress file's content into a 0.0-1.0 fraction.
    pub fn decode(&self, content: &str) -> Option<f32> {
        match self {
            SyncApp::MoonReader => decode_moon_reader(content),
            SyncApp::None => None,
        }
    }
}

/// A book's known locations and last stored progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookProgressRecord {
    /// Every path the book has been seen at.
    pub paths: Vec<String>,
    /// Authors.
    pub authors: Vec<String>,
    /// Title.
    pub title: String,
    /// Fraction read, 0.0 - 1.0.
    pub progress: f32,
}

/// A progress marker file written by a reading app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalProgressFile {
    /// File name including extension, e.g. `Dune.epub.po`.
    pub name: String,
    /// Raw file content.
    pub content: String,
}

impl ExternalProgressFile {
    /// Name with the last extension removed.
    pub fn stem(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }

    /// Read a progress file from disk.
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { name, content })
    }
}

/// Last `/`-separated segment of a stored path.
fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn without_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Whether a progress file belongs to the book.
///
/// The book segment is compared both as-is (`Dune.epub.po` against
/// `Dune.epub`) and without its extension (`Dune.po` against `Dune.epub`).
pub fn matches(book: &BookProgressRecord, file: &ExternalProgressFile) -> bool {
    let stem = file.stem();
    book.paths.iter().any(|path| {
        let segment = last_segment(path);
        segment == stem || without_extension(segment) == stem
    })
}

/// Up-to-date progress for `book`, or its stored progress when no file
/// matches or the matching file cannot be decoded.
pub fn reconcile(book: &BookProgressRecord, files: &[ExternalProgressFile], app: SyncApp) -> f32 {
    if app == SyncApp::None {
        return book.progress;
    }

    let Some(file) = files.iter().find(|f| matches(book, f)) else {
        return book.progress;
    };

    match app.decode(&file.content) {
        Some(progress) => {
            tracing::debug!(title = %book.title, file = %file.name, progress, "Matched progress file");
            progress
        }
        None => {
            tracing::warn!(
                title = %book.title,
                file = %file.name,
                "Malformed progress file, keeping stored progress"
            );
            book.progress
        }
    }
}

/// Decode `...:<percent><delim>`.
fn decode_moon_reader(content: &str) -> Option<f32> {
    let trimmed = content.trim();
    let mut chars = trimmed.chars();
    chars.next_back()?;
    let body = chars.as_str();

    let (_, value) = body.rsplit_once(':')?;
    let percent: f32 = value.trim().parse().ok()?;
    if !percent.is_finite() {
        return None;
    }

    Some((percent / 100.0).clamp(0.0, 1.0))
}
