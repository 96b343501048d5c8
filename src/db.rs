mod schema;

pub use schema::Database;

use crate::progress::BookProgressRecord;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Book cached in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBook {
    /// Book ID (UUIDv5 of the first path it was seen at).
    pub id: String,
    /// Book title.
    pub title: String,
    /// All authors (JSON array).
    pub authors_json: String,
    /// Every absolute path the book was seen at (JSON array).
    pub paths_json: String,
    /// Fraction read, 0.0 - 1.0.
    pub progress: f64,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

impl StoredBook {
    /// Create a new record for a book first seen at `path`.
    pub fn new(path: &str, title: &str, authors: &[String]) -> Self {
        let now = now_timestamp();
        Self {
            id: book_id(path),
            title: title.to_string(),
            authors_json: serde_json::to_string(authors).unwrap_or_else(|_| "[]".to_string()),
            paths_json: serde_json::to_string(&[path]).unwrap_or_else(|_| "[]".to_string()),
            progress: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Authors decoded from JSON.
    pub fn authors(&self) -> Vec<String> {
        serde_json::from_str(&self.authors_json).unwrap_or_default()
    }

    /// Paths decoded from JSON.
    pub fn paths(&self) -> Vec<String> {
        serde_json::from_str(&self.paths_json).unwrap_or_default()
    }

    /// Record another location for this book. Returns false if already known.
    pub fn add_path(&mut self, path: &str) -> bool {
        let mut paths = self.paths();
        if paths.iter().any(|p| p == path) {
            return false;
        }
        paths.push(path.to_string());
        self.paths_json = serde_json::to_string(&paths).unwrap_or_else(|_| "[]".to_string());
        true
    }

    /// View used by the progress reconciler.
    pub fn progress_record(&self) -> BookProgressRecord {
        BookProgressRecord {
            paths: self.paths(),
            authors: self.authors(),
            title: self.title.clone(),
            progress: self.progress as f32,
        }
    }
}

/// Deterministic book ID for a path.
pub fn book_id(path: &str) -> String {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, path.as_bytes()).to_string()
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}
