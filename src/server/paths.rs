//! Request path resolution and the `Depth` header.

use crate::error::{AppError, Result};
use axum::http::HeaderMap;
use std::path::{Path, PathBuf};

/// A request path resolved under the served root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavPath {
    /// Filesystem location.
    pub fs: PathBuf,
    /// Decoded segments below the root.
    pub segments: Vec<String>,
}

impl DavPath {
    /// Resolve a raw request path against `root`.
    ///
    /// `..` is applied lexically and may not climb above the root. The deepest
    /// existing ancestor is canonicalized so a symlink cannot lead outside.
    pub fn resolve(root: &Path, raw: &str) -> Result<Self> {
        let decoded = urlencoding::decode(raw)
            .map_err(|_| AppError::Forbidden(format!("undecodable path: {}", raw)))?;

        let mut segments: Vec<String> = Vec::new();
        for segment in decoded.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(AppError::Forbidden(format!("path escapes root: {}", raw)));
                    }
                }
                s if s.contains('\0') || s.contains('\\') => {
                    return Err(AppError::Forbidden(format!("invalid segment in: {}", raw)));
                }
                s => segments.push(s.to_string()),
            }
        }

        let fs = segments.iter().fold(root.to_path_buf(), |p, s| p.join(s));
        ensure_contained(root, &fs)?;

        Ok(Self { fs, segments })
    }

    /// Whether this is the served root itself.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether this path still resolves under `root` once symlinks are followed.
    pub fn is_within(&self, root: &Path) -> bool {
        ensure_contained(root, &self.fs).is_ok()
    }

    /// Path of a direct child.
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self {
            fs: self.fs.join(name),
            segments,
        }
    }

    /// Last segment, empty for the root.
    pub fn display_name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// Percent-encoded href. Collections end with `/`.
    pub fn href(&self, is_collection: bool) -> String {
        let mut href = String::from("/");
        href.push_str(
            &self
                .segments
                .iter()
                .map(|s| urlencoding::encode(s).into_owned())
                .collect::<Vec<_>>()
                .join("/"),
        );
        if is_collection && !self.is_root() {
            href.push('/');
        }
        href
    }
}

/// Reject `path` if its deepest existing ancestor resolves outside `root`.
fn ensure_contained(root: &Path, path: &Path) -> Result<()> {
    let Some(existing) = path.ancestors().find(|p| p.symlink_metadata().is_ok()) else {
        return Ok(());
    };

    // A dangling symlink has metadata but cannot be canonicalized
    let canonical = existing
        .canonicalize()
        .map_err(|_| AppError::Forbidden(format!("unresolvable path: {}", existing.display())))?;

    if canonical.starts_with(root) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "path escapes root: {}",
            path.display()
        )))
    }
}

/// PROPFIND recursion depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// Descend this many levels.
    Levels(u32),
    /// Descend without limit.
    Infinity,
}

impl Depth {
    /// Parse the `Depth` header. Absent or unparsable means 0.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get("Depth")
            .and_then(|v| v.to_str().ok())
            .map(Self::parse)
            .unwrap_or(Depth::Levels(0))
    }

    /// Parse a header value.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("infinity") {
            Depth::Infinity
        } else {
            Depth::Levels(value.parse().unwrap_or(0))
        }
    }

    /// Whether children are described at this depth.
    pub fn descends(self) -> bool {
        matches!(self, Depth::Infinity | Depth::Levels(1..))
    }

    /// Depth for the children.
    pub fn next(self) -> Self {
        match self {
            Depth::Infinity => Depth::Infinity,
            Depth::Levels(n) => Depth::Levels(n.saturating_sub(1)),
        }
    }
}
