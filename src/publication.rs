//! Publication opening: title and authors for the catalog.

use roxmltree::Document;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use zip::ZipArchive;

/// Metadata read from a publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    /// Title, falling back to the file stem.
    pub title: String,
    /// Authors in package order.
    pub authors: Vec<String>,
}

/// Why a publication could not be opened.
#[derive(Error, Debug)]
pub enum PublicationError {
    /// The file could not be read as an archive.
    #[error("cannot retrieve asset: {0}")]
    AssetRetrieval(String),

    /// The archive was read but holds no usable package document.
    #[error("cannot open publication: {0}")]
    Open(String),
}

impl From<std::io::Error> for PublicationError {
    fn from(e: std::io::Error) -> Self {
        PublicationError::AssetRetrieval(e.to_string())
    }
}

/// Opens publications on disk.
pub trait PublicationOpener: Send + Sync {
    /// Open `path` and read its metadata.
    fn open(&self, path: &Path) -> Result<Publication, PublicationError>;
}

/// Opener for EPUB files.
pub struct EpubOpener;

impl EpubOpener {
    /// Find the OPF file path from container.xml.
    fn find_opf_path(archive: &mut ZipArchive<File>) -> Result<String, PublicationError> {
        let content = read_entry(archive, "META-INF/container.xml")?;
        let doc = Document::parse(&content).map_err(|e| PublicationError::Open(e.to_string()))?;

        doc.descendants()
            .find(|n| n.has_tag_name("rootfile"))
            .and_then(|n| n.attribute("full-path"))
            .map(String::from)
            .ok_or_else(|| PublicationError::Open("no rootfile in container.xml".into()))
    }

    /// Pull title and creators out of the package document.
    fn parse_opf(content: &str, fallback_title: &str) -> Result<Publication, PublicationError> {
        let doc = Document::parse(content).map_err(|e| PublicationError::Open(e.to_string()))?;

        let mut title = None;
        let mut authors = Vec::new();

        for node in doc.descendants() {
            match node.tag_name().name() {
                "title" if title.is_none() => {
                    title = node.text().map(str::trim).filter(|t| !t.is_empty()).map(String::from);
                }
                "creator" => {
                    if let Some(text) = node.text().map(str::trim).filter(|t| !t.is_empty()) {
                        authors.push(text.to_string());
                    }
                }
                _ => {}
            }
        }

        Ok(Publication {
            title: title.unwrap_or_else(|| fallback_title.to_string()),
            authors,
        })
    }
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<String, PublicationError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| PublicationError::Open(format!("{}: {}", name, e)))?;
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| PublicationError::Open(format!("{}: {}", name, e)))?;
    Ok(content)
}

impl PublicationOpener for EpubOpener {
    fn open(&self, path: &Path) -> Result<Publication, PublicationError> {
        let file = File::open(path)?;
        let mut archive =
            ZipArchive::new(file).map_err(|e| PublicationError::AssetRetrieval(e.to_string()))?;

        let opf_path = Self::find_opf_path(&mut archive)?;
        let opf = read_entry(&mut archive, &opf_path)?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown");

        Self::parse_opf(&opf, stem)
    }
}
