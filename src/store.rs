//! Document Store: create, mutate, and delete staged documents.
//!
//! Every mutation is a load-append-save sequence on the resolved path, run
//! while holding that path's advisory lock. Saves go through a temporary file
//! in the scratch directory that is renamed over the target, so a document is
//! always either its previous or its new version on disk.

use std::path::Path;

use crate::docx::{Document, DocxError, EMU_PER_INCH, MAX_HEADING_LEVEL, MAX_TABLE_COLS, MAX_TABLE_ROWS};
use crate::error::{display_name, DocError, DocResult};
use crate::paths::ScratchDir;

/// Default picture width, in inches.
pub const DEFAULT_PICTURE_WIDTH: f64 = 2.5;
/// Widest picture Word accepts, in inches.
pub const MAX_PICTURE_WIDTH: f64 = 22.0;

impl From<DocxError> for DocError {
    fn from(err: DocxError) -> Self {
        match err {
            DocxError::InvalidText(_) | DocxError::UnsupportedImage(_) => {
                DocError::Malformed(err.to_string())
            }
            other => DocError::External(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentStore {
    scratch: ScratchDir,
}

impl DocumentStore {
    pub fn new(scratch: ScratchDir) -> Self {
        Self { scratch }
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    /// Writes a new, empty document, replacing any existing file.
    pub fn create_blank(&self, filename: &str) -> DocResult<String> {
        let path = self.scratch.resolve(filename);
        let _lock = self.scratch.lock(&path);
        save_document(&path, &Document::new())?;
        tracing::info!(file = %display_name(&path), "document created");
        Ok(format!(
            "Document `{}` created successfully",
            display_name(&path)
        ))
    }

    pub fn add_heading(&self, filename: &str, text: &str, level: i64) -> DocResult<String> {
        let level = u8::try_from(level)
            .ok()
            .filter(|l| *l <= MAX_HEADING_LEVEL)
            .ok_or_else(|| {
                DocError::Malformed(format!(
                    "heading level must be between 0 and {}, got {}",
                    MAX_HEADING_LEVEL, level
                ))
            })?;
        self.mutate(filename, "Heading added", |doc| {
            doc.add_heading(text, level).map_err(DocError::from)
        })
    }

    pub fn add_paragraph(&self, filename: &str, text: &str) -> DocResult<String> {
        self.mutate(filename, "Paragraph added", |doc| {
            doc.add_paragraph(text).map_err(DocError::from)
        })
    }

    pub fn add_table(&self, filename: &str, rows: i64, cols: i64) -> DocResult<String> {
        let rows = bounded(rows, "rows", MAX_TABLE_ROWS)?;
        let cols = bounded(cols, "cols", MAX_TABLE_COLS)?;
        self.mutate(filename, "Table added", |doc| {
            doc.add_table(rows, cols);
            Ok(())
        })
    }

    /// Appends a picture read from `image_path`, itself a logical filename in
    /// the scratch directory, scaled to `width_inches`.
    pub fn add_picture(
        &self,
        filename: &str,
        image_path: &str,
        width_inches: f64,
    ) -> DocResult<String> {
        if !width_inches.is_finite() || width_inches <= 0.0 || width_inches > MAX_PICTURE_WIDTH {
            return Err(DocError::Malformed(format!(
                "picture width must be greater than 0 and at most {} inches, got {}",
                MAX_PICTURE_WIDTH, width_inches
            )));
        }
        let image = {
            let image_path = self.scratch.resolve(image_path);
            let _lock = self.scratch.lock(&image_path);
            std::fs::read(&image_path).map_err(|e| DocError::from_read(&image_path, e))?
        };
        let width_emu = (width_inches * EMU_PER_INCH as f64).round() as u64;
        self.mutate(filename, "Picture added", |doc| {
            doc.add_picture(&image, width_emu).map_err(DocError::from)
        })
    }

    /// Removes a staged file.
    pub fn delete(&self, filename: &str) -> DocResult<String> {
        let path = self.scratch.resolve(filename);
        let _lock = self.scratch.lock(&path);
        std::fs::remove_file(&path).map_err(|e| DocError::from_read(&path, e))?;
        tracing::info!(file = %display_name(&path), "file deleted");
        Ok(format!("File `{}` deleted successfully.", display_name(&path)))
    }

    /// Loads the document, applies `apply`, and saves it back under the lock.
    fn mutate<F>(&self, filename: &str, done: &str, apply: F) -> DocResult<String>
    where
        F: FnOnce(&mut Document) -> DocResult<()>,
    {
        let path = self.scratch.resolve(filename);
        let _lock = self.scratch.lock(&path);
        let mut doc = load_document(&path)?;
        apply(&mut doc)?;
        save_document(&path, &doc)?;
        tracing::info!(file = %display_name(&path), "{}", done.to_lowercase());
        Ok(format!(
            "{} to `{}` successfully.",
            done,
            display_name(&path)
        ))
    }
}

fn bounded(value: i64, name: &str, max: u32) -> DocResult<u32> {
    u32::try_from(value)
        .ok()
        .filter(|v| (1..=max).contains(v))
        .ok_or_else(|| {
            DocError::Malformed(format!(
                "{} must be between 1 and {}, got {}",
                name, max, value
            ))
        })
}

/// Reads and parses the document at `path`. The caller holds the path lock.
pub fn load_document(path: &Path) -> DocResult<Document> {
    let bytes = std::fs::read(path).map_err(|e| DocError::from_read(path, e))?;
    Document::from_bytes(&bytes).map_err(|e| {
        DocError::External(format!(
            "document `{}` is unreadable: {}",
            display_name(path),
            e
        ))
    })
}

/// Serializes `doc` and atomically replaces `path`. The caller holds the path lock.
pub fn save_document(path: &Path, doc: &Document) -> DocResult<()> {
    let bytes = doc.to_bytes()?;
    write_atomic(path, &bytes)
}

/// Writes through a temporary sibling file that is renamed into place; the
/// temporary file is removed on every failure path.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> DocResult<()> {
    use std::io::Write;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| DocError::io(format!("staging `{}`", display_name(path)), e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.flush())
        .map_err(|e| DocError::io(format!("writing `{}`", display_name(path)), e))?;
    tmp.persist(path)
        .map_err(|e| DocError::io(format!("saving `{}`", display_name(path)), e.error))?;
    Ok(())
}
