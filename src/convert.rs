//! Format Converter: produce a sibling file of a different format.
//!
//! The source is read under its path lock and handed to a [`Converter`]
//! backend as bytes, so no backend can modify the source file. The result is
//! written atomically to the derived target path under the target's lock.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use crate::config::ConverterConfig;
use crate::docx::{Block, Document};
use crate::error::{display_name, DocError, DocResult};
use crate::paths::{derive_target_path, ScratchDir, DOCUMENT_EXTENSION};
use crate::pdf::{render_pdf, PICTURE_PLACEHOLDER};
use crate::store::write_atomic;

/// A conversion backend. Implementations must release every resource they
/// acquire before returning, on success and on failure.
pub trait Converter: Send + Sync {
    fn name(&self) -> &str;

    /// Converts DOCX bytes to `format` (a normalized extension such as `pdf`).
    fn convert(&self, source: &[u8], format: &str) -> DocResult<Vec<u8>>;
}

/// Renders PDF and plain text from the document model, in process.
#[derive(Debug, Default)]
pub struct BuiltinConverter;

impl Converter for BuiltinConverter {
    fn name(&self) -> &str {
        "builtin"
    }

    fn convert(&self, source: &[u8], format: &str) -> DocResult<Vec<u8>> {
        let doc = Document::from_bytes(source)
            .map_err(|e| DocError::External(format!("cannot load document: {}", e)))?;
        match format {
            "pdf" => render_pdf(&doc),
            "txt" => Ok(render_text(&doc).into_bytes()),
            other => Err(DocError::Malformed(format!(
                "the builtin converter cannot produce `{}`, use pdf or txt",
                other
            ))),
        }
    }
}

/// Runs an external office converter (LibreOffice by default) in a private
/// temporary directory that is removed when the call returns.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: String,
    args: Vec<String>,
}

impl CommandConverter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Converter for CommandConverter {
    fn name(&self) -> &str {
        &self.program
    }

    fn convert(&self, source: &[u8], format: &str) -> DocResult<Vec<u8>> {
        let workdir = tempfile::TempDir::new()
            .map_err(|e| DocError::io("creating converter workspace", e))?;
        let input = workdir.path().join(format!("source.{}", DOCUMENT_EXTENSION));
        let outdir = workdir.path().join("out");
        std::fs::write(&input, source)
            .and_then(|_| std::fs::create_dir(&outdir))
            .map_err(|e| DocError::io("staging converter input", e))?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("--convert-to")
            .arg(format)
            .arg("--outdir")
            .arg(&outdir)
            .arg(&input)
            .output()
            .map_err(|e| {
                DocError::External(format!("cannot run converter `{}`: {}", self.program, e))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DocError::External(format!(
                "converter `{}` exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let produced = std::fs::read_dir(&outdir)
            .map_err(|e| DocError::io("reading converter output", e))?
            .flatten()
            .map(|entry| entry.path())
            .find(|p| p.is_file())
            .ok_or_else(|| {
                DocError::External(format!(
                    "converter `{}` produced no {} output",
                    self.program, format
                ))
            })?;
        std::fs::read(&produced).map_err(|e| DocError::io("reading converter output", e))
    }
}

/// Builds the backend selected by `[converter]`.
pub fn backend_from_config(config: &ConverterConfig) -> Arc<dyn Converter> {
    match config.backend.as_str() {
        "command" => Arc::new(CommandConverter::new(
            config.command.clone(),
            config.args.clone(),
        )),
        _ => Arc::new(BuiltinConverter),
    }
}

/// Outcome of a successful conversion.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl fmt::Display for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Document `{}` converted to `{}` successfully.",
            display_name(&self.source),
            display_name(&self.target)
        )
    }
}

#[derive(Clone)]
pub struct FormatConverter {
    scratch: ScratchDir,
    backend: Arc<dyn Converter>,
}

impl FormatConverter {
    pub fn new(scratch: ScratchDir, backend: Arc<dyn Converter>) -> Self {
        Self { scratch, backend }
    }

    pub fn convert_to_pdf(&self, filename: &str) -> DocResult<Conversion> {
        self.convert(filename, "pdf")
    }

    pub fn convert(&self, filename: &str, format: &str) -> DocResult<Conversion> {
        let format = normalize_format(format)?;
        let source = self.scratch.resolve(filename);
        let target = derive_target_path(&source, &format);

        let bytes = {
            let _lock = self.scratch.lock(&source);
            std::fs::read(&source).map_err(|e| DocError::from_read(&source, e))?
        };
        let converted = self.backend.convert(&bytes, &format)?;
        {
            let _lock = self.scratch.lock(&target);
            write_atomic(&target, &converted)?;
        }

        tracing::info!(
            source = %display_name(&source),
            target = %display_name(&target),
            backend = self.backend.name(),
            "document converted"
        );
        Ok(Conversion { source, target })
    }
}

/// Lowercased extension without a leading dot; 1-8 ASCII alphanumerics.
pub fn normalize_format(format: &str) -> DocResult<String> {
    let format = format.trim().trim_start_matches('.').to_ascii_lowercase();
    let valid = (1..=8).contains(&format.len())
        && format.chars().all(|c| c.is_ascii_alphanumeric());
    if !valid {
        return Err(DocError::Malformed(format!(
            "invalid target format `{}`",
            format
        )));
    }
    if format == DOCUMENT_EXTENSION {
        return Err(DocError::Malformed(
            "target format must differ from docx".to_string(),
        ));
    }
    Ok(format)
}

/// Plain-text rendering: one block per paragraph, table cells tab-separated.
pub fn render_text(doc: &Document) -> String {
    let mut parts = Vec::new();
    for block in doc.blocks() {
        match block {
            Block::Heading { text, .. } | Block::Paragraph { text } => parts.push(text.clone()),
            Block::Table { cells } => parts.push(
                cells
                    .iter()
                    .map(|row| row.join("\t"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            Block::Picture { caption, .. } if !caption.trim().is_empty() => {
                parts.push(format!("{}\n{}", PICTURE_PLACEHOLDER, caption))
            }
            Block::Picture { .. } => parts.push(PICTURE_PLACEHOLDER.to_string()),
            Block::Other { .. } => {}
        }
    }
    let mut text = parts.join("\n\n");
    text.push('\n');
    text
}
