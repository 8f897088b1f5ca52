//! Domain error type shared by every document operation.
//!
//! Tool results cross the call boundary as text, so every error renders to a
//! string that starts with [`ERROR_MARKER`] followed by a kind label. Callers
//! test for the marker instead of relying on a separate error channel.

use std::path::Path;

/// Prefix of every error result returned by a tool.
pub const ERROR_MARKER: &str = "Error: ";

/// Coarse classification of a [`DocError`], stable across wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Malformed,
    External,
    Io,
}

impl ErrorKind {
    /// Machine-readable code used by the REST API error body.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Malformed => "bad_request",
            ErrorKind::External => "external_failure",
            ErrorKind::Io => "io_failure",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocError {
    /// A resolved path was absent when a load or download required it.
    #[error("not found: {0}")]
    NotFound(String),

    /// The input violates a structural contract (missing tags, bad level, ...).
    #[error("malformed input: {0}")]
    Malformed(String),

    /// The document model, converter, or publish target failed.
    #[error("external failure: {0}")]
    External(String),

    #[error("i/o failure: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A pipeline stage failed; the inner error keeps its kind.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<DocError>,
    },
}

pub type DocResult<T> = Result<T, DocError>;

impl DocError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocError::NotFound(_) => ErrorKind::NotFound,
            DocError::Malformed(_) => ErrorKind::Malformed,
            DocError::External(_) => ErrorKind::External,
            DocError::Io { .. } => ErrorKind::Io,
            DocError::Stage { source, .. } => source.kind(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        DocError::Io {
            context: context.into(),
            source,
        }
    }

    /// Maps a failed read of `path` to `NotFound` when the file is absent,
    /// and to an I/O failure otherwise.
    pub fn from_read(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            DocError::NotFound(format!("`{}` does not exist", display_name(path)))
        } else {
            DocError::io(format!("reading `{}`", display_name(path)), source)
        }
    }

    pub fn in_stage(self, stage: &'static str) -> Self {
        DocError::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Text form returned across the call boundary.
    pub fn to_tool_text(&self) -> String {
        format!("{}{}", ERROR_MARKER, self)
    }
}

/// Returns true if a tool result is an error result.
pub fn is_error_text(text: &str) -> bool {
    text.starts_with(ERROR_MARKER)
}

/// The file-name component of a path, for messages that must not leak the
/// scratch root.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
