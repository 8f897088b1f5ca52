//! Transfer Encoder: move whole files across the text-only call boundary.
//!
//! `download` is destructive: the source file is deleted once its bytes have
//! been read and encoded, so a document can be fetched at most once. The
//! caller-side helpers ([`encode`], [`decode`], [`save`]) are the inverse and
//! are used by the CLI `save` command.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{display_name, DocError, DocResult};
use crate::paths::ScratchDir;
use crate::store::write_atomic;

#[derive(Debug, Clone)]
pub struct TransferEncoder {
    scratch: ScratchDir,
}

impl TransferEncoder {
    pub fn new(scratch: ScratchDir) -> Self {
        Self { scratch }
    }

    /// Reads, encodes and deletes the file named by `filename`.
    pub fn download(&self, filename: &str) -> DocResult<String> {
        let path = self.scratch.resolve(filename);
        let _lock = self.scratch.lock(&path);
        let bytes = std::fs::read(&path).map_err(|e| DocError::from_read(&path, e))?;
        let encoded = encode(&bytes);
        std::fs::remove_file(&path)
            .map_err(|e| DocError::io(format!("removing `{}`", display_name(&path)), e))?;
        tracing::info!(
            file = %display_name(&path),
            bytes = bytes.len(),
            "file downloaded and removed"
        );
        Ok(encoded)
    }

    /// Decodes `encoded` and stores it at the resolved path, replacing any
    /// existing file.
    pub fn upload(&self, filename: &str, encoded: &str) -> DocResult<String> {
        let bytes = decode(encoded)?;
        let path = self.scratch.resolve(filename);
        let _lock = self.scratch.lock(&path);
        write_atomic(&path, &bytes)?;
        tracing::info!(file = %display_name(&path), bytes = bytes.len(), "file uploaded");
        Ok(format!(
            "File `{}` uploaded successfully ({} bytes).",
            display_name(&path),
            bytes.len()
        ))
    }
}

/// Padded standard base64.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Lenient inverse of [`encode`]: ASCII whitespace is ignored and missing
/// trailing padding is restored before strict decoding.
pub fn decode(text: &str) -> DocResult<Vec<u8>> {
    let mut compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    match compact.len() % 4 {
        0 => {}
        1 => {
            return Err(DocError::Malformed(format!(
                "payload of {} characters is not valid base64",
                compact.len()
            )))
        }
        rem => compact.extend(std::iter::repeat('=').take(4 - rem)),
    }
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| DocError::Malformed(format!("invalid base64 payload: {}", e)))
}

/// Decodes a payload and writes it to a local path outside the sandbox.
pub fn save(text: &str, local_path: &Path) -> DocResult<usize> {
    let bytes = decode(text)?;
    std::fs::write(local_path, &bytes)
        .map_err(|e| DocError::io(format!("writing {}", local_path.display()), e))?;
    Ok(bytes.len())
}
