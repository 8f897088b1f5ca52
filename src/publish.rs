//! Publish step: deliver a finished artifact outside the scratch namespace.
//!
//! The pipeline ends by handing its PDF to a [`Publisher`]. Which one is used
//! is chosen by the `[publish]` config section.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::PublishConfig;
use crate::error::{display_name, DocError, DocResult};
use crate::paths::ScratchDir;

pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    /// Publishes the file at `artifact` and returns a status message.
    fn publish(&self, artifact: &Path) -> DocResult<String>;
}

/// Moves artifacts into a directory that logical filenames cannot reach.
#[derive(Debug, Clone)]
pub struct OutboxPublisher {
    dir: PathBuf,
}

impl OutboxPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Publisher for OutboxPublisher {
    fn name(&self) -> &str {
        "outbox"
    }

    fn publish(&self, artifact: &Path) -> DocResult<String> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| DocError::io("creating the outbox directory", e))?;
        let dest = self.dir.join(display_name(artifact));
        if std::fs::rename(artifact, &dest).is_err() {
            // Outbox on another filesystem.
            std::fs::copy(artifact, &dest)
                .and_then(|_| std::fs::remove_file(artifact))
                .map_err(|e| DocError::from_read(artifact, e))?;
        }
        tracing::info!(file = %display_name(artifact), outbox = %self.dir.display(), "artifact published");
        Ok(format!("Published `{}` to the outbox", display_name(artifact)))
    }
}

/// Uploads artifacts with `PUT {base_url}/{file name}`.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpPublisher {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.into(),
            token,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn url_for(&self, artifact: &Path) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            display_name(artifact)
        )
    }
}

impl Publisher for HttpPublisher {
    fn name(&self) -> &str {
        "http"
    }

    fn publish(&self, artifact: &Path) -> DocResult<String> {
        let body = std::fs::read(artifact).map_err(|e| DocError::from_read(artifact, e))?;
        let url = self.url_for(artifact);

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| DocError::External(format!("http client: {}", e)))?;
        let mut request = client
            .put(&url)
            .header("Content-Type", "application/octet-stream")
            .body(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .map_err(|e| DocError::External(format!("PUT {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(DocError::External(format!(
                "PUT {} returned {}: {}",
                url,
                status,
                text.trim()
            )));
        }

        std::fs::remove_file(artifact).map_err(|e| {
            DocError::io(format!("removing `{}`", display_name(artifact)), e)
        })?;
        tracing::info!(file = %display_name(artifact), url = %url, "artifact published");
        Ok(format!("Published `{}` to {}", display_name(artifact), url))
    }
}

/// Leaves the artifact in the scratch directory.
#[derive(Debug, Clone, Default)]
pub struct KeepPublisher;

impl Publisher for KeepPublisher {
    fn name(&self) -> &str {
        "none"
    }

    fn publish(&self, artifact: &Path) -> DocResult<String> {
        if !artifact.is_file() {
            return Err(DocError::NotFound(format!(
                "`{}` does not exist",
                display_name(artifact)
            )));
        }
        Ok(format!(
            "Kept `{}` in the scratch directory",
            display_name(artifact)
        ))
    }
}

/// Builds the publisher selected by `[publish]`. `load_config` has already
/// checked that `http` carries a url.
pub fn from_config(config: &PublishConfig, scratch: &ScratchDir) -> Box<dyn Publisher> {
    match (config.target.as_str(), &config.url) {
        ("http", Some(url)) => Box::new(HttpPublisher::new(
            url.clone(),
            config.token.clone(),
            config.timeout_secs,
        )),
        ("none", _) => Box::new(KeepPublisher),
        _ => Box::new(OutboxPublisher::new(
            config
                .outbox_dir
                .clone()
                .unwrap_or_else(|| default_outbox(scratch.root())),
        )),
    }
}

/// `<scratch>-outbox`, next to the scratch root so no logical filename
/// resolves into it.
pub fn default_outbox(scratch_root: &Path) -> PathBuf {
    let name = scratch_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "word-mcp".to_string());
    match scratch_root.parent() {
        Some(parent) => parent.join(format!("{}-outbox", name)),
        None => std::env::temp_dir().join("word-mcp-outbox"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn outbox_moves_artifact_out_of_scratch() {
        let tmp = TempDir::new().unwrap();
        let scratch = ScratchDir::open(tmp.path().join("s")).unwrap();
        let artifact = scratch.resolve("report.pdf");
        std::fs::write(&artifact, b"%PDF").unwrap();

        let publisher = from_config(&PublishConfig::default(), &scratch);
        assert_eq!(publisher.name(), "outbox");
        let message = publisher.publish(&artifact).unwrap();
        assert_eq!(message, "Published `report.pdf` to the outbox");
        assert!(!artifact.exists());
        let outbox = tmp.path().join("s-outbox");
        assert_eq!(std::fs::read(outbox.join("report.pdf")).unwrap(), b"%PDF");
        assert!(!scratch.resolve("s-outbox").starts_with(&outbox));
    }

    #[test]
    fn document_named_outbox_does_not_block_publishing() {
        let tmp = TempDir::new().unwrap();
        let scratch = ScratchDir::open(tmp.path().join("s")).unwrap();
        std::fs::write(scratch.resolve("outbox"), b"docx").unwrap();
        let artifact = scratch.resolve("a.pdf");
        std::fs::write(&artifact, b"%PDF").unwrap();

        from_config(&PublishConfig::default(), &scratch)
            .publish(&artifact)
            .unwrap();
        assert!(tmp.path().join("s-outbox").join("a.pdf").is_file());
    }

    #[test]
    fn outbox_errors_do_not_name_the_directory() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("taken");
        std::fs::write(&blocker, b"").unwrap();
        let artifact = tmp.path().join("a.pdf");
        std::fs::write(&artifact, b"%PDF").unwrap();

        let err = OutboxPublisher::new(&blocker).publish(&artifact).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(!err.to_string().contains(&*tmp.path().to_string_lossy()));
    }

    #[test]
    fn missing_artifact_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let outbox = OutboxPublisher::new(tmp.path().join("out"));
        let err = outbox.publish(&tmp.path().join("nope.pdf")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = KeepPublisher.publish(&tmp.path().join("nope.pdf")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn http_url_joins_file_name() {
        let publisher = HttpPublisher::new("https://uploads.example.com/docs/", None, 30);
        assert_eq!(
            publisher.url_for(Path::new("/scratch/a.pdf")),
            "https://uploads.example.com/docs/a.pdf"
        );
    }

    #[test]
    fn unreachable_http_target_is_external_failure() {
        let tmp = TempDir::new().unwrap();
        let artifact = tmp.path().join("a.pdf");
        std::fs::write(&artifact, b"%PDF").unwrap();
        let publisher = HttpPublisher::new("http://127.0.0.1:9", None, 2);
        let err = publisher.publish(&artifact).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::External);
        assert!(artifact.exists());
    }

    /// Serves one request with `status` and returns what the client sent.
    fn one_shot_server(status: &'static str) -> (String, std::thread::JoinHandle<String>) {
        use std::io::{BufRead, BufReader, Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}/docs", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut head = String::new();
            let mut length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    length = value.trim().parse().unwrap();
                }
                head.push_str(&line);
            }
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body).unwrap();
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                status
            );
            reader.get_mut().write_all(response.as_bytes()).unwrap();
            format!("{}{}", head, String::from_utf8_lossy(&body))
        });
        (base, handle)
    }

    #[test]
    fn http_success_uploads_and_removes_artifact() {
        let tmp = TempDir::new().unwrap();
        let artifact = tmp.path().join("a.pdf");
        std::fs::write(&artifact, b"%PDF-body").unwrap();
        let (base, server) = one_shot_server("200 OK");

        let publisher = HttpPublisher::new(&base, Some("secret".into()), 5);
        let message = publisher.publish(&artifact).unwrap();
        assert_eq!(message, format!("Published `a.pdf` to {}/a.pdf", base));
        assert!(!artifact.exists());

        let request = server.join().unwrap();
        assert!(request.starts_with("PUT /docs/a.pdf "), "{}", request);
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert!(request.ends_with("%PDF-body"));
    }

    #[test]
    fn http_error_status_is_external_and_keeps_artifact() {
        let tmp = TempDir::new().unwrap();
        let artifact = tmp.path().join("a.pdf");
        std::fs::write(&artifact, b"%PDF").unwrap();
        let (base, server) = one_shot_server("500 Internal Server Error");

        let err = HttpPublisher::new(&base, None, 5)
            .publish(&artifact)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::External);
        assert!(err.to_string().contains("500"), "{}", err);
        assert!(artifact.exists());
        let request = server.join().unwrap();
        assert!(!request.to_ascii_lowercase().contains("authorization"));
    }

    #[test]
    fn none_target_keeps_file() {
        let tmp = TempDir::new().unwrap();
        let scratch = ScratchDir::open(tmp.path()).unwrap();
        let artifact = scratch.resolve("a.pdf");
        std::fs::write(&artifact, b"%PDF").unwrap();
        let config = PublishConfig {
            target: "none".into(),
            ..PublishConfig::default()
        };
        from_config(&config, &scratch).publish(&artifact).unwrap();
        assert!(artifact.exists());
    }
}
