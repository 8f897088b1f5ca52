//! TOML configuration.
//!
//! Every section is optional. A missing file means [`Config::minimal`]; a file
//! that exists but cannot be parsed or fails validation is an error.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub publish: PublishConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
        }
    }
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("word-mcp")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8765".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConverterConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_command_args")]
    pub args: Vec<String>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            command: default_command(),
            args: default_command_args(),
        }
    }
}

fn default_backend() -> String {
    "builtin".to_string()
}
fn default_command() -> String {
    "soffice".to_string()
}
fn default_command_args() -> Vec<String> {
    vec!["--headless".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublishConfig {
    #[serde(default = "default_target")]
    pub target: String,
    /// Defaults to `<scratch_dir>-outbox`. Must lie outside `scratch_dir`.
    #[serde(default)]
    pub outbox_dir: Option<PathBuf>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            outbox_dir: None,
            url: None,
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_target() -> String {
    "outbox".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Configuration used when no file is present.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Minimal configuration rooted at `scratch_dir`.
    pub fn with_scratch_dir(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                scratch_dir: scratch_dir.into(),
            },
            ..Self::minimal()
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::minimal());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.storage.scratch_dir.as_os_str().is_empty() {
        anyhow::bail!("storage.scratch_dir must not be empty");
    }

    match config.converter.backend.as_str() {
        "builtin" => {}
        "command" => {
            if config.converter.command.trim().is_empty() {
                anyhow::bail!("converter.command must be set when backend is 'command'");
            }
        }
        other => anyhow::bail!(
            "Unknown converter backend: '{}'. Must be builtin or command.",
            other
        ),
    }

    match config.publish.target.as_str() {
        "outbox" | "none" => {}
        "http" => match &config.publish.url {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
            Some(url) => anyhow::bail!("publish.url must be an http(s) URL, got '{}'", url),
            None => anyhow::bail!("publish.url must be specified when target is 'http'"),
        },
        other => anyhow::bail!(
            "Unknown publish target: '{}'. Must be outbox, http, or none.",
            other
        ),
    }

    if let Some(outbox) = &config.publish.outbox_dir {
        if outbox.starts_with(&config.storage.scratch_dir) {
            anyhow::bail!("publish.outbox_dir must be outside storage.scratch_dir");
        }
    }

    if config.publish.timeout_secs == 0 {
        anyhow::bail!("publish.timeout_secs must be > 0");
    }

    Ok(())
}
