//! # word-mcp CLI
//!
//! Serves the document tools over MCP and drives them from the shell.
//!
//! ## Usage
//!
//! ```bash
//! word-mcp --config ./config/word-mcp.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `word-mcp serve stdio` | Serve MCP over stdin/stdout |
//! | `word-mcp serve http` | Serve the REST API and MCP Streamable HTTP |
//! | `word-mcp tool list` | List every tool with its parameters |
//! | `word-mcp tool call <name> --param k=v` | Call one tool and print its result |
//! | `word-mcp save <payload> <output>` | Decode a downloaded payload to a file |
//!
//! ## Examples
//!
//! ```bash
//! word-mcp tool call create_document --param filename=report.docx
//! word-mcp tool call add_heading --param filename=report.docx --param text=Summary --param level=1
//! word-mcp tool call convert_to_pdf --param filename=report.docx
//! word-mcp tool call download_document --param filename=report.pdf > report.b64
//! word-mcp save report.b64 ./report.pdf
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use word_mcp::config::{self, Config};
use word_mcp::error::is_error_text;
use word_mcp::server;
use word_mcp::traits::{ToolContext, ToolRegistry};
use word_mcp::transfer;

/// word-mcp: build, convert and transfer Word documents through MCP tools.
#[derive(Parser)]
#[command(name = "word-mcp", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/word-mcp.toml`. A missing file means built-in
    /// defaults.
    #[arg(long, global = true, default_value = "./config/word-mcp.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a server.
    Serve {
        #[command(subcommand)]
        transport: ServeTransport,
    },

    /// List or call tools directly.
    Tool {
        #[command(subcommand)]
        action: ToolAction,
    },

    /// Decode a base64 transfer payload into a local file.
    ///
    /// PAYLOAD is a file holding the text returned by `download_document`,
    /// or `-` to read it from stdin.
    Save {
        payload: String,
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum ServeTransport {
    /// MCP over stdin/stdout, for clients that spawn the server.
    Stdio,
    /// REST API plus MCP Streamable HTTP at `/mcp`, on `[server].bind`.
    Http,
}

#[derive(Subcommand)]
enum ToolAction {
    /// List all tools with their parameter schemas.
    List,
    /// Call a tool once and print its text result.
    Call {
        name: String,
        /// Tool parameters as `key=value` pairs. Values that parse as JSON
        /// (numbers, booleans, quoted strings) are passed as JSON.
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },
}

/// Parse a `key=value` string into a tuple.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Builds the parameters object. Values of string-typed parameters are kept
/// verbatim; others are parsed as JSON scalars when possible.
fn params_to_json(
    schema: &serde_json::Value,
    params: Vec<(String, String)>,
) -> serde_json::Value {
    let map = params
        .into_iter()
        .map(|(k, v)| {
            let value = if schema["properties"][k.as_str()]["type"] == "string" {
                serde_json::Value::String(v)
            } else {
                serde_json::from_str::<serde_json::Value>(&v)
                    .ok()
                    .filter(|j| !j.is_object() && !j.is_array())
                    .unwrap_or(serde_json::Value::String(v))
            };
            (k, value)
        })
        .collect();
    serde_json::Value::Object(map)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load(cli: &Cli) -> anyhow::Result<Config> {
    config::load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match &cli.command {
        Commands::Serve { transport } => {
            let config = load(&cli)?;
            match transport {
                ServeTransport::Stdio => server::run_stdio(&config).await?,
                ServeTransport::Http => server::run_http(&config).await?,
            }
        }
        Commands::Tool { action } => match action {
            ToolAction::List => {
                for tool in ToolRegistry::with_builtins().tools() {
                    println!("{}", tool.name());
                    println!("    {}", tool.description());
                    println!(
                        "    params: {}",
                        serde_json::to_string(&tool.parameters_schema()["properties"])?
                    );
                }
            }
            ToolAction::Call { name, params } => {
                let config = load(&cli)?;
                let ctx = ToolContext::from_config(&config)?;
                let tools = ToolRegistry::with_builtins();
                let schema = tools
                    .find(name)
                    .map(|t| t.parameters_schema())
                    .unwrap_or_default();
                let text = tools
                    .call_text(name, params_to_json(&schema, params.clone()), &ctx)
                    .await;
                if is_error_text(&text) {
                    eprintln!("{}", text);
                    std::process::exit(1);
                }
                println!("{}", text);
            }
        },
        Commands::Save { payload, output } => {
            let text = if payload == "-" {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                std::fs::read_to_string(payload)
                    .with_context(|| format!("reading payload {}", payload))?
            };
            if is_error_text(text.trim_start()) {
                bail!("payload is an error result: {}", text.trim());
            }
            let written = transfer::save(&text, output)?;
            println!("Wrote {} bytes to {}", written, output.display());
        }
    }

    Ok(())
}
