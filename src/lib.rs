//! # word-mcp
//!
//! MCP tools that build, convert and transfer Word (DOCX) documents for a
//! caller that never touches the server's filesystem.
//!
//! Every tool names its document by a logical filename. The server reduces
//! that name to a flat, sandboxed path in one scratch directory, so state is
//! carried between independent calls by the file on disk:
//!
//! ```text
//! create_document ─▶ add_heading / add_paragraph / add_table / add_picture
//!        │                          (load, append, atomic save)
//!        ▼
//! convert_to_pdf ──▶ a.pdf next to a.docx (source untouched)
//!        │
//!        ▼
//! download_document ──▶ base64 text, file deleted
//! ```
//!
//! `process_document` runs the same lifecycle from `<header>`/`<body>` tagged
//! text and publishes the PDF.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`paths`] | Filename sandboxing, derived paths, per-path locks |
//! | [`error`] | Error kinds and the `Error: ` result marker |
//! | [`docx`] | OOXML package model |
//! | [`store`] | Create, mutate and delete documents |
//! | [`pdf`] | Built-in PDF renderer |
//! | [`convert`] | Format conversion backends |
//! | [`transfer`] | Destructive base64 download, upload, caller-side decode |
//! | [`publish`] | Outbox, HTTP and no-op publishers |
//! | [`pipeline`] | Tagged-text to published PDF |
//! | [`traits`] | `Tool` trait, context and registry |
//! | [`mcp`] | MCP protocol bridge |
//! | [`server`] | stdio and HTTP transports |
//! | [`config`] | TOML configuration |

pub mod config;
pub mod convert;
pub mod docx;
pub mod error;
pub mod mcp;
pub mod paths;
pub mod pdf;
pub mod pipeline;
pub mod publish;
pub mod server;
pub mod store;
pub mod traits;
pub mod transfer;
