//! Tool layer: the [`Tool`] trait, its execution context, and the registry of
//! built-in document tools.
//!
//! Every transport (MCP over stdio, MCP over HTTP, the REST API and the CLI)
//! goes through [`ToolRegistry::call`], which validates parameters against
//! the tool's JSON Schema before executing it.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 ToolRegistry                 │
//! │  create / add_* / convert / download / ...   │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//!   ToolContext ─ DocumentStore ─ FormatConverter
//!               ─ TransferEncoder ─ Pipeline
//! ```
//!
//! Tool bodies are synchronous file work; they run on tokio's blocking pool
//! via [`ToolContext::run_blocking`].

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::config::Config;
use crate::convert::{backend_from_config, FormatConverter};
use crate::error::{DocError, DocResult};
use crate::paths::ScratchDir;
use crate::pipeline::Pipeline;
use crate::publish;
use crate::store::{DocumentStore, DEFAULT_PICTURE_WIDTH};
use crate::transfer::TransferEncoder;

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// A remotely invokable document operation.
///
/// Results are plain text. Failures are returned as [`DocError`] and turned
/// into marker-prefixed text (or an HTTP status) by the transport.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier used as the MCP tool name and REST route.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// JSON Schema of the parameters object (`type: "object"`).
    fn parameters_schema(&self) -> Value;

    /// Whether the tool removes or overwrites files.
    fn destructive(&self) -> bool {
        false
    }

    /// Executes the tool with parameters already checked by
    /// [`validate_params`], defaults included.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> DocResult<String>;
}

// ═══════════════════════════════════════════════════════════════════════
// ToolContext
// ═══════════════════════════════════════════════════════════════════════

/// Shared handles to the document services. Cheap to clone.
#[derive(Clone)]
pub struct ToolContext {
    store: DocumentStore,
    converter: FormatConverter,
    transfer: TransferEncoder,
    pipeline: Pipeline,
}

impl ToolContext {
    /// Opens the scratch directory and wires the services selected by `config`.
    pub fn from_config(config: &Config) -> DocResult<Self> {
        let scratch = ScratchDir::open(&config.storage.scratch_dir)?;
        let store = DocumentStore::new(scratch.clone());
        let converter =
            FormatConverter::new(scratch.clone(), backend_from_config(&config.converter));
        let publisher: Arc<dyn publish::Publisher> =
            Arc::from(publish::from_config(&config.publish, &scratch));
        tracing::debug!(
            scratch = %scratch.root().display(),
            publisher = publisher.name(),
            "tool context ready"
        );
        Ok(Self {
            pipeline: Pipeline::new(store.clone(), converter.clone(), publisher),
            transfer: TransferEncoder::new(scratch),
            store,
            converter,
        })
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn converter(&self) -> &FormatConverter {
        &self.converter
    }

    pub fn transfer(&self) -> &TransferEncoder {
        &self.transfer
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Runs `work` on the blocking pool with a clone of this context.
    pub async fn run_blocking<F>(&self, work: F) -> DocResult<String>
    where
        F: FnOnce(ToolContext) -> DocResult<String> + Send + 'static,
    {
        let ctx = self.clone();
        tokio::task::spawn_blocking(move || work(ctx))
            .await
            .map_err(|e| DocError::External(format!("tool task failed: {}", e)))?
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter helpers
// ═══════════════════════════════════════════════════════════════════════

/// Validate parameters against a JSON Schema, checking required fields and
/// types and injecting defaults for absent optional ones.
pub fn validate_params(schema: &Value, params: &Value) -> DocResult<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(DocError::Malformed(format!(
                "parameters must be an object, got {}",
                json_type_name(other)
            )))
        }
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for req_field in &required {
        if !params_obj.contains_key(*req_field) {
            return Err(DocError::Malformed(format!(
                "missing required parameter: {}",
                req_field
            )));
        }
    }

    let mut result = params_obj.clone();
    for (prop_name, prop_schema) in &properties {
        match params_obj.get(prop_name) {
            Some(value) => {
                if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
                    let type_ok = match expected_type {
                        "string" => value.is_string(),
                        "integer" => value.is_i64() || value.is_u64(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        "array" => value.is_array(),
                        "object" => value.is_object(),
                        _ => true,
                    };
                    if !type_ok {
                        return Err(DocError::Malformed(format!(
                            "parameter '{}' must be of type '{}', got {}",
                            prop_name,
                            expected_type,
                            json_type_name(value)
                        )));
                    }
                }
            }
            None => {
                if let Some(default) = prop_schema.get("default") {
                    result.insert(prop_name.clone(), default.clone());
                }
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn str_param(params: &Value, name: &str) -> DocResult<String> {
    params[name]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| DocError::Malformed(format!("parameter '{}' must be a string", name)))
}

fn int_param(params: &Value, name: &str) -> DocResult<i64> {
    params[name].as_i64().ok_or_else(|| {
        DocError::Malformed(format!("parameter '{}' must be an integer", name))
    })
}

fn num_param(params: &Value, name: &str) -> DocResult<f64> {
    params[name]
        .as_f64()
        .ok_or_else(|| DocError::Malformed(format!("parameter '{}' must be a number", name)))
}

fn filename_schema() -> Value {
    json!({ "type": "string", "description": "Logical filename of the document" })
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in Tool Implementations
// ═══════════════════════════════════════════════════════════════════════

pub struct CreateDocumentTool;

#[async_trait]
impl Tool for CreateDocumentTool {
    fn name(&self) -> &str {
        "create_document"
    }

    fn description(&self) -> &str {
        "Create a new, empty Word document (replaces an existing one)"
    }

    fn destructive(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "filename": filename_schema() },
            "required": ["filename"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> DocResult<String> {
        let filename = str_param(&params, "filename")?;
        ctx.run_blocking(move |ctx| ctx.store().create_blank(&filename))
            .await
    }
}

pub struct AddHeadingTool;

#[async_trait]
impl Tool for AddHeadingTool {
    fn name(&self) -> &str {
        "add_heading"
    }

    fn description(&self) -> &str {
        "Append a heading to a document (level 0 is the Title style)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": filename_schema(),
                "text": { "type": "string", "description": "Heading text" },
                "level": { "type": "integer", "description": "Heading level, 0-9", "default": 1 }
            },
            "required": ["filename", "text"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> DocResult<String> {
        let filename = str_param(&params, "filename")?;
        let text = str_param(&params, "text")?;
        let level = int_param(&params, "level")?;
        ctx.run_blocking(move |ctx| ctx.store().add_heading(&filename, &text, level))
            .await
    }
}

pub struct AddParagraphTool;

#[async_trait]
impl Tool for AddParagraphTool {
    fn name(&self) -> &str {
        "add_paragraph"
    }

    fn description(&self) -> &str {
        "Append a paragraph of plain text to a document"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": filename_schema(),
                "text": { "type": "string", "description": "Paragraph text; newlines become line breaks" }
            },
            "required": ["filename", "text"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> DocResult<String> {
        let filename = str_param(&params, "filename")?;
        let text = str_param(&params, "text")?;
        ctx.run_blocking(move |ctx| ctx.store().add_paragraph(&filename, &text))
            .await
    }
}

pub struct AddTableTool;

#[async_trait]
impl Tool for AddTableTool {
    fn name(&self) -> &str {
        "add_table"
    }

    fn description(&self) -> &str {
        "Append an empty table with the given number of rows and columns"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": filename_schema(),
                "rows": { "type": "integer", "description": "Number of rows, 1-1000" },
                "cols": { "type": "integer", "description": "Number of columns, 1-63" }
            },
            "required": ["filename", "rows", "cols"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> DocResult<String> {
        let filename = str_param(&params, "filename")?;
        let rows = int_param(&params, "rows")?;
        let cols = int_param(&params, "cols")?;
        ctx.run_blocking(move |ctx| ctx.store().add_table(&filename, rows, cols))
            .await
    }
}

pub struct AddPictureTool;

#[async_trait]
impl Tool for AddPictureTool {
    fn name(&self) -> &str {
        "add_picture"
    }

    fn description(&self) -> &str {
        "Append a PNG or JPEG image, previously uploaded to the scratch area"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": filename_schema(),
                "image_path": { "type": "string", "description": "Logical filename of the image" },
                "width": {
                    "type": "number",
                    "description": "Width in inches",
                    "default": DEFAULT_PICTURE_WIDTH
                }
            },
            "required": ["filename", "image_path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> DocResult<String> {
        let filename = str_param(&params, "filename")?;
        let image_path = str_param(&params, "image_path")?;
        let width = num_param(&params, "width")?;
        ctx.run_blocking(move |ctx| ctx.store().add_picture(&filename, &image_path, width))
            .await
    }
}

pub struct ConvertToPdfTool;

#[async_trait]
impl Tool for ConvertToPdfTool {
    fn name(&self) -> &str {
        "convert_to_pdf"
    }

    fn description(&self) -> &str {
        "Convert a document to PDF next to the source; the source is left unchanged"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "filename": filename_schema() },
            "required": ["filename"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> DocResult<String> {
        let filename = str_param(&params, "filename")?;
        ctx.run_blocking(move |ctx| {
            ctx.converter()
                .convert_to_pdf(&filename)
                .map(|c| c.to_string())
        })
        .await
    }
}

pub struct ConvertDocumentTool;

#[async_trait]
impl Tool for ConvertDocumentTool {
    fn name(&self) -> &str {
        "convert_document"
    }

    fn description(&self) -> &str {
        "Convert a document to another format (e.g. pdf, txt) next to the source"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": filename_schema(),
                "format": { "type": "string", "description": "Target file extension" }
            },
            "required": ["filename", "format"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> DocResult<String> {
        let filename = str_param(&params, "filename")?;
        let format = str_param(&params, "format")?;
        ctx.run_blocking(move |ctx| {
            ctx.converter()
                .convert(&filename, &format)
                .map(|c| c.to_string())
        })
        .await
    }
}

pub struct DownloadDocumentTool;

#[async_trait]
impl Tool for DownloadDocumentTool {
    fn name(&self) -> &str {
        "download_document"
    }

    fn description(&self) -> &str {
        "Return a file as base64 and delete it from the scratch area"
    }

    fn destructive(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "filename": filename_schema() },
            "required": ["filename"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> DocResult<String> {
        let filename = str_param(&params, "filename")?;
        ctx.run_blocking(move |ctx| ctx.transfer().download(&filename))
            .await
    }
}

pub struct UploadFileTool;

#[async_trait]
impl Tool for UploadFileTool {
    fn name(&self) -> &str {
        "upload_file"
    }

    fn description(&self) -> &str {
        "Store base64 content (an image or document) in the scratch area"
    }

    fn destructive(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": filename_schema(),
                "content": { "type": "string", "description": "Base64-encoded file content" }
            },
            "required": ["filename", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> DocResult<String> {
        let filename = str_param(&params, "filename")?;
        let content = str_param(&params, "content")?;
        ctx.run_blocking(move |ctx| ctx.transfer().upload(&filename, &content))
            .await
    }
}

pub struct DeleteDocumentTool;

#[async_trait]
impl Tool for DeleteDocumentTool {
    fn name(&self) -> &str {
        "delete_document"
    }

    fn description(&self) -> &str {
        "Delete a file from the scratch area"
    }

    fn destructive(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "filename": filename_schema() },
            "required": ["filename"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> DocResult<String> {
        let filename = str_param(&params, "filename")?;
        ctx.run_blocking(move |ctx| ctx.store().delete(&filename))
            .await
    }
}

pub struct ProcessDocumentTool;

#[async_trait]
impl Tool for ProcessDocumentTool {
    fn name(&self) -> &str {
        "process_document"
    }

    fn description(&self) -> &str {
        "Build a document from <header>...</header> and <body>...</body>, convert it to PDF and publish it"
    }

    fn destructive(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "input_string": {
                    "type": "string",
                    "description": "Text with exactly one <header> and one <body> region"
                },
                "filename": filename_schema()
            },
            "required": ["input_string", "filename"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> DocResult<String> {
        let input = str_param(&params, "input_string")?;
        let filename = str_param(&params, "filename")?;
        ctx.run_blocking(move |ctx| ctx.pipeline().process(&input, &filename))
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry of tools, looked up by name.
///
/// ```rust
/// use word_mcp::traits::ToolRegistry;
///
/// let tools = ToolRegistry::with_builtins();
/// assert!(tools.find("create_document").is_some());
/// ```
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Create a registry pre-loaded with every document tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CreateDocumentTool));
        registry.register(Box::new(AddHeadingTool));
        registry.register(Box::new(AddParagraphTool));
        registry.register(Box::new(AddTableTool));
        registry.register(Box::new(AddPictureTool));
        registry.register(Box::new(ConvertToPdfTool));
        registry.register(Box::new(ConvertDocumentTool));
        registry.register(Box::new(DownloadDocumentTool));
        registry.register(Box::new(UploadFileTool));
        registry.register(Box::new(DeleteDocumentTool));
        registry.register(Box::new(ProcessDocumentTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Looks up, validates and executes a tool. Failures are logged here so
    /// every transport reports them the same way.
    pub async fn call(&self, name: &str, params: Value, ctx: &ToolContext) -> DocResult<String> {
        let tool = self
            .find(name)
            .ok_or_else(|| DocError::NotFound(format!("no tool named `{}`", name)))?;
        let result = match validate_params(&tool.parameters_schema(), &params) {
            Ok(params) => tool.execute(params, ctx).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::warn!(tool = name, kind = e.kind().code(), error = %e, "tool call failed");
        }
        result
    }

    /// Like [`call`](Self::call) but folds errors into marker-prefixed text.
    pub async fn call_text(&self, name: &str, params: Value, ctx: &ToolContext) -> String {
        match self.call(name, params, ctx).await {
            Ok(text) => text,
            Err(e) => e.to_tool_text(),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
