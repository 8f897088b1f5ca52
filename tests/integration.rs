//! Library-level tests: tools called through the registry, the way every
//! transport calls them, against a temporary scratch directory.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;
use word_mcp::config::Config;
use word_mcp::docx::Block;
use word_mcp::store::load_document;
use word_mcp::traits::{ToolContext, ToolRegistry};
use word_mcp::transfer;

struct Env {
    _tmp: TempDir,
    scratch: PathBuf,
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
}

impl Env {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let ctx = ToolContext::from_config(&Config::with_scratch_dir(tmp.path().join("scratch")))
            .unwrap();
        let scratch = ctx.store().scratch().root().to_path_buf();
        Self {
            _tmp: tmp,
            scratch,
            tools: Arc::new(ToolRegistry::with_builtins()),
            ctx,
        }
    }

    async fn call(&self, name: &str, params: Value) -> String {
        self.tools.call_text(name, params, &self.ctx).await
    }

    async fn ok(&self, name: &str, params: Value) -> String {
        let text = self.call(name, params).await;
        assert!(!text.starts_with("Error: "), "{} failed: {}", name, text);
        text
    }
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([30, 120, 200]),
    ));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

#[tokio::test]
async fn test_create_edit_convert_download_scenario() {
    let env = Env::new();

    let created = env.ok("create_document", json!({ "filename": "a.docx" })).await;
    assert_eq!(created, "Document `a.docx` created successfully");
    env.ok(
        "add_heading",
        json!({ "filename": "a.docx", "text": "Title", "level": 1 }),
    )
    .await;
    env.ok("add_paragraph", json!({ "filename": "a.docx", "text": "Hello" }))
        .await;
    let converted = env.ok("convert_to_pdf", json!({ "filename": "a.docx" })).await;
    assert_eq!(converted, "Document `a.docx` converted to `a.pdf` successfully.");

    let payload = env.ok("download_document", json!({ "filename": "a.pdf" })).await;
    let pdf = transfer::decode(&payload).unwrap();
    assert!(pdf.starts_with(b"%PDF"));

    let text = pdf_extract::extract_text_from_mem(&pdf).unwrap();
    let title = text.find("Title").expect("heading text in PDF");
    let hello = text.find("Hello").expect("paragraph text in PDF");
    assert!(title < hello, "unexpected order in {:?}", text);

    assert!(!env.scratch.join("a.pdf").exists());
    assert!(env.scratch.join("a.docx").exists());
}

#[tokio::test]
async fn test_download_missing_returns_not_found_marker() {
    let env = Env::new();
    let text = env
        .call("download_document", json!({ "filename": "missing.docx" }))
        .await;
    assert!(text.starts_with("Error: not found:"), "{}", text);
    assert!(text.contains("missing.docx"));
}

#[tokio::test]
async fn test_download_is_single_use() {
    let env = Env::new();
    env.ok("create_document", json!({ "filename": "once.docx" }))
        .await;
    env.ok("download_document", json!({ "filename": "once.docx" }))
        .await;
    let second = env
        .call("download_document", json!({ "filename": "once.docx" }))
        .await;
    assert!(second.starts_with("Error: not found:"), "{}", second);
}

#[tokio::test]
async fn test_traversal_filenames_stay_in_scratch() {
    let env = Env::new();
    env.ok(
        "create_document",
        json!({ "filename": "../../outside/escape.docx" }),
    )
    .await;
    assert!(env.scratch.join("escape.docx").is_file());
    assert!(!env.scratch.parent().unwrap().join("outside").exists());
}

#[tokio::test]
async fn test_process_without_body_writes_nothing() {
    let env = Env::new();
    let text = env
        .call(
            "process_document",
            json!({ "input_string": "<header>Only a header</header>", "filename": "p.docx" }),
        )
        .await;
    assert!(text.starts_with("Error: malformed input:"), "{}", text);
    assert!(!env.scratch.join("p.docx").exists());
    assert!(!env.scratch.join("p.pdf").exists());
}

#[tokio::test]
async fn test_process_publishes_pdf_to_outbox() {
    let env = Env::new();
    let report = env
        .ok(
            "process_document",
            json!({
                "input_string": "<header>\n  Quarterly report\n</header>\n<body>All figures are final.</body>",
                "filename": "report"
            }),
        )
        .await;
    assert_eq!(report.lines().count(), 5);
    assert!(report.contains("converted to `report.pdf`"));

    let published = env.scratch.with_file_name("scratch-outbox").join("report.pdf");
    let text = pdf_extract::extract_text_from_mem(&std::fs::read(&published).unwrap()).unwrap();
    assert!(text.contains("Quarterly report"));
    assert!(text.contains("All figures are final."));

    let doc = load_document(&env.scratch.join("report")).unwrap();
    let blocks: Vec<&Block> = doc
        .blocks()
        .filter(|b| !matches!(b, Block::Other { .. }))
        .collect();
    assert_eq!(
        blocks[0],
        &Block::Heading {
            level: 1,
            text: "Quarterly report".into()
        }
    );
}

#[tokio::test]
async fn test_document_named_outbox_does_not_break_publishing() {
    let env = Env::new();
    env.ok("create_document", json!({ "filename": "outbox" }))
        .await;
    let report = env
        .ok(
            "process_document",
            json!({
                "input_string": "<header>T</header><body>B</body>",
                "filename": "b.docx"
            }),
        )
        .await;
    assert!(report.ends_with("Published `b.pdf` to the outbox"), "{}", report);
    assert!(env.scratch.join("outbox").is_file());
    assert!(env
        .scratch
        .with_file_name("scratch-outbox")
        .join("b.pdf")
        .is_file());
}

#[tokio::test]
async fn test_uploaded_picture_is_embedded_and_rendered() {
    let env = Env::new();
    env.ok(
        "upload_file",
        json!({ "filename": "chart.png", "content": transfer::encode(&png_bytes(40, 20)) }),
    )
    .await;
    env.ok("create_document", json!({ "filename": "pic.docx" }))
        .await;
    let added = env
        .ok(
            "add_picture",
            json!({ "filename": "pic.docx", "image_path": "chart.png", "width": 4 }),
        )
        .await;
    assert_eq!(added, "Picture added to `pic.docx` successfully.");

    let doc = load_document(&env.scratch.join("pic.docx")).unwrap();
    let picture = doc
        .blocks()
        .find_map(|b| match b {
            Block::Picture {
                width_emu,
                height_emu,
                ..
            } => Some((*width_emu, *height_emu)),
            _ => None,
        })
        .expect("picture block");
    assert_eq!(picture, (4 * 914_400, 2 * 914_400));

    env.ok("convert_to_pdf", json!({ "filename": "pic.docx" }))
        .await;
    let pdf = lopdf::Document::load(env.scratch.join("pic.pdf")).unwrap();
    assert_eq!(pdf.get_pages().len(), 1);
}

#[tokio::test]
async fn test_picture_rejects_non_image_content() {
    let env = Env::new();
    env.ok(
        "upload_file",
        json!({ "filename": "notes.png", "content": transfer::encode(b"plain text") }),
    )
    .await;
    env.ok("create_document", json!({ "filename": "pic.docx" }))
        .await;
    let text = env
        .call(
            "add_picture",
            json!({ "filename": "pic.docx", "image_path": "notes.png" }),
        )
        .await;
    assert!(text.starts_with("Error: malformed input:"), "{}", text);
}

#[tokio::test]
async fn test_table_and_text_export() {
    let env = Env::new();
    env.ok("create_document", json!({ "filename": "t.docx" }))
        .await;
    env.ok("add_heading", json!({ "filename": "t.docx", "text": "Doc", "level": 0 }))
        .await;
    env.ok(
        "add_table",
        json!({ "filename": "t.docx", "rows": 3, "cols": 2 }),
    )
    .await;
    env.ok(
        "add_paragraph",
        json!({ "filename": "t.docx", "text": "line one\nline two" }),
    )
    .await;
    env.ok(
        "convert_document",
        json!({ "filename": "t.docx", "format": "txt" }),
    )
    .await;
    let text = std::fs::read_to_string(env.scratch.join("t.txt")).unwrap();
    assert_eq!(text, "Doc\n\n\t\n\t\n\t\n\nline one\nline two\n");

    let too_wide = env
        .call(
            "add_table",
            json!({ "filename": "t.docx", "rows": 1, "cols": 64 }),
        )
        .await;
    assert!(too_wide.starts_with("Error: malformed input:"));
}

#[tokio::test]
async fn test_invalid_parameters_are_reported() {
    let env = Env::new();
    let missing = env.call("add_heading", json!({ "filename": "a.docx" })).await;
    assert_eq!(
        missing,
        "Error: malformed input: missing required parameter: text"
    );
    let wrong_type = env
        .call("add_table", json!({ "filename": "a.docx", "rows": "2", "cols": 2 }))
        .await;
    assert!(wrong_type.contains("must be of type 'integer'"));
    let bad_format = env
        .call("convert_document", json!({ "filename": "a.docx", "format": "docx" }))
        .await;
    assert!(bad_format.starts_with("Error: malformed input:"));
}

#[tokio::test]
async fn test_delete_document() {
    let env = Env::new();
    env.ok("create_document", json!({ "filename": "gone.docx" }))
        .await;
    let deleted = env
        .ok("delete_document", json!({ "filename": "gone.docx" }))
        .await;
    assert_eq!(deleted, "File `gone.docx` deleted successfully.");
    let again = env
        .call("delete_document", json!({ "filename": "gone.docx" }))
        .await;
    assert!(again.starts_with("Error: not found:"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_are_not_lost() {
    let env = Env::new();
    env.ok("create_document", json!({ "filename": "shared.docx" }))
        .await;

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let tools = env.tools.clone();
            let ctx = env.ctx.clone();
            tokio::spawn(async move {
                tools
                    .call(
                        "add_paragraph",
                        json!({ "filename": "shared.docx", "text": format!("para {}", i) }),
                        &ctx,
                    )
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let doc = load_document(&env.scratch.join("shared.docx")).unwrap();
    let paragraphs = doc
        .blocks()
        .filter(|b| matches!(b, Block::Paragraph { .. }))
        .count();
    assert_eq!(paragraphs, 16);
}

#[tokio::test]
async fn test_rest_api_maps_errors_to_statuses() {
    let env = Env::new();
    let app = word_mcp::server::router(env.tools.clone(), env.ctx.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let list: Value = client
        .get(format!("{}/tools/list", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["tools"].as_array().unwrap().len(), 11);

    let created = client
        .post(format!("{}/tools/create_document", base))
        .json(&json!({ "filename": "r.docx" }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), reqwest::StatusCode::OK);
    let body: Value = created.json().await.unwrap();
    assert_eq!(body["result"], "Document `r.docx` created successfully");

    let missing = client
        .post(format!("{}/tools/download_document", base))
        .json(&json!({ "filename": "nope.pdf" }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let bad = client
        .post(format!("{}/tools/add_heading", base))
        .json(&json!({ "filename": "r.docx", "text": "x", "level": 12 }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);

    let unknown = client
        .post(format!("{}/tools/format_disk", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);
}
