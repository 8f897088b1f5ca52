//! Built-in PDF rendering of the document model.
//!
//! Flow layout on A4 pages with the standard Helvetica fonts: headings and
//! paragraphs are word-wrapped, tables are drawn as ruled grids with the first
//! line of each cell, pictures are embedded as RGB image XObjects scaled to
//! their DOCX extent. A picture that cannot be drawn becomes a placeholder
//! line. This is not a layout engine; it produces a faithful,
//! text-extractable PDF of the block sequence.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Object, ObjectId, Stream, StringFormat};

use crate::docx::{Block, Document};
use crate::error::{DocError, DocResult};

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 72.0;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
const CONTENT_HEIGHT: f32 = PAGE_HEIGHT - 2.0 * MARGIN;
const BODY_SIZE: f32 = 11.0;
const LINE_FACTOR: f32 = 1.35;
const EMU_PER_POINT: f32 = 12_700.0;

const FONT_REGULAR: &str = "F1";
/// Drawn in place of a picture whose image is missing, linked or undecodable.
pub const PICTURE_PLACEHOLDER: &str = "[picture]";
const FONT_BOLD: &str = "F2";

#[derive(Default)]
struct Page {
    ops: Vec<Operation>,
    images: Vec<(String, ObjectId)>,
}

struct Layout {
    pdf: lopdf::Document,
    pages: Vec<Page>,
    y: f32,
    image_count: usize,
}

/// Renders `doc` to PDF bytes.
pub fn render_pdf(doc: &Document) -> DocResult<Vec<u8>> {
    let mut layout = Layout::new();
    for block in doc.blocks() {
        match block {
            Block::Heading { level, text } => {
                let size = heading_size(*level);
                layout.text_block(text, FONT_BOLD, size, size * 0.8, size * 0.4);
            }
            Block::Paragraph { text } => {
                layout.text_block(text, FONT_REGULAR, BODY_SIZE, 0.0, BODY_SIZE * 0.7);
            }
            Block::Table { cells } => layout.table(cells),
            Block::Picture {
                rel_id,
                width_emu,
                height_emu,
                caption,
            } => {
                let drawn = match doc.image_bytes(rel_id) {
                    Some(bytes) => layout.picture(bytes, *width_emu, *height_emu),
                    None => Err(DocError::External(format!(
                        "picture {} has no embedded image part",
                        rel_id
                    ))),
                };
                if let Err(err) = drawn {
                    tracing::warn!(rel_id = %rel_id, error = %err, "picture drawn as placeholder");
                    layout.text_block(
                        PICTURE_PLACEHOLDER,
                        FONT_REGULAR,
                        BODY_SIZE,
                        0.0,
                        BODY_SIZE * 0.7,
                    );
                }
                if !caption.trim().is_empty() {
                    layout.text_block(caption, FONT_REGULAR, BODY_SIZE, 0.0, BODY_SIZE * 0.7);
                }
            }
            Block::Other { .. } => {}
        }
    }
    layout.finish()
}

fn heading_size(level: u8) -> f32 {
    match level {
        0 => 24.0,
        1 => 18.0,
        2 => 15.0,
        3 => 13.0,
        _ => 12.0,
    }
}

impl Layout {
    fn new() -> Self {
        Self {
            pdf: lopdf::Document::with_version("1.5"),
            pages: vec![Page::default()],
            y: PAGE_HEIGHT - MARGIN,
            image_count: 0,
        }
    }

    fn page(&mut self) -> &mut Page {
        if self.pages.is_empty() {
            self.pages.push(Page::default());
        }
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    fn new_page(&mut self) {
        self.pages.push(Page::default());
        self.y = PAGE_HEIGHT - MARGIN;
    }

    /// Starts a new page unless `height` fits below the cursor. A fresh page
    /// always accepts the element, even when it is taller than the page.
    fn reserve(&mut self, height: f32) {
        let at_top = self.y >= PAGE_HEIGHT - MARGIN;
        if !at_top && self.y - height < MARGIN {
            self.new_page();
        }
    }

    fn text_block(&mut self, text: &str, font: &str, size: f32, before: f32, after: f32) {
        self.y -= before;
        let line_height = size * LINE_FACTOR;
        for line in wrap(text, size, CONTENT_WIDTH) {
            self.reserve(line_height);
            let baseline = self.y - size;
            if !line.is_empty() {
                self.page().ops.extend(text_ops(&line, font, size, MARGIN, baseline));
            }
            self.y -= line_height;
        }
        self.y -= after;
    }

    fn table(&mut self, cells: &[Vec<String>]) {
        let cols = cells.iter().map(|r| r.len()).max().unwrap_or(0);
        if cols == 0 {
            return;
        }
        let col_width = CONTENT_WIDTH / cols as f32;
        let row_height = BODY_SIZE * 2.0;
        for row in cells {
            self.reserve(row_height);
            let top = self.y;
            let mut ops = vec![Operation::new("w", vec![0.5f32.into()])];
            for col in 0..cols {
                let x = MARGIN + col as f32 * col_width;
                ops.push(Operation::new(
                    "re",
                    vec![
                        x.into(),
                        (top - row_height).into(),
                        col_width.into(),
                        row_height.into(),
                    ],
                ));
                ops.push(Operation::new("S", vec![]));
                if let Some(text) = row.get(col) {
                    let first_line = text.lines().next().unwrap_or("");
                    let fitted = truncate_to_width(first_line, BODY_SIZE, col_width - 6.0);
                    if !fitted.is_empty() {
                        ops.extend(text_ops(
                            &fitted,
                            FONT_REGULAR,
                            BODY_SIZE,
                            x + 3.0,
                            top - row_height + 6.0,
                        ));
                    }
                }
            }
            self.page().ops.extend(ops);
            self.y -= row_height;
        }
        self.y -= BODY_SIZE * 0.7;
    }

    fn picture(&mut self, bytes: &[u8], width_emu: u64, height_emu: u64) -> DocResult<()> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| DocError::External(format!("cannot decode picture: {}", e)))?
            .to_rgb8();
        let (px_width, px_height) = decoded.dimensions();

        let mut width = width_emu as f32 / EMU_PER_POINT;
        let mut height = height_emu as f32 / EMU_PER_POINT;
        if width <= 0.0 || height <= 0.0 {
            width = px_width as f32 * 0.75;
            height = px_height as f32 * 0.75;
        }
        let scale = (CONTENT_WIDTH / width).min(CONTENT_HEIGHT / height).min(1.0);
        width *= scale;
        height *= scale;

        let image_id = self.pdf.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => px_width as i64,
                "Height" => px_height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8i64,
            },
            decoded.into_raw(),
        ));
        self.image_count += 1;
        let name = format!("Im{}", self.image_count);

        self.reserve(height);
        let bottom = self.y - height;
        let page = self.page();
        page.ops.push(Operation::new("q", vec![]));
        page.ops.push(Operation::new(
            "cm",
            vec![
                width.into(),
                0i64.into(),
                0i64.into(),
                height.into(),
                MARGIN.into(),
                bottom.into(),
            ],
        ));
        page.ops.push(Operation::new(
            "Do",
            vec![Object::Name(name.clone().into_bytes())],
        ));
        page.ops.push(Operation::new("Q", vec![]));
        page.images.push((name, image_id));
        self.y = bottom - BODY_SIZE * 0.7;
        Ok(())
    }

    fn finish(mut self) -> DocResult<Vec<u8>> {
        let pdf = &mut self.pdf;
        let regular = pdf.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold = pdf.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        let pages_id = pdf.new_object_id();

        let mut kids: Vec<Object> = Vec::new();
        for page in std::mem::take(&mut self.pages) {
            let content = Content {
                operations: page.ops,
            }
            .encode()
            .map_err(|e| DocError::External(format!("encoding page content: {}", e)))?;
            let content_id = pdf.add_object(Stream::new(dictionary! {}, content));

            let mut xobjects = Dictionary::new();
            for (name, id) in page.images {
                xobjects.set(name, id);
            }
            let page_id = pdf.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0i64.into(), 0i64.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "Font" => dictionary! {
                        FONT_REGULAR => regular,
                        FONT_BOLD => bold,
                    },
                    "XObject" => xobjects,
                },
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        pdf.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = pdf.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        pdf.trailer.set("Root", catalog_id);
        pdf.compress();

        let mut out = Vec::new();
        pdf.save_to(&mut out)
            .map_err(|e| DocError::External(format!("writing PDF: {}", e)))?;
        Ok(out)
    }
}

fn text_ops(text: &str, font: &str, size: f32, x: f32, y: f32) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![font.into(), size.into()]),
        Operation::new("Td", vec![x.into(), y.into()]),
        Operation::new(
            "Tj",
            vec![Object::String(win_ansi(text), StringFormat::Literal)],
        ),
        Operation::new("ET", vec![]),
    ]
}

/// Encodes text for the WinAnsi standard fonts; unmappable characters become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u32 as u8,
            _ => win_ansi_extra(c).unwrap_or(b'?'),
        })
        .collect()
}

/// Characters WinAnsiEncoding places in 0x80..=0x9F.
fn win_ansi_extra(c: char) -> Option<u8> {
    let byte = match c {
        '\u{20AC}' => 0x80, // €
        '\u{201A}' => 0x82,
        '\u{0192}' => 0x83,
        '\u{201E}' => 0x84,
        '\u{2026}' => 0x85, // …
        '\u{2020}' => 0x86,
        '\u{2021}' => 0x87,
        '\u{02C6}' => 0x88,
        '\u{2030}' => 0x89,
        '\u{0160}' => 0x8A,
        '\u{2039}' => 0x8B,
        '\u{0152}' => 0x8C,
        '\u{017D}' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201C}' => 0x93,
        '\u{201D}' => 0x94,
        '\u{2022}' => 0x95, // •
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{02DC}' => 0x98,
        '\u{2122}' => 0x99, // ™
        '\u{0161}' => 0x9A,
        '\u{203A}' => 0x9B,
        '\u{0153}' => 0x9C,
        '\u{017E}' => 0x9E,
        '\u{0178}' => 0x9F,
        _ => return None,
    };
    Some(byte)
}

/// Approximate Helvetica advance width, in thousandths of the font size.
fn glyph_width(c: char) -> f32 {
    let units = match c {
        ' ' | '.' | ',' | ':' | ';' | '!' | '\'' | '|' | 'f' | 't' | 'I' => 278,
        'i' | 'j' | 'l' => 222,
        'r' | '(' | ')' | '-' => 333,
        'm' | 'M' => 833,
        'w' => 722,
        'W' => 944,
        'A'..='Z' => 667,
        _ => 556,
    };
    units as f32 / 1000.0
}

fn text_width(text: &str, size: f32) -> f32 {
    text.chars().map(glyph_width).sum::<f32>() * size
}

fn truncate_to_width(text: &str, size: f32, max: f32) -> String {
    let mut out = String::new();
    let mut width = 0.0;
    for c in text.chars() {
        width += glyph_width(c) * size;
        if width > max {
            break;
        }
        out.push(c);
    }
    out
}

/// Greedy word wrap; explicit newlines start new lines and words wider than
/// the line are split by character.
fn wrap(text: &str, size: f32, max: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for source_line in text.replace('\t', "    ").split('\n') {
        let mut line = String::new();
        for word in source_line.split(' ') {
            let candidate = if line.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", line, word)
            };
            if text_width(&candidate, size) <= max {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            let mut rest = word;
            while text_width(rest, size) > max {
                let piece = truncate_to_width(rest, size, max);
                if piece.is_empty() {
                    break;
                }
                lines.push(piece.clone());
                rest = &rest[piece.len()..];
            }
            line = rest.to_string();
        }
        lines.push(line);
    }
    lines
}
