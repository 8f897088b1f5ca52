//! WordprocessingML (DOCX) package model.
//!
//! A [`Document`] is an ordered list of body blocks plus the rest of the OOXML
//! package. Loading keeps the original XML of every body element and every
//! package part, so a document produced elsewhere is written back unchanged
//! apart from the blocks appended through this module.
//!
//! Parts are read with a size bound, and `word/document.xml` is walked as a
//! quick-xml event stream, one top-level body element at a time.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// English Metric Units per inch (DrawingML length unit).
pub const EMU_PER_INCH: u64 = 914_400;
/// Highest supported heading level; level 0 is the `Title` style.
pub const MAX_HEADING_LEVEL: u8 = 9;
/// Word refuses tables wider than 63 columns.
pub const MAX_TABLE_COLS: u32 = 63;
pub const MAX_TABLE_ROWS: u32 = 1000;

const DOCUMENT_PART: &str = "word/document.xml";
const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const PACKAGE_RELS_PART: &str = "_rels/.rels";
const STYLES_PART: &str = "word/styles.xml";

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_PART_BYTES: u64 = 50 * 1024 * 1024;
/// Text width of an A4 page with 1" margins, in twentieths of a point.
const CONTENT_WIDTH_TWIPS: u32 = 9026;

const NS_W: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_WP: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const NS_PIC: &str = "http://schemas.openxmlformats.org/drawingml/2006/picture";
const NS_PACKAGE_RELS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const NS_CONTENT_TYPES: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

const REL_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const REL_STYLES: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";
const REL_IMAGE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";

const CT_RELS: &str = "application/vnd.openxmlformats-package.relationships+xml";
const CT_DOCUMENT: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml";
const CT_STYLES: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml";

const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n";

const BLANK_SECTION: &str = "<w:sectPr><w:pgSz w:w=\"11906\" w:h=\"16838\"/>\
<w:pgMar w:top=\"1440\" w:right=\"1440\" w:bottom=\"1440\" w:left=\"1440\" \
w:header=\"708\" w:footer=\"708\" w:gutter=\"0\"/></w:sectPr>";

#[derive(Debug, thiserror::Error)]
pub enum DocxError {
    #[error("not a valid DOCX package: {0}")]
    Zip(String),
    #[error("invalid document XML: {0}")]
    Xml(String),
    #[error("package is missing {0}")]
    MissingPart(&'static str),
    #[error("text contains characters that are not allowed in XML: {0:?}")]
    InvalidText(String),
    #[error("unsupported image: {0}")]
    UnsupportedImage(String),
}

/// One structural unit of a document body.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// Level 0 is the document title, 1..=9 map to `Heading1`..`Heading9`.
    Heading { level: u8, text: String },
    Paragraph { text: String },
    /// Cell text, row by row.
    Table { cells: Vec<Vec<String>> },
    /// A paragraph holding a drawing. `caption` is the text of the
    /// paragraph's other runs, empty for pictures added by the store.
    Picture {
        rel_id: String,
        width_emu: u64,
        height_emu: u64,
        caption: String,
    },
    /// Any other body element (section properties, content controls, ...).
    Other { tag: String },
}

#[derive(Debug, Clone)]
struct BodyElement {
    block: Block,
    xml: String,
}

#[derive(Debug, Clone, PartialEq)]
struct Relationship {
    id: String,
    rel_type: String,
    target: String,
    target_mode: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct ContentTypes {
    defaults: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
}

/// An in-memory DOCX package.
#[derive(Debug, Clone)]
pub struct Document {
    /// Package parts other than the ones modelled below, written back verbatim.
    parts: BTreeMap<String, Vec<u8>>,
    /// `word/document.xml` up to and including the `<w:body>` start tag.
    head: String,
    /// `word/document.xml` from the `</w:body>` end tag.
    tail: String,
    body: Vec<BodyElement>,
    rels: Vec<Relationship>,
    content_types: ContentTypes,
    max_drawing_id: u32,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document with default page setup and heading styles.
    pub fn new() -> Self {
        let mut parts = BTreeMap::new();
        parts.insert(PACKAGE_RELS_PART.to_string(), package_rels_xml());
        parts.insert(STYLES_PART.to_string(), styles_xml().into_bytes());

        Self {
            parts,
            head: format!(
                "{}<w:document xmlns:w=\"{}\" xmlns:r=\"{}\"><w:body>",
                XML_DECL, NS_W, NS_R
            ),
            tail: "</w:body></w:document>".to_string(),
            body: vec![BodyElement {
                block: Block::Other {
                    tag: "sectPr".to_string(),
                },
                xml: BLANK_SECTION.to_string(),
            }],
            rels: vec![Relationship {
                id: "rId1".to_string(),
                rel_type: REL_STYLES.to_string(),
                target: "styles.xml".to_string(),
                target_mode: None,
            }],
            content_types: ContentTypes {
                defaults: vec![
                    ("rels".to_string(), CT_RELS.to_string()),
                    ("xml".to_string(), "application/xml".to_string()),
                ],
                overrides: vec![
                    (format!("/{}", DOCUMENT_PART), CT_DOCUMENT.to_string()),
                    (format!("/{}", STYLES_PART), CT_STYLES.to_string()),
                ],
            },
            max_drawing_id: 0,
        }
    }

    /// Parses a DOCX package.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocxError> {
        let mut archive =
            zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| DocxError::Zip(e.to_string()))?;
        let mut parts = BTreeMap::new();
        for i in 0..archive.len() {
            let entry = archive
                .by_index(i)
                .map_err(|e| DocxError::Zip(e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut out = Vec::new();
            entry
                .take(MAX_PART_BYTES)
                .read_to_end(&mut out)
                .map_err(|e| DocxError::Zip(e.to_string()))?;
            if out.len() as u64 >= MAX_PART_BYTES {
                return Err(DocxError::Zip(format!(
                    "ZIP entry {} exceeds size limit ({} bytes)",
                    name, MAX_PART_BYTES
                )));
            }
            parts.insert(name, out);
        }

        let document_xml = parts
            .remove(DOCUMENT_PART)
            .ok_or(DocxError::MissingPart(DOCUMENT_PART))?;
        let document_xml =
            String::from_utf8(document_xml).map_err(|e| DocxError::Xml(e.to_string()))?;
        let parsed = parse_document_xml(&document_xml)?;

        let rels = match parts.remove(DOCUMENT_RELS_PART) {
            Some(xml) => parse_relationships(&xml)?,
            None => Vec::new(),
        };
        let content_types = match parts.remove(CONTENT_TYPES_PART) {
            Some(xml) => parse_content_types(&xml)?,
            None => ContentTypes {
                defaults: vec![
                    ("rels".to_string(), CT_RELS.to_string()),
                    ("xml".to_string(), "application/xml".to_string()),
                ],
                overrides: vec![(format!("/{}", DOCUMENT_PART), CT_DOCUMENT.to_string())],
            },
        };
        parts
            .entry(PACKAGE_RELS_PART.to_string())
            .or_insert_with(package_rels_xml);

        Ok(Self {
            parts,
            head: parsed.head,
            tail: parsed.tail,
            body: parsed.body,
            rels,
            content_types,
            max_drawing_id: parsed.max_drawing_id,
        })
    }

    /// Serializes the package to DOCX bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DocxError> {
        let mut document_xml = self.head.clone();
        for element in &self.body {
            document_xml.push_str(&element.xml);
        }
        document_xml.push_str(&self.tail);

        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let mut write_part = |name: &str, data: &[u8]| -> Result<(), DocxError> {
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            zip.start_file(name, options)
                .map_err(|e| DocxError::Zip(e.to_string()))?;
            zip.write_all(data)
                .map_err(|e| DocxError::Zip(e.to_string()))
        };

        write_part(
            CONTENT_TYPES_PART,
            content_types_xml(&self.content_types).as_bytes(),
        )?;
        write_part(DOCUMENT_PART, document_xml.as_bytes())?;
        write_part(DOCUMENT_RELS_PART, relationships_xml(&self.rels).as_bytes())?;
        for (name, data) in &self.parts {
            write_part(name, data)?;
        }

        let cursor = zip.finish().map_err(|e| DocxError::Zip(e.to_string()))?;
        Ok(cursor.into_inner())
    }

    /// Body blocks in document order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.body.iter().map(|e| &e.block)
    }

    pub fn add_heading(&mut self, text: &str, level: u8) -> Result<(), DocxError> {
        check_text(text)?;
        let style = heading_style(level);
        let xml = format!(
            "<w:p><w:pPr><w:pStyle w:val=\"{}\"/></w:pPr>{}</w:p>",
            style,
            runs_xml(text)
        );
        self.append(
            Block::Heading {
                level,
                text: text.replace('\r', ""),
            },
            xml,
        );
        Ok(())
    }

    pub fn add_paragraph(&mut self, text: &str) -> Result<(), DocxError> {
        check_text(text)?;
        let xml = format!("<w:p>{}</w:p>", runs_xml(text));
        self.append(
            Block::Paragraph {
                text: text.replace('\r', ""),
            },
            xml,
        );
        Ok(())
    }

    /// Appends an empty `rows` x `cols` grid table. Bounds are checked by the caller.
    pub fn add_table(&mut self, rows: u32, cols: u32) {
        let col_width = CONTENT_WIDTH_TWIPS / cols.max(1);
        let mut xml = String::from(
            "<w:tbl><w:tblPr><w:tblStyle w:val=\"TableGrid\"/><w:tblW w:w=\"0\" w:type=\"auto\"/>\
             <w:tblLook w:val=\"04A0\"/></w:tblPr><w:tblGrid>",
        );
        for _ in 0..cols {
            xml.push_str(&format!("<w:gridCol w:w=\"{}\"/>", col_width));
        }
        xml.push_str("</w:tblGrid>");
        for _ in 0..rows {
            xml.push_str("<w:tr>");
            for _ in 0..cols {
                xml.push_str(&format!(
                    "<w:tc><w:tcPr><w:tcW w:w=\"{}\" w:type=\"dxa\"/></w:tcPr><w:p/></w:tc>",
                    col_width
                ));
            }
            xml.push_str("</w:tr>");
        }
        xml.push_str("</w:tbl>");

        let cells = vec![vec![String::new(); cols as usize]; rows as usize];
        self.append(Block::Table { cells }, xml);
    }

    /// Embeds a PNG or JPEG image scaled to `width_emu`, keeping its aspect ratio.
    pub fn add_picture(&mut self, image: &[u8], width_emu: u64) -> Result<(), DocxError> {
        let format =
            image::guess_format(image).map_err(|e| DocxError::UnsupportedImage(e.to_string()))?;
        let (extension, content_type) = match format {
            image::ImageFormat::Png => ("png", "image/png"),
            image::ImageFormat::Jpeg => ("jpeg", "image/jpeg"),
            other => {
                return Err(DocxError::UnsupportedImage(format!(
                    "{:?} images are not supported, use PNG or JPEG",
                    other
                )))
            }
        };
        let (px_width, px_height) = image::ImageReader::with_format(Cursor::new(image), format)
            .into_dimensions()
            .map_err(|e| DocxError::UnsupportedImage(e.to_string()))?;
        if px_width == 0 || px_height == 0 {
            return Err(DocxError::UnsupportedImage("image has no pixels".to_string()));
        }
        let height_emu =
            ((width_emu as u128 * px_height as u128) / px_width as u128).max(1) as u64;

        let media_name = self.next_media_name(extension);
        let rel_id = self.next_rel_id();
        self.rels.push(Relationship {
            id: rel_id.clone(),
            rel_type: REL_IMAGE.to_string(),
            target: media_name.trim_start_matches("word/").to_string(),
            target_mode: None,
        });
        self.parts.insert(media_name.clone(), image.to_vec());
        self.ensure_default_content_type(extension, content_type);

        self.max_drawing_id += 1;
        let drawing_id = self.max_drawing_id;
        let file_name = media_name.rsplit('/').next().unwrap_or(&media_name);
        let xml = format!(
            "<w:p><w:r><w:drawing>\
             <wp:inline xmlns:wp=\"{wp}\" distT=\"0\" distB=\"0\" distL=\"0\" distR=\"0\">\
             <wp:extent cx=\"{cx}\" cy=\"{cy}\"/>\
             <wp:docPr id=\"{id}\" name=\"Picture {id}\"/>\
             <a:graphic xmlns:a=\"{a}\"><a:graphicData uri=\"{pic}\">\
             <pic:pic xmlns:pic=\"{pic}\">\
             <pic:nvPicPr><pic:cNvPr id=\"{id}\" name=\"{name}\"/><pic:cNvPicPr/></pic:nvPicPr>\
             <pic:blipFill><a:blip xmlns:r=\"{r}\" r:embed=\"{rel}\"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill>\
             <pic:spPr><a:xfrm><a:off x=\"0\" y=\"0\"/><a:ext cx=\"{cx}\" cy=\"{cy}\"/></a:xfrm>\
             <a:prstGeom prst=\"rect\"><a:avLst/></a:prstGeom></pic:spPr>\
             </pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing></w:r></w:p>",
            wp = NS_WP,
            a = NS_A,
            pic = NS_PIC,
            r = NS_R,
            cx = width_emu,
            cy = height_emu,
            id = drawing_id,
            name = escape(file_name),
            rel = rel_id,
        );
        self.append(
            Block::Picture {
                rel_id,
                width_emu,
                height_emu,
                caption: String::new(),
            },
            xml,
        );
        Ok(())
    }

    /// Bytes of the package part an image relationship points at.
    pub fn image_bytes(&self, rel_id: &str) -> Option<&[u8]> {
        let rel = self
            .rels
            .iter()
            .find(|r| r.id == rel_id && r.target_mode.as_deref() != Some("External"))?;
        let part = match rel.target.strip_prefix('/') {
            Some(absolute) => absolute.to_string(),
            None => format!("word/{}", rel.target),
        };
        self.parts.get(&part).map(|v| v.as_slice())
    }

    /// Inserts before a trailing `w:sectPr`, which must stay the last body child.
    fn append(&mut self, block: Block, xml: String) {
        let at = match self.body.last() {
            Some(BodyElement {
                block: Block::Other { tag },
                ..
            }) if tag == "sectPr" => self.body.len() - 1,
            _ => self.body.len(),
        };
        self.body.insert(at, BodyElement { block, xml });
    }

    fn next_rel_id(&self) -> String {
        let max = self
            .rels
            .iter()
            .filter_map(|r| r.id.strip_prefix("rId")?.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        format!("rId{}", max + 1)
    }

    fn next_media_name(&self, extension: &str) -> String {
        (1..)
            .map(|n| format!("word/media/image{}.{}", n, extension))
            .find(|name| !self.parts.contains_key(name))
            .unwrap_or_else(|| format!("word/media/image.{}", extension))
    }

    fn ensure_default_content_type(&mut self, extension: &str, content_type: &str) {
        let present = self
            .content_types
            .defaults
            .iter()
            .any(|(ext, _)| ext.eq_ignore_ascii_case(extension));
        if !present {
            self.content_types
                .defaults
                .push((extension.to_string(), content_type.to_string()));
        }
    }
}

/// Style id for a heading level.
pub fn heading_style(level: u8) -> String {
    if level == 0 {
        "Title".to_string()
    } else {
        format!("Heading{}", level)
    }
}

fn heading_level(style: &str) -> Option<u8> {
    if style.eq_ignore_ascii_case("title") {
        return Some(0);
    }
    let compact: String = style.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = compact
        .get(..7)
        .filter(|p| p.eq_ignore_ascii_case("heading"))
        .map(|_| &compact[7..])?;
    match digits.parse::<u8>() {
        Ok(level) if (1..=MAX_HEADING_LEVEL).contains(&level) => Some(level),
        _ => None,
    }
}

/// Rejects characters XML 1.0 cannot carry.
fn check_text(text: &str) -> Result<(), DocxError> {
    let bad = text.chars().any(|c| {
        (c < ' ' && !matches!(c, '\t' | '\n' | '\r')) || c == '\u{FFFE}' || c == '\u{FFFF}'
    });
    if bad {
        let preview: String = text.chars().take(40).collect();
        return Err(DocxError::InvalidText(preview));
    }
    Ok(())
}

/// One run; newlines become breaks and tabs become tab stops.
fn runs_xml(text: &str) -> String {
    fn flush(out: &mut String, buf: &mut String) {
        if !buf.is_empty() {
            out.push_str("<w:t xml:space=\"preserve\">");
            out.push_str(&escape(buf.as_str()));
            out.push_str("</w:t>");
            buf.clear();
        }
    }

    let mut out = String::from("<w:r>");
    let mut buf = String::new();
    for ch in text.chars() {
        match ch {
            '\n' => {
                flush(&mut out, &mut buf);
                out.push_str("<w:br/>");
            }
            '\t' => {
                flush(&mut out, &mut buf);
                out.push_str("<w:tab/>");
            }
            '\r' => {}
            c => buf.push(c),
        }
    }
    flush(&mut out, &mut buf);
    out.push_str("</w:r>");
    out
}

// ============ document.xml parsing ============

struct ParsedDocument {
    head: String,
    tail: String,
    body: Vec<BodyElement>,
    max_drawing_id: u32,
}

fn xml_err(e: impl std::fmt::Display) -> DocxError {
    DocxError::Xml(e.to_string())
}

fn parse_document_xml(xml: &str) -> Result<ParsedDocument, DocxError> {
    let mut reader = Reader::from_str(xml);
    let mut head: Option<String> = None;
    let mut tail: Option<String> = None;
    let mut body = Vec::new();
    let mut max_drawing_id = 0u32;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(xml_err)?;
        match event {
            Event::Start(e) if head.is_none() => {
                if e.local_name().as_ref() == b"body" {
                    head = Some(xml[..reader.buffer_position() as usize].to_string());
                }
            }
            Event::Empty(e) if head.is_none() => {
                if e.local_name().as_ref() == b"body" {
                    head = Some(format!("{}<w:body>", &xml[..start]));
                    tail = Some(format!(
                        "</w:body>{}",
                        &xml[reader.buffer_position() as usize..]
                    ));
                    break;
                }
            }
            Event::Start(e) => {
                let mut collector = BlockCollector::new(&e);
                let mut depth = 1usize;
                while depth > 0 {
                    match reader.read_event().map_err(xml_err)? {
                        Event::Start(inner) => {
                            depth += 1;
                            collector.open(&inner);
                        }
                        Event::Empty(inner) => {
                            collector.open(&inner);
                            collector.close(inner.local_name().as_ref());
                        }
                        Event::End(inner) => {
                            depth -= 1;
                            collector.close(inner.local_name().as_ref());
                        }
                        Event::Text(t) => {
                            let text = t.unescape().map_err(xml_err)?;
                            collector.text(&text);
                        }
                        Event::CData(c) => {
                            collector.text(&String::from_utf8_lossy(&c));
                        }
                        Event::Eof => {
                            return Err(DocxError::Xml("unexpected end of document".into()))
                        }
                        _ => {}
                    }
                }
                let end = reader.buffer_position() as usize;
                max_drawing_id = max_drawing_id.max(collector.max_drawing_id);
                body.push(BodyElement {
                    block: collector.finish(),
                    xml: xml[start..end].to_string(),
                });
            }
            Event::Empty(e) => {
                let mut collector = BlockCollector::new(&e);
                collector.close(e.local_name().as_ref());
                body.push(BodyElement {
                    block: collector.finish(),
                    xml: xml[start..reader.buffer_position() as usize].to_string(),
                });
            }
            Event::End(e) if e.local_name().as_ref() == b"body" => {
                tail = Some(xml[start..].to_string());
                break;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match (head, tail) {
        (Some(head), Some(tail)) => Ok(ParsedDocument {
            head,
            tail,
            body,
            max_drawing_id,
        }),
        _ => Err(DocxError::Xml("document has no w:body element".into())),
    }
}

/// Accumulates what is needed to classify one top-level body element.
struct BlockCollector {
    tag: String,
    style: Option<String>,
    text: String,
    in_text: bool,
    run_depth: usize,
    table_depth: usize,
    rows: Vec<Vec<String>>,
    blip: Option<String>,
    extent: Option<(u64, u64)>,
    max_drawing_id: u32,
}

impl BlockCollector {
    fn new(root: &BytesStart) -> Self {
        let mut collector = Self {
            tag: String::from_utf8_lossy(root.local_name().as_ref()).into_owned(),
            style: None,
            text: String::new(),
            in_text: false,
            run_depth: 0,
            table_depth: 0,
            rows: Vec::new(),
            blip: None,
            extent: None,
            max_drawing_id: 0,
        };
        collector.open(root);
        collector
    }

    fn open(&mut self, e: &BytesStart) {
        match e.local_name().as_ref() {
            b"pStyle" => self.style = attr(e, b"val"),
            b"r" => self.run_depth += 1,
            b"t" => self.in_text = true,
            b"tab" if self.run_depth > 0 => self.push_text("\t"),
            b"br" | b"cr" if self.run_depth > 0 => self.push_text("\n"),
            b"tbl" => self.table_depth += 1,
            b"tr" if self.table_depth == 1 => self.rows.push(Vec::new()),
            b"tc" if self.table_depth == 1 => {
                if let Some(row) = self.rows.last_mut() {
                    row.push(String::new());
                }
            }
            b"blip" => {
                if self.blip.is_none() {
                    self.blip = attr(e, b"embed");
                }
            }
            b"extent" => {
                let cx = attr(e, b"cx").and_then(|v| v.parse().ok());
                let cy = attr(e, b"cy").and_then(|v| v.parse().ok());
                if let (Some(cx), Some(cy)) = (cx, cy) {
                    self.extent = Some((cx, cy));
                }
            }
            b"docPr" => {
                if let Some(id) = attr(e, b"id").and_then(|v| v.parse::<u32>().ok()) {
                    self.max_drawing_id = self.max_drawing_id.max(id);
                }
            }
            _ => {}
        }
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"r" => self.run_depth = self.run_depth.saturating_sub(1),
            b"t" => self.in_text = false,
            b"tbl" => self.table_depth = self.table_depth.saturating_sub(1),
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if self.in_text {
            self.push_text(text);
        }
    }

    fn push_text(&mut self, text: &str) {
        if self.tag == "tbl" {
            if let Some(cell) = self.rows.last_mut().and_then(|r| r.last_mut()) {
                cell.push_str(text);
            }
        } else {
            self.text.push_str(text);
        }
    }

    fn finish(self) -> Block {
        match self.tag.as_str() {
            "p" => {
                if let Some(rel_id) = self.blip {
                    let (width_emu, height_emu) = self.extent.unwrap_or((0, 0));
                    Block::Picture {
                        rel_id,
                        width_emu,
                        height_emu,
                        caption: self.text,
                    }
                } else if let Some(level) = self.style.as_deref().and_then(heading_level) {
                    Block::Heading {
                        level,
                        text: self.text,
                    }
                } else {
                    Block::Paragraph { text: self.text }
                }
            }
            "tbl" => Block::Table { cells: self.rows },
            _ => Block::Other { tag: self.tag },
        }
    }
}

fn attr(e: &BytesStart, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

// ============ package parts ============

fn parse_relationships(xml: &[u8]) -> Result<Vec<Relationship>, DocxError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rels = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(rel_type), Some(target)) =
                    (attr(&e, b"Id"), attr(&e, b"Type"), attr(&e, b"Target"))
                {
                    rels.push(Relationship {
                        id,
                        rel_type,
                        target,
                        target_mode: attr(&e, b"TargetMode"),
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

fn parse_content_types(xml: &[u8]) -> Result<ContentTypes, DocxError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut types = ContentTypes::default();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"Default" => {
                    if let (Some(ext), Some(ct)) = (attr(&e, b"Extension"), attr(&e, b"ContentType"))
                    {
                        types.defaults.push((ext, ct));
                    }
                }
                b"Override" => {
                    if let (Some(part), Some(ct)) = (attr(&e, b"PartName"), attr(&e, b"ContentType"))
                    {
                        types.overrides.push((part, ct));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(types)
}

fn relationships_xml(rels: &[Relationship]) -> String {
    let mut xml = format!("{}<Relationships xmlns=\"{}\">", XML_DECL, NS_PACKAGE_RELS);
    for rel in rels {
        xml.push_str(&format!(
            "<Relationship Id=\"{}\" Type=\"{}\" Target=\"{}\"",
            escape(rel.id.as_str()),
            escape(rel.rel_type.as_str()),
            escape(rel.target.as_str())
        ));
        if let Some(mode) = &rel.target_mode {
            xml.push_str(&format!(" TargetMode=\"{}\"", escape(mode.as_str())));
        }
        xml.push_str("/>");
    }
    xml.push_str("</Relationships>");
    xml
}

fn package_rels_xml() -> Vec<u8> {
    relationships_xml(&[Relationship {
        id: "rId1".to_string(),
        rel_type: REL_OFFICE_DOCUMENT.to_string(),
        target: DOCUMENT_PART.to_string(),
        target_mode: None,
    }])
    .into_bytes()
}

fn content_types_xml(types: &ContentTypes) -> String {
    let mut xml = format!("{}<Types xmlns=\"{}\">", XML_DECL, NS_CONTENT_TYPES);
    for (ext, ct) in &types.defaults {
        xml.push_str(&format!(
            "<Default Extension=\"{}\" ContentType=\"{}\"/>",
            escape(ext.as_str()),
            escape(ct.as_str())
        ));
    }
    for (part, ct) in &types.overrides {
        xml.push_str(&format!(
            "<Override PartName=\"{}\" ContentType=\"{}\"/>",
            escape(part.as_str()),
            escape(ct.as_str())
        ));
    }
    xml.push_str("</Types>");
    xml
}

fn styles_xml() -> String {
    let mut xml = format!(
        "{}<w:styles xmlns:w=\"{}\">\
         <w:docDefaults><w:rPrDefault><w:rPr><w:rFonts w:ascii=\"Calibri\" w:hAnsi=\"Calibri\"/>\
         <w:sz w:val=\"22\"/></w:rPr></w:rPrDefault>\
         <w:pPrDefault><w:pPr><w:spacing w:after=\"160\" w:line=\"259\" w:lineRule=\"auto\"/></w:pPr></w:pPrDefault>\
         </w:docDefaults>\
         <w:style w:type=\"paragraph\" w:default=\"1\" w:styleId=\"Normal\"><w:name w:val=\"Normal\"/><w:qFormat/></w:style>\
         <w:style w:type=\"paragraph\" w:styleId=\"Title\"><w:name w:val=\"Title\"/><w:basedOn w:val=\"Normal\"/>\
         <w:next w:val=\"Normal\"/><w:qFormat/><w:pPr><w:spacing w:after=\"80\"/></w:pPr>\
         <w:rPr><w:sz w:val=\"56\"/></w:rPr></w:style>",
        XML_DECL, NS_W
    );
    for level in 1..=MAX_HEADING_LEVEL {
        let half_points = match level {
            1 => 32,
            2 => 26,
            3 => 24,
            _ => 22,
        };
        xml.push_str(&format!(
            "<w:style w:type=\"paragraph\" w:styleId=\"Heading{l}\"><w:name w:val=\"heading {l}\"/>\
             <w:basedOn w:val=\"Normal\"/><w:next w:val=\"Normal\"/><w:qFormat/>\
             <w:pPr><w:keepNext/><w:spacing w:before=\"240\" w:after=\"80\"/><w:outlineLvl w:val=\"{o}\"/></w:pPr>\
             <w:rPr><w:b/><w:sz w:val=\"{s}\"/></w:rPr></w:style>",
            l = level,
            o = level - 1,
            s = half_points
        ));
    }
    xml.push_str(
        "<w:style w:type=\"table\" w:styleId=\"TableGrid\"><w:name w:val=\"Table Grid\"/>\
         <w:tblPr><w:tblBorders>\
         <w:top w:val=\"single\" w:sz=\"4\" w:space=\"0\" w:color=\"auto\"/>\
         <w:left w:val=\"single\" w:sz=\"4\" w:space=\"0\" w:color=\"auto\"/>\
         <w:bottom w:val=\"single\" w:sz=\"4\" w:space=\"0\" w:color=\"auto\"/>\
         <w:right w:val=\"single\" w:sz=\"4\" w:space=\"0\" w:color=\"auto\"/>\
         <w:insideH w:val=\"single\" w:sz=\"4\" w:space=\"0\" w:color=\"auto\"/>\
         <w:insideV w:val=\"single\" w:sz=\"4\" w:space=\"0\" w:color=\"auto\"/>\
         </w:tblBorders></w:tblPr></w:style></w:styles>",
    );
    xml
}

/// A package holding only `word/document.xml` with `body` as its body
/// content, the way other producers may write a minimal document.
#[cfg(test)]
pub(crate) fn package_with_body(body: &str) -> Vec<u8> {
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"{}\" xmlns:r=\"{}\" \
         xmlns:wp=\"{}\" xmlns:a=\"{}\"><w:body>{}</w:body></w:document>",
        NS_W, NS_R, NS_WP, NS_A, body
    );
    let mut buf = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        zip.start_file(DOCUMENT_PART, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn reload(doc: &Document) -> Document {
        Document::from_bytes(&doc.to_bytes().unwrap()).unwrap()
    }

    fn content(doc: &Document) -> Vec<Block> {
        doc.blocks()
            .filter(|b| !matches!(b, Block::Other { .. }))
            .cloned()
            .collect()
    }

    #[test]
    fn blank_document_has_no_content_blocks() {
        let doc = reload(&Document::new());
        assert!(content(&doc).is_empty());
        assert!(matches!(doc.blocks().last(), Some(Block::Other { tag }) if tag == "sectPr"));
    }

    #[test]
    fn appended_blocks_survive_save_and_load_in_order() {
        let mut doc = Document::new();
        doc.add_heading("Quarterly Report", 1).unwrap();
        doc.add_paragraph("Sales & <growth>\tup\nline two").unwrap();
        doc.add_heading("Cover", 0).unwrap();
        doc.add_table(2, 3);

        let doc = reload(&doc);
        assert_eq!(
            content(&doc),
            vec![
                Block::Heading {
                    level: 1,
                    text: "Quarterly Report".into()
                },
                Block::Paragraph {
                    text: "Sales & <growth>\tup\nline two".into()
                },
                Block::Heading {
                    level: 0,
                    text: "Cover".into()
                },
                Block::Table {
                    cells: vec![vec![String::new(); 3]; 2]
                },
            ]
        );
        // section properties stay last
        assert!(matches!(doc.blocks().last(), Some(Block::Other { tag }) if tag == "sectPr"));
    }

    #[test]
    fn repeated_load_save_appends_incrementally() {
        let mut doc = Document::new();
        doc.add_paragraph("one").unwrap();
        let mut doc = reload(&doc);
        doc.add_paragraph("two").unwrap();
        let doc = reload(&doc);
        let texts: Vec<_> = content(&doc)
            .into_iter()
            .filter_map(|b| match b {
                Block::Paragraph { text } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn control_characters_are_rejected() {
        let mut doc = Document::new();
        let err = doc.add_paragraph("bell\u{7}").unwrap_err();
        assert!(matches!(err, DocxError::InvalidText(_)));
    }

    #[test]
    fn picture_keeps_aspect_ratio_and_media_part() {
        let mut doc = Document::new();
        let bytes = png(40, 20);
        doc.add_picture(&bytes, 2 * EMU_PER_INCH).unwrap();
        let doc = reload(&doc);

        let picture = content(&doc).into_iter().next().unwrap();
        match picture {
            Block::Picture {
                rel_id,
                width_emu,
                height_emu,
                caption,
            } => {
                assert!(caption.is_empty());
                assert_eq!(width_emu, 2 * EMU_PER_INCH);
                assert_eq!(height_emu, EMU_PER_INCH);
                assert_eq!(doc.image_bytes(&rel_id), Some(bytes.as_slice()));
            }
            other => panic!("expected picture, got {:?}", other),
        }
    }

    #[test]
    fn second_picture_gets_fresh_relationship() {
        let mut doc = Document::new();
        doc.add_picture(&png(2, 2), EMU_PER_INCH).unwrap();
        let mut doc = reload(&doc);
        doc.add_picture(&png(4, 2), EMU_PER_INCH).unwrap();
        let doc = reload(&doc);
        let ids: Vec<String> = doc
            .blocks()
            .filter_map(|b| match b {
                Block::Picture { rel_id, .. } => Some(rel_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert!(ids.iter().all(|id| doc.image_bytes(id).is_some()));
    }

    #[test]
    fn non_image_bytes_are_rejected() {
        let mut doc = Document::new();
        let err = doc.add_picture(b"definitely not an image", EMU_PER_INCH);
        assert!(matches!(err, Err(DocxError::UnsupportedImage(_))));
    }

    #[test]
    fn foreign_document_elements_are_preserved() {
        // Styled runs and a bookmark that this module does not model.
        let bytes = package_with_body(
            "<w:p><w:pPr><w:pStyle w:val=\"Heading 2\"/></w:pPr><w:r><w:rPr><w:b/></w:rPr><w:t>Intro</w:t></w:r></w:p>\
             <w:bookmarkStart w:id=\"0\" w:name=\"x\"/>\
             <w:p><w:r><w:t>office test phrase</w:t></w:r></w:p>",
        );
        let mut doc = Document::from_bytes(&bytes).unwrap();
        assert_eq!(
            content(&doc)[0],
            Block::Heading {
                level: 2,
                text: "Intro".into()
            }
        );
        doc.add_paragraph("appended").unwrap();
        let bytes = doc.to_bytes().unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        let mut saved = String::new();
        archive
            .by_name(DOCUMENT_PART)
            .unwrap()
            .read_to_string(&mut saved)
            .unwrap();
        assert!(saved.contains("<w:rPr><w:b/></w:rPr><w:t>Intro</w:t>"));
        assert!(saved.contains("<w:bookmarkStart w:id=\"0\" w:name=\"x\"/>"));
        assert!(saved.find("office test phrase").unwrap() < saved.find("appended").unwrap());
    }

    #[test]
    fn picture_paragraph_keeps_its_text() {
        let bytes = package_with_body(
            "<w:p><w:r><w:t>Important caption text</w:t></w:r>\
             <w:r><w:drawing><wp:inline><wp:extent cx=\"914400\" cy=\"457200\"/>\
             <a:graphic><a:graphicData><a:blip r:embed=\"rId9\"/></a:graphicData></a:graphic>\
             </wp:inline></w:drawing></w:r></w:p>",
        );
        let doc = Document::from_bytes(&bytes).unwrap();
        assert_eq!(
            content(&doc),
            vec![Block::Picture {
                rel_id: "rId9".into(),
                width_emu: 914_400,
                height_emu: 457_200,
                caption: "Important caption text".into(),
            }]
        );
        assert!(doc.image_bytes("rId9").is_none());
    }

    #[test]
    fn garbage_is_not_a_package() {
        assert!(matches!(
            Document::from_bytes(b"not a zip"),
            Err(DocxError::Zip(_))
        ));
    }

    #[test]
    fn heading_style_names_map_to_levels() {
        assert_eq!(heading_level("Title"), Some(0));
        assert_eq!(heading_level("Heading1"), Some(1));
        assert_eq!(heading_level("heading 9"), Some(9));
        assert_eq!(heading_level("Heading10"), None);
        assert_eq!(heading_level("Normal"), None);
    }
}
