//! Pipeline Orchestrator: turn tagged text into a published PDF.
//!
//! Input carries exactly one `<header>` region and one `<body>` region. The
//! header becomes a level-1 heading and the body a paragraph of a freshly
//! created document, which is then converted to PDF and published. Stages run
//! in order and the first failure stops the run without rolling back.

use std::sync::Arc;

use crate::convert::FormatConverter;
use crate::error::{DocError, DocResult};
use crate::publish::Publisher;
use crate::store::DocumentStore;

const HEADER_TAG: &str = "header";
const BODY_TAG: &str = "body";

/// Trimmed contents of the two tagged regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedInput<'a> {
    pub header: &'a str,
    pub body: &'a str,
}

/// Byte span of one `<tag>...</tag>` region, tags included.
struct Region<'a> {
    start: usize,
    end: usize,
    inner: &'a str,
}

fn region<'a>(input: &'a str, tag: &str) -> DocResult<Region<'a>> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let opens: Vec<usize> = input.match_indices(&open).map(|(i, _)| i).collect();
    let closes: Vec<usize> = input.match_indices(&close).map(|(i, _)| i).collect();

    let (start, close_at) = match (opens.as_slice(), closes.as_slice()) {
        ([], _) | (_, []) => {
            return Err(DocError::Malformed(format!(
                "input must contain a {}...{} region",
                open, close
            )))
        }
        ([start], [close_at]) if start + open.len() <= *close_at => (*start, *close_at),
        ([_], [_]) => {
            return Err(DocError::Malformed(format!(
                "{} appears before {}",
                close, open
            )))
        }
        _ => {
            return Err(DocError::Malformed(format!(
                "input must contain exactly one {} region",
                open
            )))
        }
    };
    Ok(Region {
        start,
        end: close_at + close.len(),
        inner: &input[start + open.len()..close_at],
    })
}

/// Extracts the header and body regions. Missing, repeated, nested or
/// overlapping regions are rejected.
pub fn parse_tagged(input: &str) -> DocResult<TaggedInput<'_>> {
    let header = region(input, HEADER_TAG)?;
    let body = region(input, BODY_TAG)?;
    if header.start < body.end && body.start < header.end {
        return Err(DocError::Malformed(
            "<header> and <body> regions must not overlap".to_string(),
        ));
    }
    Ok(TaggedInput {
        header: header.inner.trim(),
        body: body.inner.trim(),
    })
}

#[derive(Clone)]
pub struct Pipeline {
    store: DocumentStore,
    converter: FormatConverter,
    publisher: Arc<dyn Publisher>,
}

impl Pipeline {
    pub fn new(
        store: DocumentStore,
        converter: FormatConverter,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            store,
            converter,
            publisher,
        }
    }

    pub fn publisher(&self) -> &dyn Publisher {
        self.publisher.as_ref()
    }

    /// Runs every stage and returns one report line per stage.
    pub fn process(&self, input: &str, filename: &str) -> DocResult<String> {
        let tagged = parse_tagged(input)?;
        let mut report = Vec::with_capacity(5);

        report.push(self.stage("create", || self.store.create_blank(filename))?);
        report.push(self.stage("heading", || {
            self.store.add_heading(filename, tagged.header, 1)
        })?);
        report.push(self.stage("paragraph", || {
            self.store.add_paragraph(filename, tagged.body)
        })?);

        let mut artifact = None;
        report.push(self.stage("convert", || {
            let conversion = self.converter.convert_to_pdf(filename)?;
            let message = conversion.to_string();
            artifact = Some(conversion.target);
            Ok(message)
        })?);
        let artifact = artifact
            .ok_or_else(|| DocError::External("conversion produced no artifact".into()))?;
        report.push(self.stage("publish", || {
            let _lock = self.store.scratch().lock(&artifact);
            self.publisher.publish(&artifact)
        })?);

        Ok(report.join("\n"))
    }

    fn stage<F>(&self, stage: &'static str, run: F) -> DocResult<String>
    where
        F: FnOnce() -> DocResult<String>,
    {
        match run() {
            Ok(message) => {
                tracing::info!(stage, "{}", message);
                Ok(message)
            }
            Err(err) => {
                tracing::warn!(stage, error = %err, "pipeline stage failed");
                Err(err.in_stage(stage))
            }
        }
    }
}
