//! Offline [`Renderer`] that lays the handbook out as plain text pages with
//! `printpdf` builtin fonts. No remote service is involved.

use async_trait::async_trait;
use printpdf::{
    BuiltinFont, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, Point, Pt, TextItem,
};
use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use tracing::{debug, info, instrument, warn};

use crate::contract::{RenderOptions, Renderer};
use crate::error::{HandbookError, Result};
use crate::model::Handbook;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 20.0;
const BODY_PT: f32 = 11.0;
const WRAP_COLUMNS: usize = 88;
const MM_PER_PT: f32 = 0.352_778;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Weight {
    Title,
    Heading,
    Body,
}

impl Weight {
    fn font(self) -> BuiltinFont {
        match self {
            Weight::Title | Weight::Heading => BuiltinFont::HelveticaBold,
            Weight::Body => BuiltinFont::Helvetica,
        }
    }

    fn size(self) -> f32 {
        match self {
            Weight::Title => 22.0,
            Weight::Heading => 15.0,
            Weight::Body => BODY_PT,
        }
    }

    fn line_height(self) -> f32 {
        self.size() * 1.35
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Line {
    weight: Weight,
    text: String,
}

/// Renders PDFs in-process.
#[derive(Debug, Default, Clone)]
pub struct LocalPdfRenderer;

impl LocalPdfRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Renderer for LocalPdfRenderer {
    #[instrument(skip_all, fields(repository = %handbook.metadata().repository))]
    async fn render(&self, handbook: &Handbook, options: &RenderOptions) -> Result<Vec<u8>> {
        let lines = layout(handbook, options);
        let pages = paginate(&lines);
        debug!(lines = lines.len(), pages = pages.len(), "Laid out handbook");

        let mut doc = PdfDocument::new(&format!("{} handbook", handbook.metadata().repository));
        let mut warnings = Vec::new();
        let bytes = doc
            .with_pages(pages)
            .save(&PdfSaveOptions::default(), &mut warnings);
        if !warnings.is_empty() {
            warn!(count = warnings.len(), "PDF writer reported warnings");
        }
        if bytes.is_empty() {
            return Err(HandbookError::Render {
                repository: handbook.metadata().repository.clone(),
                status: 0,
                body: "local renderer produced an empty document".into(),
            });
        }
        info!(bytes = bytes.len(), "Rendered handbook locally");
        Ok(bytes)
    }
}

fn layout(handbook: &Handbook, options: &RenderOptions) -> Vec<Line> {
    let meta = handbook.metadata();
    let mut lines = Vec::new();
    let mut push = |weight: Weight, text: &str| {
        for wrapped in wrap(&latin1(text), WRAP_COLUMNS) {
            lines.push(Line {
                weight,
                text: wrapped,
            });
        }
    };

    if !options.company.trim().is_empty() {
        push(Weight::Heading, &options.company);
    }
    push(Weight::Title, &meta.repository);
    push(Weight::Body, &format!("Branch: {}", meta.branch));
    if !options.author.trim().is_empty() {
        push(Weight::Body, &format!("Author: {}", options.author));
    }
    push(
        Weight::Body,
        &format!("Generated: {}", meta.generated_at.format("%Y-%m-%d")),
    );
    push(Weight::Body, "");
    push(Weight::Heading, "Table of Contents");
    for section in handbook.sections() {
        push(
            Weight::Body,
            &format!("{}. {}", section.order_index + 1, section.title),
        );
    }

    for section in handbook.sections() {
        push(Weight::Body, "");
        push(
            Weight::Heading,
            &format!("{}. {}", section.order_index + 1, section.title),
        );
        let sources: Vec<&str> = section
            .source_document_refs
            .iter()
            .map(|r| r.path.as_str())
            .collect();
        push(Weight::Body, &format!("Source: {}", sources.join(", ")));
        for paragraph in plain_paragraphs(&section.summary_text) {
            push(Weight::Body, &paragraph);
        }
    }
    lines
}

fn paginate(lines: &[Line]) -> Vec<PdfPage> {
    let top = PAGE_HEIGHT_MM - MARGIN_MM;
    let mut pages = Vec::new();
    let mut ops = Vec::new();
    let mut cursor = top;

    for line in lines {
        let step = line.weight.line_height() * MM_PER_PT;
        if cursor - step < MARGIN_MM && !ops.is_empty() {
            pages.push(PdfPage::new(
                Mm(PAGE_WIDTH_MM),
                Mm(PAGE_HEIGHT_MM),
                std::mem::take(&mut ops),
            ));
            cursor = top;
        }
        cursor -= step;
        ops.extend([
            Op::StartTextSection,
            Op::SetTextCursor {
                pos: Point {
                    x: Mm(MARGIN_MM).into(),
                    y: Mm(cursor).into(),
                },
            },
            Op::SetFontSizeBuiltinFont {
                size: Pt(line.weight.size()),
                font: line.weight.font(),
            },
            Op::WriteTextBuiltinFont {
                items: vec![TextItem::Text(line.text.clone())],
                font: line.weight.font(),
            },
            Op::EndTextSection,
        ]);
    }
    pages.push(PdfPage::new(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), ops));
    pages
}

/// Paragraph texts of a markdown summary with inline markup stripped.
fn plain_paragraphs(markdown: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) | Event::Html(t) | Event::InlineHtml(t) => {
                current.push_str(&t)
            }
            Event::SoftBreak | Event::HardBreak => current.push(' '),
            Event::Start(Tag::Item) => current.push_str("- "),
            Event::End(TagEnd::Paragraph | TagEnd::Item | TagEnd::Heading(_) | TagEnd::CodeBlock) => {
                let text = current.trim().to_string();
                if !text.is_empty() {
                    paragraphs.push(text);
                }
                current.clear();
            }
            _ => {}
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    paragraphs
}

/// Builtin fonts only cover Latin-1; everything else becomes `?`.
fn latin1(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201c}' | '\u{201d}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            c if (c as u32) < 0x100 && !c.is_control() => c,
            _ => '?',
        })
        .collect()
}

fn wrap(text: &str, columns: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return vec![String::new()];
    }
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > columns && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
