//! HTML markup of a finalized [`Handbook`].
//!
//! The output depends only on the handbook and the render options, so the
//! same handbook always produces byte-identical markup. Summaries are
//! markdown and are rendered with `pulldown-cmark`; raw HTML inside them is
//! emitted as text.

use std::fmt::Write as _;

use pulldown_cmark::{html, Event, Options, Parser};

use crate::contract::RenderOptions;
use crate::model::{Handbook, Section};

const DEFAULT_STYLE: &str = r#"
* { margin: 0; padding: 0; box-sizing: border-box; }
body { font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; }
.cover-page { min-height: 100vh; padding: 60px 40px; display: flex; flex-direction: column; justify-content: space-between; background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: #fff; page-break-after: always; }
.company-name { font-size: 2rem; }
.project-title { font-size: 3rem; margin-top: 30vh; }
.project-info .label { font-weight: 600; margin-right: 8px; }
.project-info a { color: #fff; }
.toc-page { padding: 40px; page-break-after: always; }
.toc-list { list-style: none; margin-top: 20px; }
.toc-list li { padding: 6px 0; border-bottom: 1px dotted #ccc; }
.toc-list a { color: #333; text-decoration: none; }
.page-title { color: #4a5568; border-bottom: 3px solid #667eea; padding-bottom: 10px; }
.section { padding: 30px 40px; page-break-inside: avoid; }
.section-title { color: #2d3748; margin-bottom: 6px; }
.section-path { font-size: 0.85rem; color: #718096; margin-bottom: 14px; }
.section-content p { margin-bottom: 10px; }
.section-content code { background: #f7fafc; padding: 1px 4px; border-radius: 3px; }
.image-gallery-section { padding: 40px; page-break-before: always; }
.image-grid { display: grid; grid-template-columns: repeat(2, 1fr); gap: 20px; margin: 20px 0; }
.gallery-image { max-width: 100%; border: 1px solid #e2e8f0; }
.gallery-caption { font-size: 0.8rem; color: #718096; }
.document-footer { padding: 20px 40px; font-size: 0.8rem; color: #a0aec0; border-top: 1px solid #e2e8f0; }
"#;

/// Image categories of the gallery, matched on lowercase path keywords.
const GALLERY_CATEGORIES: &[(&str, &[&str])] = &[
    ("Architecture & Diagrams", &["architecture", "diagram", "flow", "design"]),
    ("Screenshots & Demos", &["screenshot", "screen", "demo"]),
];

/// Full HTML document for `handbook`.
pub fn handbook_html(handbook: &Handbook, options: &RenderOptions) -> String {
    let meta = handbook.metadata();
    let repo_title = meta
        .repository
        .rsplit('/')
        .next()
        .unwrap_or(&meta.repository);
    let title = escape(repo_title);
    let style = options.style_template.as_deref().unwrap_or(DEFAULT_STYLE);

    let mut out = String::with_capacity(16 * 1024);
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title} handbook</title>\n<style>{style}</style>\n</head>\n<body>\n"
    );
    cover_page(&mut out, handbook, options, &title);
    table_of_contents(&mut out, handbook.sections());
    out.push_str("<div class=\"content-pages\">\n");
    for section in handbook.sections() {
        section_block(&mut out, section, &meta.repository, &meta.branch);
    }
    out.push_str("</div>\n");
    image_gallery(&mut out, handbook, &meta.repository, &meta.branch);
    let _ = write!(
        out,
        "<div class=\"document-footer\">Generated from {} ({}) on {}</div>\n</body>\n</html>\n",
        escape(&meta.repository),
        escape(&meta.branch),
        meta.generated_at.format("%Y-%m-%d")
    );
    out
}

fn cover_page(out: &mut String, handbook: &Handbook, options: &RenderOptions, title: &str) {
    let meta = handbook.metadata();
    let repo_url = format!("https://github.com/{}", meta.repository);
    let company = if options.company.trim().is_empty() {
        "Knowledge Base".to_string()
    } else {
        escape(&options.company)
    };
    let _ = write!(
        out,
        "<div class=\"cover-page\">\n<h1 class=\"company-name\">{company}</h1>\n\
         <h1 class=\"project-title\">{title}</h1>\n<h2 class=\"subtitle\">Onboarding Documentation</h2>\n\
         <div class=\"project-info\">\n\
         <div class=\"info-item\"><span class=\"label\">Repository:</span><a href=\"{url}\">{url}</a></div>\n",
        url = escape(&repo_url),
    );
    if !options.author.trim().is_empty() {
        let _ = writeln!(
            out,
            "<div class=\"info-item\"><span class=\"label\">Author:</span><span class=\"value\">{}</span></div>",
            escape(&options.author)
        );
    }
    let _ = write!(
        out,
        "<div class=\"info-item\"><span class=\"label\">Generated:</span><span class=\"value\">{}</span></div>\n\
         <div class=\"info-item\"><span class=\"label\">Branch:</span><span class=\"value\">{}</span></div>\n\
         </div>\n</div>\n",
        meta.generated_at.format("%B %d, %Y"),
        escape(&meta.branch)
    );
}

fn table_of_contents(out: &mut String, sections: &[Section]) {
    let _ = write!(
        out,
        "<div class=\"toc-page\">\n<h1 class=\"page-title\">Table of Contents</h1>\n\
         <p class=\"toc-summary\">{} sections</p>\n<ul class=\"toc-list\">\n",
        sections.len()
    );
    for section in sections {
        let _ = writeln!(
            out,
            "<li><a href=\"#{}\">{}. {}</a></li>",
            anchor(section),
            section.order_index + 1,
            escape(&section.title)
        );
    }
    out.push_str("</ul>\n</div>\n");
}

fn section_block(out: &mut String, section: &Section, repository: &str, branch: &str) {
    let _ = write!(
        out,
        "<div class=\"section\" id=\"{}\">\n<h2 class=\"section-title\">{}</h2>\n",
        anchor(section),
        escape(&section.title)
    );
    for doc in &section.source_document_refs {
        let url = format!("https://github.com/{repository}/blob/{branch}/{}", doc.path);
        let _ = writeln!(
            out,
            "<div class=\"section-path\"><a href=\"{}\" class=\"file-link\">{}</a></div>",
            escape(&url),
            escape(&doc.path)
        );
    }
    out.push_str("<div class=\"section-content\">\n");
    out.push_str(&summary_html(&section.summary_text));
    out.push_str("</div>\n</div>\n");
}

/// Markdown summary to HTML, with embedded HTML demoted to text.
pub fn summary_html(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH)
        .map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            other => other,
        });
    let mut rendered = String::new();
    html::push_html(&mut rendered, parser);
    rendered
}

fn image_gallery(out: &mut String, handbook: &Handbook, repository: &str, branch: &str) {
    let images = &handbook.metadata().images;
    if images.is_empty() {
        return;
    }
    out.push_str(
        "<div class=\"image-gallery-section\">\n<h1 class=\"gallery-title\">Visual Assets</h1>\n",
    );
    let mut remaining: Vec<&str> = images.iter().map(String::as_str).collect();
    for (heading, keywords) in GALLERY_CATEGORIES {
        let (matched, rest): (Vec<&str>, Vec<&str>) = remaining.into_iter().partition(|path| {
            let lower = path.to_ascii_lowercase();
            keywords.iter().any(|k| lower.contains(k))
        });
        remaining = rest;
        gallery_category(out, heading, &matched, repository, branch);
    }
    gallery_category(out, "Other Images", &remaining, repository, branch);
    out.push_str("</div>\n");
}

fn gallery_category(out: &mut String, heading: &str, images: &[&str], repository: &str, branch: &str) {
    if images.is_empty() {
        return;
    }
    let _ = write!(
        out,
        "<h2 class=\"gallery-category\">{}</h2>\n<div class=\"image-grid\">\n",
        escape(heading)
    );
    for path in images {
        let url = format!("https://raw.githubusercontent.com/{repository}/{branch}/{path}");
        let name = path.rsplit('/').next().unwrap_or(path);
        let _ = writeln!(
            out,
            "<div class=\"gallery-item\"><img src=\"{}\" alt=\"{}\" class=\"gallery-image\" />\
             <div class=\"gallery-caption\">{}</div></div>",
            escape(&url),
            escape(name),
            escape(path)
        );
    }
    out.push_str("</div>\n");
}

fn anchor(section: &Section) -> String {
    format!("section-{}", section.order_index + 1)
}

/// Escapes text for use in HTML content and attribute values.
pub fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
