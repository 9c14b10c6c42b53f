//! Content organizer backed by a [`TextGenerator`].
//!
//! Documents are truncated, packed into chunks under a character cap and
//! summarized one chunk per request. A single ordering request then proposes
//! the reading order. A failed or malformed chunk never drops documents
//! silently: each affected path is returned as a [`DocumentFailure`].

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};

use crate::contract::{
    DocumentFailure, GenerationRequest, OrganizeOptions, Organized, Organizer, SummaryStyle,
    TextGenerator,
};
use crate::error::{HandbookError, Result, Stage};
use crate::model::{Document, DocumentSet, Section, SectionId};

const SYSTEM_PROMPT: &str = "You are an expert technical writer preparing an onboarding handbook \
from a repository's documentation. Answer with JSON only.";

const TRUNCATION_MARKER: &str = "\n\n[... content truncated ...]";

const IMAGE_NOTE: &str = "\n\n*This section includes images or diagrams in the repository.*";

pub struct LlmOrganizer<G> {
    generator: G,
}

impl<G: TextGenerator> LlmOrganizer<G> {
    pub fn new(generator: G) -> Self {
        Self { generator }
    }
}

#[derive(Debug, Deserialize)]
struct SummaryItem {
    path: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Clone)]
struct Summary {
    title: String,
    text: String,
}

#[async_trait]
impl<G: TextGenerator> Organizer for LlmOrganizer<G> {
    #[instrument(skip_all, fields(repository = %documents.repository(), documents = documents.len()))]
    async fn organize(
        &self,
        documents: &DocumentSet,
        options: &OrganizeOptions,
    ) -> Result<Organized> {
        if documents.is_empty() {
            return Err(HandbookError::validation(
                Stage::Organize,
                "no documents to organize",
            ));
        }
        let repository = documents.repository().to_string();
        let chunks = plan_chunks(documents, options);
        info!(chunks = chunks.len(), "Summarizing documents");

        let mut summaries: BTreeMap<String, Summary> = BTreeMap::new();
        let mut failures: Vec<DocumentFailure> = Vec::new();

        for (index, chunk) in chunks.iter().enumerate() {
            let request = summary_request(chunk, documents, options);
            debug!(chunk = index, prompt_chars = request.prompt.len(), "Sending summary request");
            let reply = match self.generator.generate(&request).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(chunk = index, error = %e, "Summary request failed");
                    fail_all(&mut failures, chunk, &format!("summary request failed: {e}"));
                    continue;
                }
            };
            let items: Vec<SummaryItem> = match parse_json_array(&reply) {
                Ok(items) => items,
                Err(e) => {
                    warn!(chunk = index, error = %e, "Malformed summary response");
                    fail_all(&mut failures, chunk, &format!("malformed summary response: {e}"));
                    continue;
                }
            };

            let expected: BTreeSet<&str> = chunk.iter().map(|d| d.path.as_str()).collect();
            for item in items {
                if !expected.contains(item.path.as_str()) {
                    warn!(path = %item.path, "Ignoring summary for a path that was not requested");
                    continue;
                }
                if item.summary.trim().is_empty() {
                    continue;
                }
                let title = if item.title.trim().is_empty() {
                    title_from_path(&item.path)
                } else {
                    item.title.trim().to_string()
                };
                let mut text = item.summary.trim().to_string();
                if !related_images(&item.path, documents.images()).is_empty() {
                    text.push_str(IMAGE_NOTE);
                }
                summaries.insert(item.path, Summary { title, text });
            }
            for doc in chunk {
                if !summaries.contains_key(&doc.path) {
                    failures.push(DocumentFailure {
                        path: doc.path.clone(),
                        reason: "no usable summary in the response".into(),
                    });
                }
            }
        }

        failures.sort_by(|a, b| a.path.cmp(&b.path));
        failures.dedup_by(|a, b| a.path == b.path);

        if summaries.is_empty() {
            error!(failed = failures.len(), "Every document failed to summarize");
            return Err(HandbookError::Summarization {
                repository,
                message: "no document could be summarized".into(),
                failed_paths: failures.into_iter().map(|f| f.path).collect(),
            });
        }

        let order = self.propose_order(&repository, &summaries, options).await?;

        let sections = order
            .into_iter()
            .filter_map(|path| {
                let summary = summaries.remove(&path)?;
                let doc = documents.get(&path)?;
                Some((summary, documents.id_of(doc)))
            })
            .enumerate()
            .map(|(order_index, (summary, doc_id))| Section {
                id: SectionId::new(),
                title: summary.title,
                summary_text: summary.text,
                source_document_refs: vec![doc_id],
                order_index,
            })
            .collect::<Vec<_>>();

        info!(
            sections = sections.len(),
            failures = failures.len(),
            "Organized documents"
        );
        Ok(Organized { sections, failures })
    }
}

impl<G: TextGenerator> LlmOrganizer<G> {
    async fn propose_order(
        &self,
        repository: &str,
        summaries: &BTreeMap<String, Summary>,
        options: &OrganizeOptions,
    ) -> Result<Vec<String>> {
        let known: Vec<String> = summaries.keys().cloned().collect();
        if known.len() == 1 {
            return Ok(known);
        }
        let request = order_request(summaries, options);
        let reply = self.generator.generate(&request).await.map_err(|e| {
            error!(error = %e, "Ordering request failed");
            HandbookError::Summarization {
                repository: repository.to_string(),
                message: format!("ordering request failed: {e}"),
                failed_paths: known.clone(),
            }
        })?;
        let proposed: Vec<String> = parse_json_array(&reply).map_err(|e| {
            error!(error = %e, "Malformed ordering response");
            HandbookError::Summarization {
                repository: repository.to_string(),
                message: format!("malformed ordering response: {e}"),
                failed_paths: known.clone(),
            }
        })?;
        Ok(reconcile_order(proposed, &known))
    }
}

fn fail_all(failures: &mut Vec<DocumentFailure>, chunk: &[Document], reason: &str) {
    failures.extend(chunk.iter().map(|d| DocumentFailure {
        path: d.path.clone(),
        reason: reason.to_string(),
    }));
}

/// Cuts `text` to at most `limit` characters on a char boundary.
fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte, _)) => format!("{}{}", &text[..byte], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// Packs truncated documents in path order into chunks whose text stays
/// under `chunk_char_limit`. A document larger than the cap gets a chunk of
/// its own.
fn plan_chunks(documents: &DocumentSet, options: &OrganizeOptions) -> Vec<Vec<Document>> {
    let mut chunks: Vec<Vec<Document>> = Vec::new();
    let mut current: Vec<Document> = Vec::new();
    let mut current_len = 0usize;

    for doc in documents.iter() {
        let text = truncate(&doc.raw_text, options.document_char_limit);
        let len = text.chars().count();
        if !current.is_empty() && current_len + len > options.chunk_char_limit {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += len;
        current.push(Document {
            raw_text: text,
            ..doc.clone()
        });
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Images in the document's directory or below it.
fn related_images<'a>(path: &str, images: &'a [String]) -> Vec<&'a str> {
    let dir = match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "",
    };
    images
        .iter()
        .filter(|img| img.starts_with(dir))
        .map(String::as_str)
        .collect()
}

fn summary_request(
    chunk: &[Document],
    documents: &DocumentSet,
    options: &OrganizeOptions,
) -> GenerationRequest {
    let style = match options.style {
        SummaryStyle::Concise => "concise",
        SummaryStyle::Detailed => "detailed, thorough",
    };
    let mut prompt = format!(
        "Summarize each markdown file below in about {} {style} sentences and give it a short \
         descriptive title. If a file lists related images, mention them in its summary.\n\
         Answer with a JSON array holding one object per file:\n\
         [{{\"path\": \"<file path exactly as given>\", \"title\": \"...\", \"summary\": \"...\"}}]\n",
        options.sentences
    );
    for doc in chunk {
        let images = related_images(&doc.path, documents.images());
        prompt.push_str(&format!("\n=== FILE: {}\n", doc.path));
        if images.is_empty() {
            prompt.push_str("Related images: none\n");
        } else {
            prompt.push_str(&format!("Related images: {}\n", images.join(", ")));
        }
        prompt.push_str(&doc.raw_text);
        prompt.push_str("\n=== END FILE\n");
    }
    GenerationRequest {
        system: SYSTEM_PROMPT.into(),
        prompt,
        model: options.model.clone(),
        temperature: options.temperature,
        max_tokens: options.max_output_tokens,
    }
}

fn order_request(summaries: &BTreeMap<String, Summary>, options: &OrganizeOptions) -> GenerationRequest {
    let mut prompt = String::from(
        "Propose a reading order for an onboarding handbook made of the sections below. \
         Put overviews and READMEs first, then installation and setup, then usage guides and \
         tutorials, then reference material such as APIs, then contribution notes and changelogs. \
         A section that depends on another one comes after it.\n\
         Answer with a JSON array of the paths in reading order, every path exactly once.\n\n",
    );
    for (path, summary) in summaries {
        let first_line = summary.text.lines().next().unwrap_or_default();
        prompt.push_str(&format!("- {path}: {}. {first_line}\n", summary.title));
    }
    GenerationRequest {
        system: SYSTEM_PROMPT.into(),
        prompt,
        model: options.model.clone(),
        temperature: options.temperature,
        max_tokens: options.max_output_tokens,
    }
}

/// Parses the outermost JSON array in `reply`, tolerating code fences or a
/// sentence of prose around it.
fn parse_json_array<T: serde::de::DeserializeOwned>(reply: &str) -> std::result::Result<Vec<T>, String> {
    let start = reply.find('[').ok_or("no JSON array in response")?;
    let end = reply.rfind(']').ok_or("unterminated JSON array in response")?;
    if end < start {
        return Err("unterminated JSON array in response".into());
    }
    serde_json::from_str(&reply[start..=end]).map_err(|e| e.to_string())
}

/// Keeps the proposed order for known paths (first occurrence wins) and
/// appends whatever the proposal left out in heuristic order.
fn reconcile_order(proposed: Vec<String>, known: &[String]) -> Vec<String> {
    let known_set: BTreeSet<&str> = known.iter().map(String::as_str).collect();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut order = Vec::with_capacity(known.len());
    for path in proposed {
        if !known_set.contains(path.as_str()) {
            warn!(path = %path, "Ordering response named an unknown path");
            continue;
        }
        if seen.insert(path.clone()) {
            order.push(path);
        }
    }
    let mut missing: Vec<&String> = known.iter().filter(|p| !seen.contains(*p)).collect();
    if !missing.is_empty() {
        warn!(missing = missing.len(), "Ordering response left out paths; appending them");
        missing.sort_by_key(|p| (heuristic_rank(p), p.to_string()));
        order.extend(missing.into_iter().cloned());
    }
    order
}

/// Coarse reading-order bucket derived from a path: READMEs and index pages,
/// then docs and guides, tutorials and examples, API and reference, the rest.
pub fn heuristic_rank(path: &str) -> u8 {
    let lower = path.to_ascii_lowercase();
    let (dir, file) = match lower.rfind('/') {
        Some(i) => (&lower[..i], &lower[i + 1..]),
        None => ("", lower.as_str()),
    };
    if file == "readme.md" || file == "index.md" {
        0
    } else if dir.contains("doc") || dir.contains("guide") {
        1
    } else if dir.contains("tutorial") || dir.contains("example") {
        2
    } else if dir.contains("api") || dir.contains("reference") {
        3
    } else {
        4
    }
}

/// `docs/getting-started.md` -> `Getting Started`.
pub fn title_from_path(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    let stem = file.rsplit_once('.').map(|(s, _)| s).unwrap_or(file);
    stem.split(|c| c == '-' || c == '_' || c == ' ')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
