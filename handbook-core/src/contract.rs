//! # contract: the narrow seams between the pipeline and remote services
//!
//! Each remote-call dependent stage sits behind one trait so the pipeline can
//! be driven by real clients or by `mockall` mocks:
//!
//! - [`Fetcher`]: repository locator + path filter -> [`DocumentSet`]
//! - [`TextGenerator`]: one prompt -> one completion (used by the organizer)
//! - [`Organizer`]: [`DocumentSet`] -> ordered [`Section`]s plus failures
//! - [`Renderer`]: finalized [`Handbook`] -> PDF bytes
//!
//! ## Mocking & Testing
//! The traits carry `automock` under `cfg(test)` or the `test-export-mocks`
//! feature, so integration tests in this crate and in the CLI crate can use
//! `MockFetcher`, `MockOrganizer`, `MockRenderer` and `MockTextGenerator`.
//!
//! ## Errors
//! Every method returns [`HandbookError`]; implementors map transport and
//! service failures onto the matching variant and stage.

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{DocumentSet, Handbook, Section};

/// Which files of the repository become documents.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PathFilter {
    /// Every markdown file in the tree.
    #[default]
    AllMarkdown,
    /// Markdown files matching at least one of the globs.
    Globs(Vec<String>),
}

/// Input of one fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Locator as the user gave it: `owner/name` or a GitHub URL. Fetchers
    /// parse it with [`RepositoryLocator::parse`](crate::model::RepositoryLocator::parse),
    /// so an unparsable locator fails the fetch stage as `NotFound`.
    pub repository: String,
    /// Branch, tag or commit. `None` resolves the repository's default branch.
    pub reference: Option<String>,
    pub filter: PathFilter,
}

/// Trait for retrieving the documents of one repository.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns every matching document, keyed by unique path, or fails with
    /// `NotFound`, `Auth` or `Transport`.
    async fn fetch(&self, request: &FetchRequest) -> Result<DocumentSet>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStyle {
    #[default]
    Concise,
    Detailed,
}

/// Style and size knobs for the organizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizeOptions {
    pub style: SummaryStyle,
    /// Target sentence count per summary.
    pub sentences: u32,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Longer documents are cut to this many characters before sending.
    pub document_char_limit: usize,
    /// Upper bound on the document text packed into one request.
    pub chunk_char_limit: usize,
}

impl Default for OrganizeOptions {
    fn default() -> Self {
        Self {
            style: SummaryStyle::Concise,
            sentences: 5,
            model: "gpt-4".into(),
            temperature: 0.2,
            max_output_tokens: 1500,
            document_char_limit: 3000,
            chunk_char_limit: 12_000,
        }
    }
}

/// A document the organizer could not turn into a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub path: String,
    pub reason: String,
}

/// Organizer output: sections in proposed order (order_index `0..n`) plus an
/// explicit marker for every document that did not make it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Organized {
    pub sections: Vec<Section>,
    pub failures: Vec<DocumentFailure>,
}

impl Organized {
    pub fn failed_paths(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.path.clone()).collect()
    }
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Organizer: Send + Sync {
    /// Summarize and order `documents`. Partial failures are reported in
    /// [`Organized::failures`]; total failure is a `Summarization` error.
    async fn organize(&self, documents: &DocumentSet, options: &OrganizeOptions)
        -> Result<Organized>;
}

/// One chat-style completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Remote text generation, e.g. an OpenAI-compatible chat completions API.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Cover page details and styling for the rendered handbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub author: String,
    pub company: String,
    /// File name reported to the rendering service.
    pub file_name: String,
    /// CSS replacing the built-in stylesheet.
    pub style_template: Option<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            author: String::new(),
            company: String::new(),
            file_name: "handbook.pdf".into(),
            style_template: None,
        }
    }
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Produce PDF bytes, or fail with `Render` (payload rejected) or
    /// `Transport` (service unreachable).
    async fn render(&self, handbook: &Handbook, options: &RenderOptions) -> Result<Vec<u8>>;
}
