//! GitHub-backed [`Fetcher`]: resolves the branch, lists the recursive tree,
//! and downloads the raw text of every matching markdown file.
//!
//! Downloads run concurrently (bounded by `concurrency`); the resulting
//! [`DocumentSet`] is keyed by path, so the order in which responses arrive
//! never leaks into later stages.

use futures::{StreamExt, TryStreamExt};
use regex::Regex;
use reqwest::{Client, StatusCode};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::contract::{FetchRequest, Fetcher, PathFilter};
use crate::error::{HandbookError, Result, Stage};
use crate::model::{Document, DocumentSet, RepositoryLocator};

const MARKDOWN_EXTENSIONS: &[&str] = &[".md", ".markdown"];
const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg"];

/// Endpoints and credential for [`GitHubFetcher`].
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_base: String,
    pub raw_base: String,
    pub token: Option<String>,
    pub concurrency: usize,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".into(),
            raw_base: "https://raw.githubusercontent.com".into(),
            token: None,
            concurrency: 8,
        }
    }
}

pub struct GitHubFetcher {
    config: GitHubConfig,
    client: Client,
}

#[derive(Debug, serde::Deserialize)]
struct RepoInfo {
    default_branch: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, serde::Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

impl GitHubFetcher {
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("handbook/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HandbookError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.get(url);
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Sends a GET and maps every non-success status onto the error taxonomy.
    async fn get_checked(
        &self,
        url: &str,
        repository: &RepositoryLocator,
        path: Option<&str>,
    ) -> Result<reqwest::Response> {
        let response = self.get(url).send().await.map_err(|e| {
            error!(url = %url, error = ?e, "GitHub request failed");
            HandbookError::transport(Stage::Fetch, url, e)
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!(url = %url, status = %status, "GitHub returned an error status");
        Err(self.classify(status, body, repository, path, url))
    }

    fn classify(
        &self,
        status: StatusCode,
        body: String,
        repository: &RepositoryLocator,
        path: Option<&str>,
        url: &str,
    ) -> HandbookError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => HandbookError::Auth {
                stage: Stage::Fetch,
                target: repository.to_string(),
                message: if self.config.token.is_some() {
                    format!("credential rejected with status {status}")
                } else {
                    format!("no credential supplied and the request was rejected with status {status}")
                },
            },
            StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
                HandbookError::not_found(repository.to_string(), path.map(str::to_string))
            }
            _ => HandbookError::transport(
                Stage::Fetch,
                url,
                format!("unexpected status {status}: {body}"),
            ),
        }
    }

    async fn resolve_branch(
        &self,
        repo: &RepositoryLocator,
        reference: Option<&str>,
    ) -> Result<String> {
        if let Some(reference) = reference {
            return Ok(reference.to_string());
        }
        let url = format!(
            "{}/repos/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            repo.owner,
            repo.name
        );
        let info: RepoInfo = self
            .get_checked(&url, repo, None)
            .await?
            .json()
            .await
            .map_err(|e| HandbookError::transport(Stage::Fetch, &url, e))?;
        Ok(info.default_branch.unwrap_or_else(|| "main".into()))
    }

    async fn list_tree(&self, repo: &RepositoryLocator, branch: &str) -> Result<Vec<TreeEntry>> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.config.api_base.trim_end_matches('/'),
            repo.owner,
            repo.name,
            branch
        );
        let tree: TreeResponse = self
            .get_checked(&url, repo, Some(branch))
            .await?
            .json()
            .await
            .map_err(|e| HandbookError::transport(Stage::Fetch, &url, e))?;
        if tree.truncated {
            warn!(repository = %repo, branch, "GitHub truncated the tree listing; some files may be missing");
        }
        Ok(tree.tree.into_iter().filter(|e| e.kind == "blob").collect())
    }

    fn raw_url(&self, repo: &RepositoryLocator, branch: &str, path: &str) -> Result<Url> {
        let mut url = Url::parse(&self.config.raw_base)
            .map_err(|e| HandbookError::config(format!("invalid raw base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| HandbookError::config("raw base URL cannot be a base"))?
            .pop_if_empty()
            .extend([repo.owner.as_str(), repo.name.as_str()])
            .extend(branch.split('/'))
            .extend(path.split('/'));
        Ok(url)
    }

    async fn download(
        &self,
        repo: &RepositoryLocator,
        branch: &str,
        path: String,
    ) -> Result<Document> {
        let url = self.raw_url(repo, branch, &path)?;
        let raw_text = self
            .get_checked(url.as_str(), repo, Some(&path))
            .await?
            .text()
            .await
            .map_err(|e| HandbookError::transport(Stage::Fetch, url.as_str(), e))?;
        debug!(path = %path, bytes = raw_text.len(), "Downloaded markdown file");
        Ok(Document {
            path,
            raw_text,
            source_repository: repo.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl Fetcher for GitHubFetcher {
    #[instrument(skip_all, fields(repository = %request.repository))]
    async fn fetch(&self, request: &FetchRequest) -> Result<DocumentSet> {
        let repo = RepositoryLocator::parse(&request.repository).map_err(|e| {
            error!(locator = %request.repository, "Repository locator could not be parsed");
            e
        })?;
        let repo = &repo;
        let matcher = PathMatcher::compile(&request.filter)?;

        let branch = self
            .resolve_branch(repo, request.reference.as_deref())
            .await?;
        info!(branch = %branch, "Resolved branch");

        let entries = self.list_tree(repo, &branch).await?;
        info!(tree_items = entries.len(), "Listed repository tree");

        let mut markdown = Vec::new();
        let mut images = Vec::new();
        for entry in entries {
            if is_image(&entry.path) {
                images.push(entry.path);
            } else if matcher.matches(&entry.path) {
                markdown.push(entry.path);
            }
        }
        info!(
            markdown = markdown.len(),
            images = images.len(),
            "Selected files to fetch"
        );

        let documents: Vec<Document> = futures::stream::iter(markdown)
            .map(|path| self.download(repo, &branch, path))
            .buffer_unordered(self.config.concurrency.max(1))
            .try_collect()
            .await?;

        let set = DocumentSet::new(repo.clone(), branch, documents, images)?;
        info!(run_id = %set.run_id(), documents = set.len(), "Fetch complete");
        Ok(set)
    }
}

fn has_extension(path: &str, extensions: &[&str]) -> bool {
    let lower = path.to_ascii_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext))
}

pub fn is_markdown(path: &str) -> bool {
    has_extension(path, MARKDOWN_EXTENSIONS)
}

pub fn is_image(path: &str) -> bool {
    has_extension(path, IMAGE_EXTENSIONS)
}

/// A [`PathFilter`] with its globs compiled.
#[derive(Debug)]
pub struct PathMatcher {
    globs: Option<Vec<Regex>>,
}

impl PathMatcher {
    pub fn compile(filter: &PathFilter) -> Result<Self> {
        let globs = match filter {
            PathFilter::AllMarkdown => None,
            PathFilter::Globs(patterns) => Some(
                patterns
                    .iter()
                    .map(|p| {
                        glob_to_regex(p).map_err(|e| {
                            HandbookError::config(format!("invalid path glob {p:?}: {e}"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
        };
        Ok(Self { globs })
    }

    /// Markdown files only; with globs, at least one must match.
    pub fn matches(&self, path: &str) -> bool {
        if !is_markdown(path) {
            return false;
        }
        match &self.globs {
            None => true,
            Some(globs) => globs.iter().any(|g| g.is_match(path)),
        }
    }
}

/// `**/` spans zero or more directories, `**` anything, `*` and `?` stay
/// within one path segment.
fn glob_to_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let escaped = regex::escape(pattern.trim_start_matches('/'))
        .replace(r"\*\*/", "(?:.*/)?")
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", "[^/]");
    Regex::new(&format!("^{escaped}$"))
}
