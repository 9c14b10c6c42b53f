/// `load_config` module: Loads the static YAML config and the environment secrets into a [`CliConfig`].
///
/// This module is the only place where user-supplied YAML is parsed and mapped onto the
/// strongly-typed request and option types of `handbook-core`.
///
/// # Responsibilities
/// - Parse the YAML file (`source`, `organize`, `render` sections) with serde defaults
/// - Read secrets (`GITHUB_TOKEN`) from the environment; they never live in the file
/// - Produce a [`FetchRequest`] and [`RenderOptions`] for the run, applying CLI overrides
///
/// # Errors
/// All errors use `anyhow::Error` with the offending path or field in the message, and are
/// surfaced at the CLI boundary.
///
/// # Schema
/// ```yaml
/// source:
///   repository: octo/docs        # owner/name or GitHub URL
///   reference: main              # optional; default branch when absent
///   include: ["docs/**"]         # optional globs; all markdown when empty
/// organize:
///   style: concise               # concise | detailed
///   sentences: 5
///   model: gpt-4
/// render:
///   renderer: remote             # remote | local
///   service_url: http://localhost:5165/api/pdf/generate
///   output: handbook.pdf
///   template: style.css          # optional CSS replacing the default style
///   author: Docs Team
///   company: Octo
/// ```
use anyhow::{Context, Result};
use handbook_core::contract::{FetchRequest, OrganizeOptions, PathFilter, RenderOptions};
use handbook_core::fetch::GitHubConfig;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const DEFAULT_SERVICE_URL: &str = "http://localhost:5165/api/pdf/generate";

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub source: SourceSection,
    pub organize: OrganizeOptions,
    pub render: RenderSection,
    /// From `GITHUB_TOKEN`; public repositories work without it.
    pub github_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSection {
    pub repository: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub include: Vec<String>,
    /// Override for GitHub Enterprise or tests.
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub raw_base: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// POST the HTML markup to the rendering service.
    #[default]
    Remote,
    /// Render offline with the built-in PDF writer.
    Local,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderSection {
    pub renderer: RendererKind,
    pub service_url: String,
    pub timeout_secs: u64,
    pub output: PathBuf,
    pub template: Option<PathBuf>,
    pub author: String,
    pub company: String,
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            renderer: RendererKind::Remote,
            service_url: DEFAULT_SERVICE_URL.to_string(),
            timeout_secs: 120,
            output: PathBuf::from("handbook.pdf"),
            template: None,
            author: String::new(),
            company: String::new(),
        }
    }
}

/// Loads a static YAML config file (no secrets) and injects the secrets from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    #[derive(Debug, Deserialize)]
    struct RawConfig {
        source: SourceSection,
        #[serde(default)]
        organize: OrganizeOptions,
        #[serde(default)]
        render: RenderSection,
    }

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if raw.organize.sentences == 0 {
        return Err(anyhow::anyhow!("organize.sentences must be at least 1"));
    }

    let github_token = env::var("GITHUB_TOKEN").ok().filter(|t| !t.trim().is_empty());
    if github_token.is_none() {
        warn!("GITHUB_TOKEN not set; private repositories will be rejected and rate limits are low");
    }

    Ok(CliConfig {
        source: raw.source,
        organize: raw.organize,
        render: raw.render,
        github_token,
    })
}

impl CliConfig {
    /// Fetch request for the configured (or overridden) repository. The
    /// locator is parsed by the fetcher, not here.
    pub fn fetch_request(&self, repository_override: Option<&str>) -> FetchRequest {
        let repository = repository_override
            .unwrap_or(&self.source.repository)
            .to_string();
        let filter = if self.source.include.is_empty() {
            PathFilter::AllMarkdown
        } else {
            PathFilter::Globs(self.source.include.clone())
        };
        FetchRequest {
            repository,
            reference: self.source.reference.clone(),
            filter,
        }
    }

    pub fn github(&self) -> GitHubConfig {
        let defaults = GitHubConfig::default();
        GitHubConfig {
            api_base: self.source.api_base.clone().unwrap_or(defaults.api_base),
            raw_base: self.source.raw_base.clone().unwrap_or(defaults.raw_base),
            token: self.github_token.clone(),
            concurrency: defaults.concurrency,
        }
    }

    /// Render options; reads the CSS template when one is configured.
    pub fn render_options(&self, output: &Path) -> Result<RenderOptions> {
        let style_template = match &self.render.template {
            Some(path) => Some(
                fs::read_to_string(path)
                    .with_context(|| format!("Failed to read style template {path:?}"))?,
            ),
            None => None,
        };
        let file_name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| RenderOptions::default().file_name);
        Ok(RenderOptions {
            author: self.render.author.clone(),
            company: self.render.company.clone(),
            file_name,
            style_template,
        })
    }
}
