/// # handbook CLI Interface (Module)
///
/// Command parsing and orchestration for the `handbook` binary. All pipeline logic (fetching,
/// organizing, preview, rendering) lives in [`handbook-core`]; this module wires the concrete
/// clients together and decides where output goes.
///
/// ## Subcommands
/// - `generate`: fetch, organize, accept the proposed order as-is, render and write the PDF
/// - `preview`: fetch, organize and serve the web preview for human review
/// - `fetch`: list the documents and images a run would work with
///
/// ## How To Use
/// - For command-line users: use the installed `handbook` binary with `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`handbook-core`]: ../../handbook-core/
use crate::llm::OpenAiClient;
use crate::load_config::{load_config, CliConfig, RendererKind};
use crate::preview_server::{self, AppState, PreviewContext};
use crate::render_client::HttpRenderer;
use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use handbook_core::contract::Renderer;
use handbook_core::fetch::GitHubFetcher;
use handbook_core::organize::LlmOrganizer;
use handbook_core::pipeline::GenerationRun;
use handbook_core::render::LocalPdfRenderer;
use handbook_core::{HandbookError, Stage};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// CLI for handbook: turn a repository's markdown docs into a reviewed PDF handbook.
#[derive(Parser)]
#[clap(
    name = "handbook",
    version,
    about = "Generate an ordered, human-reviewed PDF handbook from a GitHub repository's markdown documentation"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate the PDF without review, using the proposed order
    Generate {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Repository to use instead of the one in the config
        #[clap(long)]
        repository: Option<String>,
        /// Output file instead of `render.output`
        #[clap(long)]
        output: Option<PathBuf>,
        #[clap(long, value_enum)]
        renderer: Option<RendererKind>,
    },
    /// Serve the web preview for reviewing sections before rendering
    Preview {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        repository: Option<String>,
        #[clap(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
        #[clap(long, value_enum)]
        renderer: Option<RendererKind>,
    },
    /// List the markdown documents and images that would be used
    Fetch {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        repository: Option<String>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Generate {
            config,
            repository,
            output,
            renderer,
        } => {
            let config = load_config(config)?;
            tracing::info!(command = "generate", "Starting handbook generation");
            let output = output.unwrap_or_else(|| config.render.output.clone());
            let renderer_kind = renderer.unwrap_or(config.render.renderer);

            let mut run = fetch_and_organize(&config, repository.as_deref()).await?;
            let renderer = build_renderer(&config, renderer_kind)?;
            let render_options = config.render_options(&output)?;
            let bytes = run
                .render(renderer.as_ref(), &render_options, Utc::now())
                .await?;
            write_output(&output, bytes)?;
            tracing::info!(
                command = "generate",
                output = %output.display(),
                bytes = bytes.len(),
                "Handbook written"
            );
            println!("{}", output.display());
            Ok(())
        }
        Commands::Preview {
            config,
            repository,
            bind,
            renderer,
        } => {
            let config = load_config(config)?;
            tracing::info!(command = "preview", "Preparing web preview");
            let renderer_kind = renderer.unwrap_or(config.render.renderer);
            let organizer = Arc::new(LlmOrganizer::new(OpenAiClient::new_from_env()?));
            let run = fetch_and_organize_with(&config, repository.as_deref(), organizer.as_ref())
                .await?;
            let context = PreviewContext {
                run,
                organizer,
                renderer: build_renderer(&config, renderer_kind)?,
                organize_options: config.organize.clone(),
                render_options: config.render_options(&config.render.output)?,
            };
            println!("Preview available at http://{bind}/");
            preview_server::serve(bind, AppState::new(context)).await
        }
        Commands::Fetch { config, repository } => {
            let config = load_config(config)?;
            let mut run = GenerationRun::new(config.fetch_request(repository.as_deref()));
            let fetcher = GitHubFetcher::new(config.github())?;
            let documents = run.fetch(&fetcher).await?;
            println!(
                "{} @ {} ({} documents, {} images)",
                documents.repository(),
                documents.branch(),
                documents.len(),
                documents.images().len()
            );
            for path in documents.paths() {
                println!("  {path}");
            }
            for image in documents.images() {
                println!("  [image] {image}");
            }
            Ok(())
        }
    }
}

async fn fetch_and_organize(config: &CliConfig, repository: Option<&str>) -> Result<GenerationRun> {
    let organizer = LlmOrganizer::new(OpenAiClient::new_from_env()?);
    fetch_and_organize_with(config, repository, &organizer).await
}

async fn fetch_and_organize_with(
    config: &CliConfig,
    repository: Option<&str>,
    organizer: &dyn handbook_core::contract::Organizer,
) -> Result<GenerationRun> {
    let mut run = GenerationRun::new(config.fetch_request(repository));
    let fetcher = GitHubFetcher::new(config.github())?;
    run.fetch(&fetcher).await?;
    let session = run.organize(organizer, &config.organize).await?;
    for failure in session.failures() {
        tracing::warn!(path = %failure.path, reason = %failure.reason, "Document left out of the handbook");
    }
    Ok(run)
}

fn build_renderer(config: &CliConfig, kind: RendererKind) -> Result<Arc<dyn Renderer>> {
    Ok(match kind {
        RendererKind::Remote => Arc::new(HttpRenderer::new(
            config.render.service_url.clone(),
            Duration::from_secs(config.render.timeout_secs),
        )?),
        RendererKind::Local => Arc::new(LocalPdfRenderer::new()),
    })
}

/// Writes through a temp file in the target directory so a failed write never leaves a
/// truncated PDF behind.
pub fn write_output(path: &Path, bytes: &[u8]) -> handbook_core::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let io_err = |at: &Path, e: std::io::Error| HandbookError::io(Stage::Render, at, e);
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| io_err(dir, e))?;
    tmp.write_all(bytes).map_err(|e| io_err(path, e))?;
    tmp.persist(path).map_err(|e| io_err(path, e.error))?;
    Ok(())
}
