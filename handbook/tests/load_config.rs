use handbook::load_config::{load_config, RendererKind, DEFAULT_SERVICE_URL};
use handbook_core::contract::{MockOrganizer, PathFilter, SummaryStyle};
use handbook_core::fetch::GitHubFetcher;
use handbook_core::pipeline::{GenerationRun, RunState};
use handbook_core::{HandbookError, Stage};
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

#[test]
#[serial]
fn minimal_config_uses_defaults() {
    env::remove_var("GITHUB_TOKEN");
    let file = config_file("source:\n  repository: https://github.com/octo/docs\n");

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.github_token, None);
    assert_eq!(config.render.renderer, RendererKind::Remote);
    assert_eq!(config.render.service_url, DEFAULT_SERVICE_URL);
    assert_eq!(config.render.output, PathBuf::from("handbook.pdf"));
    assert_eq!(config.organize.model, "gpt-4");
    assert_eq!(config.organize.document_char_limit, 3000);

    let request = config.fetch_request(None);
    assert_eq!(request.repository, "https://github.com/octo/docs");
    assert_eq!(request.reference, None);
    assert_eq!(request.filter, PathFilter::AllMarkdown);
    assert_eq!(config.github().api_base, "https://api.github.com");
}

#[test]
#[serial]
fn full_config_with_secret_from_env() {
    env::set_var("GITHUB_TOKEN", "ghp_test");
    let file = config_file(
        r#"
source:
  repository: octo/docs
  reference: release
  include: ["docs/**/*.md", "README.md"]
organize:
  style: detailed
  sentences: 8
  model: gpt-4o
render:
  renderer: local
  output: out/guide.pdf
  author: Docs Team
  company: Octo
"#,
    );

    let config = load_config(file.path()).expect("Config should load");
    env::remove_var("GITHUB_TOKEN");

    assert_eq!(config.github_token.as_deref(), Some("ghp_test"));
    assert_eq!(config.organize.style, SummaryStyle::Detailed);
    assert_eq!(config.organize.sentences, 8);
    assert_eq!(config.organize.temperature, 0.2);
    assert_eq!(config.render.renderer, RendererKind::Local);

    let request = config.fetch_request(Some("octo/other"));
    assert_eq!(request.repository, "octo/other");
    assert_eq!(request.reference.as_deref(), Some("release"));
    assert_eq!(
        request.filter,
        PathFilter::Globs(vec!["docs/**/*.md".into(), "README.md".into()])
    );

    let options = config.render_options(Path::new("out/guide.pdf")).unwrap();
    assert_eq!(options.file_name, "guide.pdf");
    assert_eq!(options.company, "Octo");
    assert_eq!(options.style_template, None);
}

#[test]
#[serial]
fn template_is_read_from_disk() {
    let css = config_file("body { color: navy; }");
    let file = config_file(&format!(
        "source:\n  repository: octo/docs\nrender:\n  template: {}\n",
        css.path().display()
    ));
    let config = load_config(file.path()).unwrap();
    let options = config.render_options(Path::new("handbook.pdf")).unwrap();
    assert_eq!(options.style_template.as_deref(), Some("body { color: navy; }"));
}

#[test]
#[serial]
fn invalid_yaml_and_missing_repository_are_errors() {
    let missing_source = config_file("render:\n  renderer: local\n");
    let err = load_config(missing_source.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"));

    let bad_renderer = config_file("source:\n  repository: octo/docs\nrender:\n  renderer: printer\n");
    assert!(load_config(bad_renderer.path()).is_err());

    let zero_sentences = config_file("source:\n  repository: octo/docs\norganize:\n  sentences: 0\n");
    assert!(load_config(zero_sentences.path()).is_err());
}

#[tokio::test]
#[serial]
async fn unparsable_repository_fails_the_fetch_stage() {
    let file = config_file("source:\n  repository: \"just-a-name\"\n");
    let config = load_config(file.path()).unwrap();

    let mut organizer = MockOrganizer::new();
    organizer.expect_organize().times(0);

    let mut run = GenerationRun::new(config.fetch_request(None));
    let fetcher = GitHubFetcher::new(config.github()).unwrap();
    let err = run.fetch(&fetcher).await.unwrap_err();
    assert!(matches!(err, HandbookError::NotFound { .. }), "{err}");
    assert_eq!(run.state(), RunState::Failed(Stage::Fetch));
    assert!(run
        .organize(&organizer, &config.organize)
        .await
        .is_err());
}
