//! Run orchestration: fetch → organize → preview → render for one repository.
//!
//! A [`GenerationRun`] walks through the states of one handbook generation
//! and holds the artifacts each stage produced:
//!
//! ```text
//! Fetching → Organizing → Previewing → Rendering → Done
//!                  ↑            │  ↑          │
//!                  └─regenerate─┘  └─reopen───┘
//! ```
//!
//! Any stage can move the run to [`RunState::Failed`].
//!
//! # Retries
//! Nothing here retries on its own. The caller decides:
//!   - a failed organize can be re-invoked alone ([`GenerationRun::organize`])
//!   - a failed render can be re-invoked with the same frozen [`Handbook`]
//!   - a failed fetch ends the run; start a new one
//!
//! # Major Types
//! - [`RunState`]: where the run is
//! - [`GenerationRun`]: the run itself, driven through the stage traits in
//!   [`crate::contract`]
//!
//! # Error Handling
//! Stage errors are returned unchanged after the state is updated. Calling an
//! operation the current state does not allow yields
//! [`HandbookError::InvalidState`] and leaves the run untouched.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crate::contract::{
    FetchRequest, Fetcher, OrganizeOptions, Organizer, PathFilter, RenderOptions, Renderer,
};
use crate::error::{HandbookError, Result, Stage};
use crate::model::{DocumentSet, Handbook, RunId};
use crate::preview::PreviewSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunState {
    Fetching,
    Organizing,
    Previewing,
    Rendering,
    Done,
    Failed(Stage),
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Fetching => f.write_str("fetching"),
            RunState::Organizing => f.write_str("organizing"),
            RunState::Previewing => f.write_str("previewing"),
            RunState::Rendering => f.write_str("rendering"),
            RunState::Done => f.write_str("done"),
            RunState::Failed(stage) => write!(f, "failed during {stage}"),
        }
    }
}

/// One handbook generation.
#[derive(Debug)]
pub struct GenerationRun {
    request: FetchRequest,
    state: RunState,
    documents: Option<DocumentSet>,
    /// Documents handed to the organizer; a subset of `documents` after a
    /// regeneration.
    organize_input: Option<DocumentSet>,
    preview: Option<PreviewSession>,
    handbook: Option<Handbook>,
    output: Option<Vec<u8>>,
}

impl GenerationRun {
    pub fn new(request: FetchRequest) -> Self {
        Self {
            request,
            state: RunState::Fetching,
            documents: None,
            organize_input: None,
            preview: None,
            handbook: None,
            output: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn request(&self) -> &FetchRequest {
        &self.request
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.documents.as_ref().map(DocumentSet::run_id)
    }

    pub fn documents(&self) -> Option<&DocumentSet> {
        self.documents.as_ref()
    }

    /// The frozen handbook, present while rendering, after a failed render
    /// and once done.
    pub fn handbook(&self) -> Option<&Handbook> {
        self.handbook.as_ref()
    }

    /// PDF bytes of the last successful render.
    pub fn output(&self) -> Option<&[u8]> {
        self.output.as_deref()
    }

    fn invalid(&self, action: &str) -> HandbookError {
        HandbookError::InvalidState {
            action: action.to_string(),
            state: self.state.to_string(),
        }
    }

    fn fail(&mut self, stage: Stage, err: HandbookError) -> HandbookError {
        error!(stage = %stage, error = %err, "[RUN][ERROR] Stage failed");
        self.state = RunState::Failed(stage);
        err
    }

    /// Retrieves the documents. An empty result is a `NotFound` naming the
    /// filter, and like every fetch failure it ends the run.
    #[instrument(skip_all, fields(repository = %self.request.repository))]
    pub async fn fetch(&mut self, fetcher: &dyn Fetcher) -> Result<&DocumentSet> {
        if self.state != RunState::Fetching {
            return Err(self.invalid("fetch"));
        }
        info!("[RUN] Fetching documents");
        let set = match fetcher.fetch(&self.request).await {
            Ok(set) => set,
            Err(e) => return Err(self.fail(Stage::Fetch, e)),
        };
        if set.is_empty() {
            let filter = match &self.request.filter {
                PathFilter::AllMarkdown => "no markdown files".to_string(),
                PathFilter::Globs(globs) => format!("no markdown files matching {}", globs.join(", ")),
            };
            let err = HandbookError::not_found(self.request.repository.to_string(), Some(filter));
            return Err(self.fail(Stage::Fetch, err));
        }
        info!(run_id = %set.run_id(), documents = set.len(), "[RUN] Fetch succeeded");
        self.state = RunState::Organizing;
        self.organize_input = Some(set.clone());
        Ok(&*self.documents.insert(set))
    }

    /// Summarizes and orders the documents and opens the preview. Allowed
    /// right after the fetch and again after a failed organize.
    #[instrument(skip_all, fields(repository = %self.request.repository))]
    pub async fn organize(
        &mut self,
        organizer: &dyn Organizer,
        options: &OrganizeOptions,
    ) -> Result<&PreviewSession> {
        if !matches!(
            self.state,
            RunState::Organizing | RunState::Failed(Stage::Organize)
        ) {
            return Err(self.invalid("organize"));
        }
        let Some(input) = self.organize_input.clone() else {
            return Err(self.invalid("organize"));
        };
        self.state = RunState::Organizing;
        info!(documents = input.len(), "[RUN] Organizing documents");

        let organized = match organizer.organize(&input, options).await {
            Ok(organized) => organized,
            Err(e) => return Err(self.fail(Stage::Organize, e)),
        };
        if !organized.failures.is_empty() {
            warn!(
                failed = ?organized.failed_paths(),
                "[RUN] Some documents could not be summarized"
            );
        }
        let session = match PreviewSession::new(input, organized) {
            Ok(session) => session,
            Err(e) => return Err(self.fail(Stage::Organize, e)),
        };
        info!(sections = session.drafts().len(), "[RUN] Preview ready");
        self.state = RunState::Previewing;
        Ok(&*self.preview.insert(session))
    }

    pub fn preview(&self) -> Result<&PreviewSession> {
        match (&self.state, &self.preview) {
            (RunState::Previewing, Some(session)) => Ok(session),
            _ => Err(self.invalid("view the preview")),
        }
    }

    pub fn preview_mut(&mut self) -> Result<&mut PreviewSession> {
        if self.state != RunState::Previewing {
            return Err(self.invalid("edit the preview"));
        }
        let state = self.state.to_string();
        self.preview.as_mut().ok_or(HandbookError::InvalidState {
            action: "edit the preview".into(),
            state,
        })
    }

    /// Re-runs the organizer over the documents behind the included sections,
    /// possibly with new options. Edits made in the current preview are lost.
    pub async fn regenerate(
        &mut self,
        organizer: &dyn Organizer,
        options: &OrganizeOptions,
    ) -> Result<&PreviewSession> {
        let paths = self.preview()?.included_paths();
        if paths.is_empty() {
            return Err(HandbookError::validation(
                Stage::Preview,
                "nothing to regenerate: every section is excluded",
            ));
        }
        let Some(documents) = &self.documents else {
            return Err(self.invalid("regenerate"));
        };
        let subset = documents.restricted_to(paths.iter().map(String::as_str));
        info!(documents = subset.len(), "[RUN] Regenerating from included documents");
        self.organize_input = Some(subset);
        self.preview = None;
        self.state = RunState::Organizing;
        self.organize(organizer, options).await
    }

    /// Freezes the preview (if not frozen yet) and renders it. After a failed
    /// render, calling this again reuses the same handbook.
    #[instrument(skip_all, fields(repository = %self.request.repository))]
    pub async fn render(
        &mut self,
        renderer: &dyn Renderer,
        options: &RenderOptions,
        generated_at: DateTime<Utc>,
    ) -> Result<&[u8]> {
        match self.state {
            RunState::Previewing => {
                let handbook = self.preview()?.finalize(generated_at)?;
                info!(
                    sections = handbook.sections().len(),
                    digest = %handbook.content_digest(),
                    "[RUN] Handbook frozen"
                );
                self.handbook = Some(handbook);
            }
            RunState::Failed(Stage::Render) => {
                info!("[RUN] Retrying render with the frozen handbook");
            }
            _ => return Err(self.invalid("render")),
        }
        let Some(handbook) = self.handbook.as_ref() else {
            return Err(self.invalid("render"));
        };
        self.state = RunState::Rendering;

        match renderer.render(handbook, options).await {
            Ok(bytes) => {
                info!(bytes = bytes.len(), "[RUN] Render succeeded");
                self.state = RunState::Done;
                Ok(self.output.insert(bytes).as_slice())
            }
            Err(e) => Err(self.fail(Stage::Render, e)),
        }
    }

    /// Back to the preview from `Done` or a failed render. The frozen
    /// handbook and any output are discarded; edits in the preview survive.
    pub fn reopen_preview(&mut self) -> Result<()> {
        if !matches!(self.state, RunState::Done | RunState::Failed(Stage::Render)) {
            return Err(self.invalid("reopen the preview"));
        }
        if self.preview.is_none() {
            return Err(self.invalid("reopen the preview"));
        }
        self.handbook = None;
        self.output = None;
        self.state = RunState::Previewing;
        info!("[RUN] Preview reopened");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{MockFetcher, MockOrganizer, MockRenderer, Organized};
    use crate::model::{Document, RepositoryLocator, Section, SectionId};

    fn request() -> FetchRequest {
        FetchRequest {
            repository: "octo/docs".into(),
            reference: None,
            filter: PathFilter::AllMarkdown,
        }
    }

    fn set(paths: &[&str]) -> DocumentSet {
        let docs = paths
            .iter()
            .map(|p| Document {
                path: p.to_string(),
                raw_text: format!("# {p}"),
                source_repository: "octo/docs".into(),
            })
            .collect();
        DocumentSet::new(RepositoryLocator::parse("octo/docs").unwrap(), "main", docs, vec![])
            .unwrap()
    }

    fn organized_for(documents: &DocumentSet) -> Organized {
        Organized {
            sections: documents
                .iter()
                .enumerate()
                .map(|(i, d)| Section {
                    id: SectionId::new(),
                    title: d.path.clone(),
                    summary_text: "summary".into(),
                    source_document_refs: vec![documents.id_of(d)],
                    order_index: i,
                })
                .collect(),
            failures: vec![],
        }
    }

    fn echo_organizer() -> MockOrganizer {
        let mut organizer = MockOrganizer::new();
        organizer
            .expect_organize()
            .returning(|docs, _| Ok(organized_for(docs)));
        organizer
    }

    async fn previewing_run(paths: &[&str]) -> GenerationRun {
        let documents = set(paths);
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .returning(move |_| Ok(documents.clone()));
        let mut run = GenerationRun::new(request());
        run.fetch(&fetcher).await.unwrap();
        run.organize(&echo_organizer(), &OrganizeOptions::default())
            .await
            .unwrap();
        run
    }

    #[tokio::test]
    async fn empty_fetch_is_not_found_and_terminal() {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().returning(|_| Ok(set(&[])));
        let mut run = GenerationRun::new(request());

        let err = run.fetch(&fetcher).await.unwrap_err();
        assert!(matches!(err, HandbookError::NotFound { .. }));
        assert_eq!(run.state(), RunState::Failed(Stage::Fetch));

        let err = run
            .organize(&MockOrganizer::new(), &OrganizeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HandbookError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn failed_organize_can_be_retried() {
        let documents = set(&["README.md"]);
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .returning(move |_| Ok(documents.clone()));
        let mut run = GenerationRun::new(request());
        run.fetch(&fetcher).await.unwrap();

        let mut failing = MockOrganizer::new();
        failing.expect_organize().returning(|_, _| {
            Err(HandbookError::Summarization {
                repository: "octo/docs".into(),
                message: "service unavailable".into(),
                failed_paths: vec!["README.md".into()],
            })
        });
        assert!(run
            .organize(&failing, &OrganizeOptions::default())
            .await
            .is_err());
        assert_eq!(run.state(), RunState::Failed(Stage::Organize));

        run.organize(&echo_organizer(), &OrganizeOptions::default())
            .await
            .unwrap();
        assert_eq!(run.state(), RunState::Previewing);
    }

    #[tokio::test]
    async fn render_retry_reuses_frozen_handbook() {
        let mut run = previewing_run(&["A.md", "B.md"]).await;

        let mut failing = MockRenderer::new();
        failing.expect_render().times(1).returning(|hb, _| {
            Err(HandbookError::Render {
                repository: hb.metadata().repository.clone(),
                status: 500,
                body: "boom".into(),
            })
        });
        let err = run
            .render(&failing, &RenderOptions::default(), Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_retryable_stage());
        assert_eq!(run.state(), RunState::Failed(Stage::Render));
        let frozen = run.handbook().cloned().unwrap();

        let mut working = MockRenderer::new();
        let expected = frozen.clone();
        working
            .expect_render()
            .withf(move |hb, _| *hb == expected)
            .times(1)
            .returning(|_, _| Ok(b"%PDF-1.7".to_vec()));
        run.render(&working, &RenderOptions::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(run.state(), RunState::Done);
        assert_eq!(run.output(), Some(&b"%PDF-1.7"[..]));
    }

    #[tokio::test]
    async fn reopen_discards_handbook_and_keeps_edits() {
        let mut run = previewing_run(&["A.md", "B.md"]).await;
        let b = run.preview().unwrap().drafts()[1].section.id;
        run.preview_mut().unwrap().reorder(b, 0).unwrap();

        let mut renderer = MockRenderer::new();
        renderer
            .expect_render()
            .returning(|_, _| Ok(b"%PDF".to_vec()));
        run.render(&renderer, &RenderOptions::default(), Utc::now())
            .await
            .unwrap();
        assert!(run.preview_mut().is_err());

        run.reopen_preview().unwrap();
        assert!(run.handbook().is_none());
        assert!(run.output().is_none());
        assert_eq!(run.preview().unwrap().drafts()[0].section.id, b);
        assert!(run.reopen_preview().is_err());
    }

    #[tokio::test]
    async fn regenerate_uses_included_documents_only() {
        let mut run = previewing_run(&["A.md", "B.md", "C.md"]).await;
        let b = run.preview().unwrap().drafts()[1].section.id;
        run.preview_mut().unwrap().toggle_include(b, false).unwrap();
        let run_id = run.run_id();

        let mut organizer = MockOrganizer::new();
        organizer
            .expect_organize()
            .withf(|docs, options| {
                docs.paths() == vec!["A.md", "C.md"] && options.sentences == 2
            })
            .times(1)
            .returning(|docs, _| Ok(organized_for(docs)));
        let options = OrganizeOptions {
            sentences: 2,
            ..OrganizeOptions::default()
        };
        let session = run.regenerate(&organizer, &options).await.unwrap();
        assert_eq!(session.drafts().len(), 2);
        assert_eq!(session.documents().run_id(), run_id.unwrap());
    }
}
