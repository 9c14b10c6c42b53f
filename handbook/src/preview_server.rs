//! Web preview: the human review step of a run, served over HTTP.
//!
//! The server holds exactly one [`GenerationRun`] behind a mutex. Every edit is applied
//! immediately and the page is re-rendered from the run, so a reload always shows the
//! current state.
//!
//! Routes:
//! - `GET /`: sections in order, with a form per operation
//! - `GET /health`
//! - `GET /api/sections`: JSON view of the run
//! - `POST /sections/:id/move|text|title|include`
//! - `POST /regenerate`, `POST /generate`, `POST /reopen`
//! - `POST /organize`: retry after a failed organize or regenerate
//! - `GET /handbook.html`: markup the renderer would receive
//! - `GET /handbook.pdf`: the rendered PDF once the run is done

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use chrono::Utc;
use handbook_core::contract::{OrganizeOptions, Organizer, RenderOptions, Renderer, SummaryStyle};
use handbook_core::markup::{escape, handbook_html};
use handbook_core::model::SectionId;
use handbook_core::pipeline::{GenerationRun, RunState};
use handbook_core::{HandbookError, Stage};
use serde::Deserialize;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Everything the preview needs to drive the run.
pub struct PreviewContext {
    pub run: GenerationRun,
    pub organizer: Arc<dyn Organizer>,
    pub renderer: Arc<dyn Renderer>,
    pub organize_options: OrganizeOptions,
    pub render_options: RenderOptions,
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<Mutex<PreviewContext>>,
}

impl AppState {
    pub fn new(context: PreviewContext) -> Self {
        Self {
            inner: Arc::new(Mutex::new(context)),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/api/sections", get(sections_json))
        .route("/sections/:id/move", post(move_section))
        .route("/sections/:id/text", post(edit_text))
        .route("/sections/:id/title", post(edit_title))
        .route("/sections/:id/include", post(toggle_include))
        .route("/regenerate", post(regenerate))
        .route("/organize", post(retry_organize))
        .route("/generate", post(generate))
        .route("/reopen", post(reopen))
        .route("/handbook.html", get(handbook_markup))
        .route("/handbook.pdf", get(download_pdf))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `addr` and serves the preview until the process is stopped.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Preview server listening");
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn sections_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ctx = state.inner.lock().await;
    let run = &ctx.run;
    let (sections, failures) = match run.preview() {
        Ok(session) => (
            serde_json::to_value(session.drafts()).unwrap_or_default(),
            serde_json::to_value(session.failures()).unwrap_or_default(),
        ),
        Err(_) => (
            serde_json::to_value(run.handbook().map(|h| h.sections()).unwrap_or_default())
                .unwrap_or_default(),
            serde_json::Value::Array(Vec::new()),
        ),
    };
    Json(serde_json::json!({
        "repository": run.request().repository.to_string(),
        "state": run.state().to_string(),
        "sections": sections,
        "failures": failures,
    }))
}

#[derive(Debug, Deserialize)]
struct MoveForm {
    index: usize,
}

async fn move_section(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<MoveForm>,
) -> Result<Redirect, AppError> {
    let id = parse_id(&id)?;
    let mut ctx = state.inner.lock().await;
    ctx.run.preview_mut()?.reorder(id, form.index)?;
    Ok(Redirect::to("/"))
}

#[derive(Debug, Deserialize)]
struct TextForm {
    text: String,
}

async fn edit_text(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<TextForm>,
) -> Result<Redirect, AppError> {
    let id = parse_id(&id)?;
    let mut ctx = state.inner.lock().await;
    ctx.run.preview_mut()?.edit_text(id, form.text)?;
    Ok(Redirect::to("/"))
}

#[derive(Debug, Deserialize)]
struct TitleForm {
    title: String,
}

async fn edit_title(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<TitleForm>,
) -> Result<Redirect, AppError> {
    let id = parse_id(&id)?;
    let mut ctx = state.inner.lock().await;
    ctx.run.preview_mut()?.edit_title(id, form.title)?;
    Ok(Redirect::to("/"))
}

#[derive(Debug, Deserialize)]
struct IncludeForm {
    include: bool,
}

async fn toggle_include(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<IncludeForm>,
) -> Result<Redirect, AppError> {
    let id = parse_id(&id)?;
    let mut ctx = state.inner.lock().await;
    ctx.run.preview_mut()?.toggle_include(id, form.include)?;
    Ok(Redirect::to("/"))
}

#[derive(Debug, Deserialize)]
struct RegenerateForm {
    style: Option<SummaryStyle>,
    sentences: Option<u32>,
}

async fn regenerate(
    State(state): State<AppState>,
    Form(form): Form<RegenerateForm>,
) -> Result<Redirect, AppError> {
    let mut guard = state.inner.lock().await;
    let ctx = &mut *guard;
    if let Some(style) = form.style {
        ctx.organize_options.style = style;
    }
    if let Some(sentences) = form.sentences.filter(|s| *s > 0) {
        ctx.organize_options.sentences = sentences;
    }
    ctx.run
        .regenerate(ctx.organizer.as_ref(), &ctx.organize_options)
        .await?;
    Ok(Redirect::to("/"))
}

/// Runs the organizer again with the current options. Only valid after the
/// organize stage failed.
async fn retry_organize(State(state): State<AppState>) -> Result<Redirect, AppError> {
    let mut guard = state.inner.lock().await;
    let ctx = &mut *guard;
    ctx.run
        .organize(ctx.organizer.as_ref(), &ctx.organize_options)
        .await?;
    Ok(Redirect::to("/"))
}

async fn generate(State(state): State<AppState>) -> Result<Redirect, AppError> {
    let mut guard = state.inner.lock().await;
    let ctx = &mut *guard;
    ctx.run
        .render(ctx.renderer.as_ref(), &ctx.render_options, Utc::now())
        .await?;
    Ok(Redirect::to("/"))
}

async fn reopen(State(state): State<AppState>) -> Result<Redirect, AppError> {
    state.inner.lock().await.run.reopen_preview()?;
    Ok(Redirect::to("/"))
}

async fn handbook_markup(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let ctx = state.inner.lock().await;
    let html = match ctx.run.handbook() {
        Some(frozen) => handbook_html(frozen, &ctx.render_options),
        None => {
            let draft = ctx.run.preview()?.finalize(Utc::now())?;
            handbook_html(&draft, &ctx.render_options)
        }
    };
    Ok(Html(html))
}

async fn download_pdf(State(state): State<AppState>) -> Result<Response, AppError> {
    let ctx = state.inner.lock().await;
    let Some(bytes) = ctx.run.output() else {
        return Err(AppError::NotReady(format!(
            "no PDF yet; the run is {}",
            ctx.run.state()
        )));
    };
    let disposition = format!(
        "attachment; filename=\"{}\"",
        ctx.render_options.file_name.replace('"', "")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes.to_vec(),
    )
        .into_response())
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let ctx = state.inner.lock().await;
    Html(render_page(&ctx))
}

fn parse_id(raw: &str) -> Result<SectionId, AppError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("invalid section id {raw:?}")))
}

// ============================================================================
// Page
// ============================================================================

fn render_page(ctx: &PreviewContext) -> String {
    let run = &ctx.run;
    let mut page = String::with_capacity(8 * 1024);
    let _ = write!(
        page,
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Handbook preview</title>\
         <style>body{{font-family:sans-serif;max-width:960px;margin:2em auto}}\
         .section{{border:1px solid #ddd;padding:1em;margin:1em 0}}.excluded{{opacity:.5}}\
         textarea{{width:100%;min-height:8em}}form{{margin:.4em 0}}</style></head><body>\
         <h1>{}</h1><p>State: <strong>{}</strong></p>",
        escape(&run.request().repository.to_string()),
        escape(&run.state().to_string())
    );

    match run.state() {
        RunState::Previewing => {
            if let Ok(session) = run.preview() {
                if !session.failures().is_empty() {
                    page.push_str("<h2>Documents without a section</h2><ul>");
                    for failure in session.failures() {
                        let _ = write!(
                            page,
                            "<li><code>{}</code>: {}</li>",
                            escape(&failure.path),
                            escape(&failure.reason)
                        );
                    }
                    page.push_str("</ul>");
                }
                for draft in session.drafts() {
                    let s = &draft.section;
                    let sources: Vec<String> = s
                        .source_document_refs
                        .iter()
                        .map(|r| escape(&r.path))
                        .collect();
                    let _ = write!(
                        page,
                        "<div class=\"section{excluded}\" id=\"{id}\">\
                         <h2>{pos}. {title}</h2><p><small>{sources}</small></p>\
                         <form method=\"post\" action=\"/sections/{id}/title\"><input name=\"title\" value=\"{title}\"><button>Rename</button></form>\
                         <form method=\"post\" action=\"/sections/{id}/text\"><textarea name=\"text\">{text}</textarea><button>Save text</button></form>\
                         <form method=\"post\" action=\"/sections/{id}/move\"><input type=\"number\" name=\"index\" min=\"0\" value=\"{index}\"><button>Move</button></form>\
                         <form method=\"post\" action=\"/sections/{id}/include\"><input type=\"hidden\" name=\"include\" value=\"{toggle}\"><button>{toggle_label}</button></form>\
                         </div>",
                        excluded = if draft.included { "" } else { " excluded" },
                        id = s.id,
                        pos = s.order_index + 1,
                        title = escape(&s.title),
                        sources = sources.join(", "),
                        text = escape(&s.summary_text),
                        index = s.order_index,
                        toggle = !draft.included,
                        toggle_label = if draft.included { "Exclude" } else { "Include" },
                    );
                }
            }
            let selected = |style: SummaryStyle| {
                if ctx.organize_options.style == style {
                    " selected"
                } else {
                    ""
                }
            };
            let _ = write!(
                page,
                "<form method=\"post\" action=\"/regenerate\">\
                 <select name=\"style\"><option value=\"concise\"{concise}>concise</option><option value=\"detailed\"{detailed}>detailed</option></select>\
                 <input type=\"number\" name=\"sentences\" min=\"1\" value=\"{sentences}\"><button>Regenerate</button></form>\
                 <p><a href=\"/handbook.html\">Preview markup</a></p>\
                 <form method=\"post\" action=\"/generate\"><button>Generate PDF</button></form>",
                concise = selected(SummaryStyle::Concise),
                detailed = selected(SummaryStyle::Detailed),
                sentences = ctx.organize_options.sentences,
            );
        }
        RunState::Failed(Stage::Organize) => {
            page.push_str(
                "<p>Summarizing or ordering the documents failed. Retry to run the organizer again.</p>\
                 <form method=\"post\" action=\"/organize\"><button>Retry</button></form>",
            );
        }
        RunState::Done => {
            page.push_str(
                "<p><a href=\"/handbook.pdf\">Download PDF</a> | <a href=\"/handbook.html\">Markup</a></p>\
                 <form method=\"post\" action=\"/reopen\"><button>Back to preview</button></form>",
            );
        }
        RunState::Failed(Stage::Render) => {
            page.push_str(
                "<p>Rendering failed. Retry with the same handbook or go back to the preview.</p>\
                 <form method=\"post\" action=\"/generate\"><button>Retry</button></form>\
                 <form method=\"post\" action=\"/reopen\"><button>Back to preview</button></form>",
            );
        }
        _ => {}
    }
    page.push_str("</body></html>");
    page
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Handbook(HandbookError),
    BadRequest(String),
    NotReady(String),
}

impl From<HandbookError> for AppError {
    fn from(err: HandbookError) -> Self {
        AppError::Handbook(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, stage) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::NotReady(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::Handbook(err) => {
                let status = match &err {
                    HandbookError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    HandbookError::InvalidState { .. } => StatusCode::CONFLICT,
                    HandbookError::NotFound { .. } => StatusCode::NOT_FOUND,
                    HandbookError::Auth { .. }
                    | HandbookError::Summarization { .. }
                    | HandbookError::Render { .. }
                    | HandbookError::Transport { .. } => StatusCode::BAD_GATEWAY,
                    HandbookError::Config { .. } | HandbookError::Io { .. } => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                if status.is_server_error() {
                    error!(error = %err, "Preview request failed");
                }
                (status, err.to_string(), err.stage())
            }
        };

        let body = Json(serde_json::json!({
            "error": message,
            "stage": stage,
        }));
        (status, body).into_response()
    }
}
