use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use handbook::preview_server::{create_router, AppState, PreviewContext};
use handbook_core::contract::{
    FetchRequest, MockFetcher, MockOrganizer, MockRenderer, OrganizeOptions, Organized,
    PathFilter, RenderOptions, SummaryStyle,
};
use handbook_core::model::{Document, DocumentSet, RepositoryLocator, Section, SectionId};
use handbook_core::pipeline::GenerationRun;
use handbook_core::HandbookError;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt; // for oneshot

fn documents() -> DocumentSet {
    let docs = ["README.md", "SETUP.md", "API.md"]
        .iter()
        .map(|p| Document {
            path: p.to_string(),
            raw_text: format!("# {p}"),
            source_repository: "octo/docs".into(),
        })
        .collect();
    DocumentSet::new(RepositoryLocator::parse("octo/docs").unwrap(), "main", docs, vec![]).unwrap()
}

fn sections_in_path_order(docs: &DocumentSet) -> Organized {
    Organized {
        sections: docs
            .iter()
            .enumerate()
            .map(|(i, d)| Section {
                id: SectionId::new(),
                title: d.path.trim_end_matches(".md").to_string(),
                summary_text: format!("About {}.", d.path),
                source_document_refs: vec![docs.id_of(d)],
                order_index: i,
            })
            .collect(),
        failures: vec![],
    }
}

fn path_order_organizer() -> MockOrganizer {
    let mut organizer = MockOrganizer::new();
    organizer
        .expect_organize()
        .returning(|docs, _| Ok(sections_in_path_order(docs)));
    organizer
}

async fn app(renderer: MockRenderer) -> Router {
    app_with(path_order_organizer(), renderer, OrganizeOptions::default()).await
}

async fn app_with(
    organizer: MockOrganizer,
    renderer: MockRenderer,
    organize_options: OrganizeOptions,
) -> Router {
    let set = documents();
    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().returning(move |_| Ok(set.clone()));

    let mut run = GenerationRun::new(FetchRequest {
        repository: "octo/docs".into(),
        reference: None,
        filter: PathFilter::AllMarkdown,
    });
    run.fetch(&fetcher).await.unwrap();
    run.organize(&organizer, &organize_options).await.unwrap();

    create_router(AppState::new(PreviewContext {
        run,
        organizer: Arc::new(organizer),
        renderer: Arc::new(renderer),
        organize_options,
        render_options: RenderOptions::default(),
    }))
}

async fn page(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

async fn json_response(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    serde_json::from_slice(&body).expect("Failed to parse JSON")
}

async fn sections(app: &Router) -> Value {
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/sections").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    json_response(response).await
}

fn post_form(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn titles(view: &Value) -> Vec<String> {
    view["sections"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["section"]["title"].as_str().unwrap().to_string())
        .collect()
}

fn id_of(view: &Value, title: &str) -> String {
    view["sections"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["section"]["title"] == title)
        .map(|d| d["section"]["id"].as_str().unwrap().to_string())
        .unwrap()
}

#[tokio::test]
async fn health_check() {
    let app = app(MockRenderer::new()).await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_response(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn move_edit_and_exclude_apply_immediately() {
    let app = app(MockRenderer::new()).await;
    let view = sections(&app).await;
    assert_eq!(view["state"], "previewing");
    assert_eq!(titles(&view), vec!["API", "README", "SETUP"]);

    let setup = id_of(&view, "SETUP");
    let response = app
        .clone()
        .oneshot(post_form(&format!("/sections/{setup}/move"), "index=0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let api = id_of(&view, "API");
    app.clone()
        .oneshot(post_form(&format!("/sections/{api}/text"), "text=Endpoints+and+auth."))
        .await
        .unwrap();
    app.clone()
        .oneshot(post_form(&format!("/sections/{api}/include"), "include=false"))
        .await
        .unwrap();

    let view = sections(&app).await;
    assert_eq!(titles(&view), vec!["SETUP", "API", "README"]);
    let api_entry = &view["sections"][1];
    assert_eq!(api_entry["section"]["summary_text"], "Endpoints and auth.");
    assert_eq!(api_entry["included"], false);
    let indices: Vec<u64> = view["sections"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["section"]["order_index"].as_u64().unwrap())
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[tokio::test]
async fn invalid_edits_are_rejected_with_client_errors() {
    let app = app(MockRenderer::new()).await;
    let view = sections(&app).await;
    let readme = id_of(&view, "README");

    let response = app
        .clone()
        .oneshot(post_form(&format!("/sections/{readme}/move"), "index=7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_response(response).await;
    assert_eq!(body["stage"], "preview");

    let response = app
        .clone()
        .oneshot(post_form("/sections/not-a-uuid/move", "index=0"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/handbook.pdf").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn generate_then_download_and_reopen() {
    let mut renderer = MockRenderer::new();
    renderer
        .expect_render()
        .withf(|hb, _| hb.sections().len() == 3)
        .times(1)
        .returning(|_, _| Ok(b"%PDF-1.7 test".to_vec()));
    let app = app(renderer).await;

    let markup = app
        .clone()
        .oneshot(Request::builder().uri("/handbook.html").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(markup.status(), StatusCode::OK);

    let response = app.clone().oneshot(post_form("/generate", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(sections(&app).await["state"], "done");

    let pdf = app
        .clone()
        .oneshot(Request::builder().uri("/handbook.pdf").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(pdf.status(), StatusCode::OK);
    assert_eq!(pdf.headers()[header::CONTENT_TYPE], "application/pdf");
    let bytes = axum::body::to_bytes(pdf.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"%PDF-1.7 test");

    let edit_after_done = app
        .clone()
        .oneshot(post_form("/regenerate", ""))
        .await
        .unwrap();
    assert_eq!(edit_after_done.status(), StatusCode::CONFLICT);

    app.clone().oneshot(post_form("/reopen", "")).await.unwrap();
    assert_eq!(sections(&app).await["state"], "previewing");
}

#[tokio::test]
async fn failed_render_is_reported_as_bad_gateway() {
    let mut renderer = MockRenderer::new();
    renderer.expect_render().returning(|hb, _| {
        Err(HandbookError::Render {
            repository: hb.metadata().repository.clone(),
            status: 500,
            body: "converter crashed".into(),
        })
    });
    let app = app(renderer).await;

    let response = app.clone().oneshot(post_form("/generate", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_response(response).await;
    assert_eq!(body["stage"], "render");
    assert!(body["error"].as_str().unwrap().contains("converter crashed"));
    assert_eq!(sections(&app).await["state"], "failed during render");
}

#[tokio::test]
async fn failed_regenerate_can_be_retried_from_the_page() {
    // Calls: initial organize succeeds, regenerate fails, retry succeeds.
    let calls = Arc::new(AtomicUsize::new(0));
    let mut organizer = MockOrganizer::new();
    let counter = calls.clone();
    organizer.expect_organize().returning(move |docs, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(HandbookError::Summarization {
                repository: "octo/docs".into(),
                message: "model overloaded".into(),
                failed_paths: docs.paths(),
            });
        }
        Ok(sections_in_path_order(docs))
    });
    let app = app_with(organizer, MockRenderer::new(), OrganizeOptions::default()).await;

    let response = app.clone().oneshot(post_form("/regenerate", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(sections(&app).await["state"], "failed during organize");
    assert!(page(&app).await.contains("action=\"/organize\""));

    let response = app.clone().oneshot(post_form("/generate", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.clone().oneshot(post_form("/organize", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let view = sections(&app).await;
    assert_eq!(view["state"], "previewing");
    assert_eq!(titles(&view), vec!["API", "README", "SETUP"]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn organize_retry_is_rejected_while_previewing() {
    let app = app(MockRenderer::new()).await;
    let response = app.clone().oneshot(post_form("/organize", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn regenerate_form_keeps_the_configured_style() {
    let options = OrganizeOptions {
        style: SummaryStyle::Detailed,
        sentences: 8,
        ..OrganizeOptions::default()
    };
    let app = app_with(path_order_organizer(), MockRenderer::new(), options).await;

    let html = page(&app).await;
    assert!(html.contains("<option value=\"detailed\" selected>"));
    assert!(html.contains("<option value=\"concise\">"));
    assert!(html.contains("name=\"sentences\" min=\"1\" value=\"8\""));
}
