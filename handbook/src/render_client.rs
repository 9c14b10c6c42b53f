//! Client for the HTML-to-PDF rendering service.
//!
//! [`HttpRenderer`] turns the handbook into markup with
//! [`handbook_core::markup::handbook_html`] and posts it as
//! `{"Html": ..., "FileName": ...}`. The response body is the PDF.

use async_trait::async_trait;
use handbook_core::contract::{RenderOptions, Renderer};
use handbook_core::markup::handbook_html;
use handbook_core::model::Handbook;
use handbook_core::{HandbookError, Result, Stage};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, instrument};

pub struct HttpRenderer {
    client: Client,
    service_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RenderPayload<'a> {
    html: &'a str,
    file_name: &'a str,
}

impl HttpRenderer {
    pub fn new(service_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HandbookError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            service_url: service_url.into(),
        })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    #[instrument(skip_all, fields(service = %self.service_url))]
    async fn render(&self, handbook: &Handbook, options: &RenderOptions) -> Result<Vec<u8>> {
        let html = handbook_html(handbook, options);
        let repository = handbook.metadata().repository.clone();
        info!(html_bytes = html.len(), file_name = %options.file_name, "Posting handbook to rendering service");

        let response = self
            .client
            .post(&self.service_url)
            .json(&RenderPayload {
                html: &html,
                file_name: &options.file_name,
            })
            .send()
            .await
            .map_err(|e| {
                error!(error = ?e, "Rendering service unreachable");
                HandbookError::transport(Stage::Render, &self.service_url, e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, "Rendering service rejected the handbook");
            return Err(HandbookError::Render {
                repository,
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| HandbookError::transport(Stage::Render, &self.service_url, e))?;
        info!(pdf_bytes = bytes.len(), "Rendering service returned the PDF");
        Ok(bytes.to_vec())
    }
}
