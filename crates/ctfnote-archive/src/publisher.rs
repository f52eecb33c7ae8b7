use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::exporter::RenderedMessage;
use crate::render::{char_len, document_heading, pack_blocks, render_blocks};

/// HedgeDoc's default `documentMaxLength`.
pub const DEFAULT_MAX_DOCUMENT_CHARS: usize = 100_000;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("document service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("document service returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("document service did not return the created document location")]
    MissingLocation,
    #[error("invalid document url '{0}'")]
    InvalidUrl(String),
    #[error("document '{title}' has {chars} characters, service limit is {limit}")]
    TooLarge {
        title: String,
        chars: usize,
        limit: usize,
    },
}

/// A pad service that stores markdown documents and hands back their URL.
#[async_trait]
pub trait DocumentService: Send + Sync {
    fn max_document_chars(&self) -> usize;
    async fn create_document(&self, title: &str, content: &str) -> Result<String, PublishError>;
}

#[derive(Debug, Clone)]
pub struct HedgedocConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub max_document_chars: usize,
}

/// Creates notes through HedgeDoc's `POST /new`, which answers with a
/// redirect to the created note.
pub struct HedgedocClient {
    http: reqwest::Client,
    base_url: reqwest::Url,
    max_document_chars: usize,
}

impl HedgedocClient {
    pub fn new(config: &HedgedocConfig) -> Result<Self, PublishError> {
        let trimmed = config.base_url.trim().trim_end_matches('/');
        let base_url = reqwest::Url::parse(&format!("{trimmed}/"))
            .map_err(|_| PublishError::InvalidUrl(config.base_url.clone()))?;
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            http,
            base_url,
            max_document_chars: config.max_document_chars.max(1),
        })
    }
}

#[async_trait]
impl DocumentService for HedgedocClient {
    fn max_document_chars(&self) -> usize {
        self.max_document_chars
    }

    async fn create_document(&self, title: &str, content: &str) -> Result<String, PublishError> {
        let endpoint = self
            .base_url
            .join("new")
            .map_err(|_| PublishError::InvalidUrl(self.base_url.to_string()))?;
        let response = self
            .http
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/markdown")
            .body(content.to_string())
            .send()
            .await?;

        let status = response.status();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        if !(status.is_redirection() || status.is_success()) {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Api {
                status: status.as_u16(),
                body: body.chars().take(400).collect(),
            });
        }

        let location = location.ok_or(PublishError::MissingLocation)?;
        let url = self
            .base_url
            .join(&location)
            .map_err(|_| PublishError::InvalidUrl(location.clone()))?;
        tracing::info!(title, url = %url, chars = char_len(content), "created pad");
        Ok(url.to_string())
    }
}

/// Turns exported messages into one or more pads and returns the entry URL.
#[derive(Clone)]
pub struct ArchivePublisher {
    service: Arc<dyn DocumentService>,
}

impl ArchivePublisher {
    pub fn new(service: Arc<dyn DocumentService>) -> Self {
        Self { service }
    }

    pub async fn publish(
        &self,
        messages: &[RenderedMessage],
        title: &str,
    ) -> Result<String, PublishError> {
        let limit = self.service.max_document_chars();
        let reserve = char_len(&document_heading(&format!("{title} (99999/99999)")));
        let budget = limit.saturating_sub(reserve).max(1);
        let bodies = pack_blocks(&render_blocks(messages), budget);

        if let [body] = bodies.as_slice() {
            let content = format!("{}{body}", document_heading(title));
            return self.service.create_document(title, &content).await;
        }

        let total = bodies.len();
        let mut index = document_heading(title);
        for (position, body) in bodies.iter().enumerate() {
            let part_title = format!("{title} ({}/{total})", position + 1);
            let content = format!("{}{body}", document_heading(&part_title));
            let url = self.service.create_document(&part_title, &content).await?;
            index.push_str(&format!("- [{part_title}]({url})\n"));
        }
        tracing::info!(title, parts = total, "archive split across several pads");

        if char_len(&index) > limit {
            return Err(PublishError::TooLarge {
                title: title.to_string(),
                chars: char_len(&index),
                limit,
            });
        }
        self.service.create_document(title, &index).await
    }
}
