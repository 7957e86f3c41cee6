use futures::StreamExt;
use log::{debug, info};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use thiserror::Error;

use crate::stream::{DataStreamDecoder, DecodeError, StreamPart};
use crate::web::models::ChatRequest;

pub mod session;

pub use session::{Phase, Session, SessionError, UploadedDocument, View};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed reply stream: {0}")]
    Stream(#[from] DecodeError),
    #[error("reply stream reported an error: {0}")]
    Remote(String),
}

/// HTTP client for the analyzer endpoints.
pub struct AnalyzerClient {
    base_url: String,
    client: Client,
}

impl AnalyzerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(ClientError::Status { status, message })
    }

    /// Uploads the document and returns the summary text.
    pub async fn analyze(&self, document: &UploadedDocument) -> Result<String, ClientError> {
        info!("Uploading {} ({} bytes)", document.name, document.content.len());
        let part = Part::bytes(document.content.clone())
            .file_name(document.name.clone())
            .mime_str(&document.media_type)?;
        let form = Form::new().part("pdf", part);

        let response = self
            .client
            .post(format!("{}/api/analyze", self.base_url))
            .multipart(form)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.text().await?)
    }

    /// Sends the conversation and feeds reply text to `on_delta` as it arrives.
    /// Returns the full reply. Text delivered before a failure has already been
    /// passed to `on_delta`.
    pub async fn chat<F>(&self, request: &ChatRequest, mut on_delta: F) -> Result<String, ClientError>
    where
        F: FnMut(&str),
    {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(request)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let mut reply = String::new();
        let mut decoder = DataStreamDecoder::default();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            for part in decoder.push(&chunk?)? {
                apply_part(part, &mut reply, &mut on_delta)?;
            }
        }
        if let Some(part) = decoder.finish()? {
            apply_part(part, &mut reply, &mut on_delta)?;
        }

        Ok(reply)
    }
}

fn apply_part<F>(part: StreamPart, reply: &mut String, on_delta: &mut F) -> Result<(), ClientError>
where
    F: FnMut(&str),
{
    match part {
        StreamPart::Text(text) => {
            on_delta(&text);
            reply.push_str(&text);
        }
        StreamPart::Error(message) => return Err(ClientError::Remote(message)),
        other => debug!("Stream part: {:?}", other),
    }
    Ok(())
}
