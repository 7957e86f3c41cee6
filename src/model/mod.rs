use std::future::Future;
use std::pin::Pin;

use anyhow::{anyhow, Context, Result};
use futures::{stream, Stream, StreamExt};
use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::{Settings, MODEL_NAME};
use crate::web::models::{Message, Role};

pub mod sse;

pub const ANALYSIS_INSTRUCTION: &str = "Analyze this legal document and provide a comprehensive summary. Focus on key legal points, obligations, rights, and potential issues. Format your response with clear sections and bullet points where appropriate.";

pub const CHAT_SYSTEM_PROMPT: &str = "You are a legal assistant specialized in analyzing legal documents. The user has uploaded a legal document that you've already summarized. Answer their questions about the document based on your understanding of legal concepts and terminology. Be precise, professional, and helpful.";

/// Incremental text deltas of one assistant reply.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A hosted generative model reachable by the endpoints.
pub trait LanguageModel: Send + Sync {
    /// Structured generation of a `{summary}` object for the document text.
    fn generate_summary<'a>(&'a self, document_text: &'a str) -> BoxFuture<'a, Result<String>>;

    /// Streams one assistant reply to the given conversation.
    fn stream_chat(&self, messages: Vec<Message>) -> BoxFuture<'_, Result<TokenStream>>;
}

/// Shape the model is asked to produce during analysis.
#[derive(Debug, Deserialize)]
pub struct SummaryObject {
    pub summary: String,
}

// Client for an OpenAI-compatible chat completions API (Groq by default)
pub struct GroqModel {
    base_url: String,
    api_key: String,
    temperature: Option<f32>,
    client: Client,
}

impl GroqModel {
    pub fn new(settings: &Settings) -> Self {
        info!(
            "Using hosted model {} at {}",
            MODEL_NAME, settings.model_base_url
        );
        Self {
            base_url: settings.model_base_url.clone(),
            api_key: settings.api_key.clone(),
            temperature: settings.temperature,
            client: Client::new(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn payload(&self, messages: &[Message], stream: bool) -> Value {
        let mut payload = json!({
            "model": MODEL_NAME,
            "messages": messages,
            "stream": stream,
        });
        if let Some(temperature) = self.temperature {
            payload["temperature"] = json!(temperature);
        }
        payload
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response> {
        debug!("Payload: {}", payload);
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .context("model request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("API request failed ({}): {}", status, error_text));
        }
        Ok(response)
    }

    async fn summarize(&self, document_text: &str) -> Result<String> {
        info!(
            "Requesting summary for {} characters of document text",
            document_text.len()
        );

        let messages = summary_messages(document_text);
        let mut payload = self.payload(&messages, false);
        payload["response_format"] = json!({ "type": "json_object" });

        let response_json: Value = self.send(&payload).await?.json().await?;
        debug!("Response JSON: {}", response_json);

        let content = response_json
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| anyhow!("Failed to extract content from response"))?;

        let summary = parse_summary(content)?;
        info!("Summary length: {} characters", summary.len());
        Ok(summary)
    }

    async fn chat_stream(&self, messages: Vec<Message>) -> Result<TokenStream> {
        info!("Streaming chat reply for {} turns", messages.len());

        let mut conversation = Vec::with_capacity(messages.len() + 1);
        conversation.push(Message {
            role: Role::System,
            content: CHAT_SYSTEM_PROMPT.to_string(),
        });
        conversation.extend(messages);

        let payload = self.payload(&conversation, true);
        let response = self.send(&payload).await?;

        let body = Box::pin(response.bytes_stream());
        let decoder = sse::CompletionChunkDecoder::default();

        // A body that closes before `[DONE]` is a truncated reply
        let tokens = stream::unfold(Some((body, decoder)), |state| async move {
            let (mut body, mut decoder) = state?;
            let items: Vec<Result<String>> = match body.next().await {
                Some(Ok(bytes)) => {
                    let deltas: Vec<Result<String>> = decoder.push(&bytes).into_iter().map(Ok).collect();
                    return Some((stream::iter(deltas), Some((body, decoder))));
                }
                Some(Err(e)) => vec![Err(anyhow::Error::from(e).context("model stream interrupted"))],
                None if decoder.is_done() => return None,
                None => vec![Err(anyhow!("model stream ended before completion"))],
            };
            Some((stream::iter(items), None))
        })
        .flatten();

        Ok(Box::pin(tokens))
    }
}

impl LanguageModel for GroqModel {
    fn generate_summary<'a>(&'a self, document_text: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.summarize(document_text))
    }

    fn stream_chat(&self, messages: Vec<Message>) -> BoxFuture<'_, Result<TokenStream>> {
        Box::pin(self.chat_stream(messages))
    }
}

fn summary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": {
                "type": "string",
                "description": "A comprehensive summary of the legal document with key points highlighted."
            }
        },
        "required": ["summary"],
        "additionalProperties": false
    })
}

fn summary_messages(document_text: &str) -> Vec<Message> {
    vec![
        Message {
            role: Role::System,
            content: format!(
                "JSON schema:\n{}\nYou MUST answer with a JSON object that matches the JSON schema above.",
                summary_schema()
            ),
        },
        Message {
            role: Role::User,
            content: format!(
                "{}\n\nDocument content:\n{}",
                ANALYSIS_INSTRUCTION, document_text
            ),
        },
    ]
}

/// Parses the model's structured output into the summary string.
pub fn parse_summary(content: &str) -> Result<String> {
    let object: SummaryObject =
        serde_json::from_str(content.trim()).context("model returned malformed summary object")?;
    Ok(object.summary)
}
