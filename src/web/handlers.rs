use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use actix_multipart::Multipart;
use actix_web::web::{self, Bytes};
use actix_web::{HttpResponse, Responder};
use anyhow::Result;
use futures::StreamExt;
use log::{debug, error, info, warn};
use serde_json::json;
use tera::Context;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::config::MODEL_NAME;
use crate::model::LanguageModel;
use crate::stream::{FinishReason, StreamPart, GENERIC_ERROR, STREAM_HEADER};
use crate::web::models::{ChatRequest, Message};
use crate::web::upload;
use crate::AppState;

pub const INVALID_FILE_MESSAGE: &str = "Invalid file format. Please upload a PDF.";
pub const ANALYSIS_FAILED_MESSAGE: &str = "Error analyzing PDF";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

// Index page handler
pub async fn index(data: web::Data<AppState>) -> impl Responder {
    let mut context = Context::new();
    context.insert("title", "LegalPDF Analyzer");
    context.insert("model_name", MODEL_NAME);
    context.insert("max_upload_hint", "10MB");
    match data.tera.render("index.html", &context) {
        Ok(html) => HttpResponse::Ok().content_type("text/html").body(html),
        Err(e) => {
            error!("Template error: {}", e);
            HttpResponse::InternalServerError().body("Template error")
        }
    }
}

// Health check endpoint
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

fn analysis_failed() -> HttpResponse {
    HttpResponse::InternalServerError()
        .content_type(TEXT_PLAIN)
        .body(ANALYSIS_FAILED_MESSAGE)
}

// Summarizer endpoint: multipart `pdf` field in, plain-text summary out
pub async fn analyze(data: web::Data<AppState>, payload: Multipart) -> HttpResponse {
    let request_id = Uuid::new_v4();

    let upload = match upload::read_pdf_field(payload).await {
        Ok(Some(upload)) if upload.is_pdf() => upload,
        Ok(rejected) => {
            warn!(
                "Analysis {} rejected: declared type {:?}",
                request_id,
                rejected.and_then(|u| u.content_type)
            );
            return HttpResponse::BadRequest()
                .content_type(TEXT_PLAIN)
                .body(INVALID_FILE_MESSAGE);
        }
        Err(e) => {
            error!("Error analyzing PDF ({}): unreadable form: {}", request_id, e);
            return analysis_failed();
        }
    };

    info!(
        "Analysis {}: {} ({} bytes)",
        request_id,
        upload.filename.as_deref().unwrap_or("<unnamed>"),
        upload.data.len()
    );

    // Parsing is CPU-bound, keep it off the async workers
    let extractor = data.extractor.clone();
    let bytes = upload.data;
    let text = match web::block(move || extractor.extract_text(&bytes)).await {
        Ok(text) => text,
        Err(e) => {
            error!("Error analyzing PDF ({}): extraction task failed: {}", request_id, e);
            return analysis_failed();
        }
    };

    match data.model.generate_summary(&text).await {
        Ok(summary) => {
            info!("Analysis {} complete ({} characters)", request_id, summary.len());
            HttpResponse::Ok().content_type(TEXT_PLAIN).body(summary)
        }
        Err(e) => {
            error!("Error analyzing PDF ({}): {:#}", request_id, e);
            analysis_failed()
        }
    }
}

// Chat endpoint: streams one assistant reply as data-stream parts
pub async fn chat(data: web::Data<AppState>, req: web::Json<ChatRequest>) -> HttpResponse {
    let ChatRequest { messages, file_id } = req.into_inner();
    info!("Chat request with {} turns", messages.len());
    debug!("Chat fileId (unused): {:?}", file_id);

    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(64);
    actix_web::rt::spawn(relay_chat(
        data.model.clone(),
        messages,
        data.chat_deadline,
        tx,
    ));

    HttpResponse::Ok()
        .content_type(TEXT_PLAIN)
        .insert_header(STREAM_HEADER)
        .streaming(ReceiverStream::new(rx))
}

type PartSender = mpsc::Sender<Result<Bytes, Infallible>>;

async fn send_part(tx: &PartSender, part: StreamPart) -> bool {
    tx.send(Ok(Bytes::from(part.encode()))).await.is_ok()
}

async fn relay_chat(
    model: Arc<dyn LanguageModel>,
    messages: Vec<Message>,
    deadline: Duration,
    tx: PartSender,
) {
    let message_id = format!("msg-{}", Uuid::new_v4().simple());
    if !send_part(&tx, StreamPart::start(message_id)).await {
        return;
    }

    match tokio::time::timeout(deadline, pump_tokens(model.as_ref(), messages, &tx)).await {
        Ok(Ok(())) => {
            send_part(&tx, StreamPart::finish_step(FinishReason::Stop)).await;
            send_part(&tx, StreamPart::finish_message(FinishReason::Stop)).await;
        }
        Ok(Err(e)) => {
            error!("Chat stream failed: {:#}", e);
            send_part(&tx, StreamPart::Error(GENERIC_ERROR.to_string())).await;
        }
        Err(_) => {
            warn!("Chat stream exceeded {:?}; terminating", deadline);
            send_part(&tx, StreamPart::Error(GENERIC_ERROR.to_string())).await;
        }
    }
}

async fn pump_tokens(
    model: &dyn LanguageModel,
    messages: Vec<Message>,
    tx: &PartSender,
) -> Result<()> {
    let mut tokens = model.stream_chat(messages).await?;
    while let Some(token) = tokens.next().await {
        if !send_part(tx, StreamPart::Text(token?)).await {
            debug!("Chat client went away; dropping upstream stream");
            return Ok(());
        }
    }
    Ok(())
}
