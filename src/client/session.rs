//! Client-side state for one analysis session.
//!
//! The session owns the selected document, the summary and the conversation.
//! Every user action is a guarded transition, so states such as "chatting with
//! nothing analyzed" or "two analyses in flight" cannot be reached.

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::web::models::{ChatRequest, Message, Role};
use crate::web::upload::PDF_MEDIA_TYPE;

/// A file picked by the user. Held in memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedDocument {
    pub name: String,
    pub media_type: String,
    pub content: Vec<u8>,
}

impl UploadedDocument {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            content,
        }
    }

    /// Reads a file from disk, declaring `application/pdf` for `.pdf` names.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let content = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let is_pdf = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        let media_type = if is_pdf {
            PDF_MEDIA_TYPE
        } else {
            "application/octet-stream"
        };
        Ok(Self::new(name, media_type, content))
    }

    pub fn is_pdf(&self) -> bool {
        self.media_type == PDF_MEDIA_TYPE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Upload,
    Summary,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing analyzed yet.
    Idle,
    /// The analysis request is being sent.
    Uploading,
    /// Waiting for the summary.
    Analyzing,
    /// A summary exists and nothing is in flight.
    Ready,
    /// A reply is streaming.
    Chatting { awaiting_first_token: bool },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("only PDF files can be analyzed (got {0})")]
    NotPdf(String),
    #[error("no file selected")]
    NoFile,
    #[error("an analysis is already in progress")]
    AnalysisInFlight,
    #[error("a reply is still streaming")]
    ReplyInFlight,
    #[error("the {0:?} tab is locked until a document has been analyzed")]
    ViewLocked(View),
    #[error("no document has been analyzed yet")]
    NotAnalyzed,
    #[error("the question is empty")]
    EmptyInput,
    #[error("no {0} is in progress")]
    NothingInFlight(&'static str),
}

#[derive(Debug)]
pub struct Session {
    file: Option<UploadedDocument>,
    summary: Option<String>,
    conversation: Vec<Message>,
    view: View,
    phase: Phase,
    input: String,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            file: None,
            summary: None,
            conversation: Vec::new(),
            view: View::Upload,
            phase: Phase::Idle,
            input: String::new(),
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn file(&self) -> Option<&UploadedDocument> {
        self.file.as_ref()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    fn analysis_in_flight(&self) -> bool {
        matches!(self.phase, Phase::Uploading | Phase::Analyzing)
    }

    fn reply_in_flight(&self) -> bool {
        matches!(self.phase, Phase::Chatting { .. })
    }

    // Phase to fall back to once nothing is in flight
    fn settled(&self) -> Phase {
        if self.summary.is_some() {
            Phase::Ready
        } else {
            Phase::Idle
        }
    }

    fn ensure_quiet(&self) -> Result<(), SessionError> {
        if self.analysis_in_flight() {
            return Err(SessionError::AnalysisInFlight);
        }
        if self.reply_in_flight() {
            return Err(SessionError::ReplyInFlight);
        }
        Ok(())
    }

    /// Whether a busy indicator should be shown.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.phase,
            Phase::Uploading | Phase::Analyzing | Phase::Chatting { awaiting_first_token: true }
        )
    }

    pub fn tab_enabled(&self, view: View) -> bool {
        match view {
            View::Upload => true,
            View::Summary | View::Chat => self.summary.is_some(),
        }
    }

    pub fn show(&mut self, view: View) -> Result<(), SessionError> {
        if !self.tab_enabled(view) {
            return Err(SessionError::ViewLocked(view));
        }
        self.view = view;
        Ok(())
    }

    /// Selects a file, replacing any earlier selection.
    pub fn select_file(&mut self, document: UploadedDocument) -> Result<(), SessionError> {
        if self.analysis_in_flight() {
            return Err(SessionError::AnalysisInFlight);
        }
        if !document.is_pdf() {
            return Err(SessionError::NotPdf(document.media_type));
        }
        self.file = Some(document);
        Ok(())
    }

    pub fn can_analyze(&self) -> bool {
        self.file.is_some() && self.ensure_quiet().is_ok()
    }

    /// Starts an analysis and hands back the document to send.
    pub fn begin_analysis(&mut self) -> Result<UploadedDocument, SessionError> {
        self.ensure_quiet()?;
        let document = self.file.clone().ok_or(SessionError::NoFile)?;
        self.phase = Phase::Uploading;
        Ok(document)
    }

    pub fn upload_sent(&mut self) -> Result<(), SessionError> {
        match self.phase {
            Phase::Uploading => {
                self.phase = Phase::Analyzing;
                Ok(())
            }
            _ => Err(SessionError::NothingInFlight("upload")),
        }
    }

    pub fn complete_analysis(&mut self, summary: String) -> Result<(), SessionError> {
        if !self.analysis_in_flight() {
            return Err(SessionError::NothingInFlight("analysis"));
        }
        self.summary = Some(summary);
        self.phase = Phase::Ready;
        self.view = View::Summary;
        Ok(())
    }

    /// A failed analysis leaves any earlier summary in place.
    pub fn fail_analysis(&mut self) -> Result<(), SessionError> {
        if !self.analysis_in_flight() {
            return Err(SessionError::NothingInFlight("analysis"));
        }
        self.phase = self.settled();
        Ok(())
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.input = input.into();
    }

    pub fn can_send(&self) -> bool {
        self.summary.is_some() && self.phase == Phase::Ready && !self.input.trim().is_empty()
    }

    /// Appends the pending question and returns the request to send.
    pub fn begin_chat(&mut self) -> Result<ChatRequest, SessionError> {
        self.ensure_quiet()?;
        if self.summary.is_none() {
            return Err(SessionError::NotAnalyzed);
        }
        if self.input.trim().is_empty() {
            return Err(SessionError::EmptyInput);
        }

        let question = std::mem::take(&mut self.input);
        self.conversation.push(Message::user(question));
        self.phase = Phase::Chatting {
            awaiting_first_token: true,
        };

        Ok(ChatRequest {
            messages: self.conversation.clone(),
            file_id: Some(self.file.as_ref().map(|f| f.name.clone()).unwrap_or_default()),
        })
    }

    /// Appends streamed text to the reply being written.
    pub fn push_delta(&mut self, delta: &str) -> Result<(), SessionError> {
        match self.phase {
            Phase::Chatting {
                awaiting_first_token: true,
            } => {
                self.conversation.push(Message::assistant(delta));
                self.phase = Phase::Chatting {
                    awaiting_first_token: false,
                };
                Ok(())
            }
            Phase::Chatting { .. } => {
                if let Some(last) = self
                    .conversation
                    .last_mut()
                    .filter(|m| m.role == Role::Assistant)
                {
                    last.content.push_str(delta);
                }
                Ok(())
            }
            _ => Err(SessionError::NothingInFlight("reply")),
        }
    }

    /// Ends the reply, keeping whatever text arrived.
    pub fn finish_chat(&mut self) -> Result<(), SessionError> {
        if !self.reply_in_flight() {
            return Err(SessionError::NothingInFlight("reply"));
        }
        self.phase = self.settled();
        Ok(())
    }
}
