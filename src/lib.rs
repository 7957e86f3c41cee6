pub mod client;
pub mod config;
pub mod model;
pub mod pdf;
pub mod stream;
pub mod web;

use std::sync::Arc;
use std::time::Duration;

use tera::Tera;

use model::LanguageModel;
use pdf::PdfExtractor;

// Shared, read-only application state. Nothing here changes between requests.
pub struct AppState {
    pub tera: Tera,
    pub model: Arc<dyn LanguageModel>,
    pub extractor: PdfExtractor,
    pub chat_deadline: Duration,
}
