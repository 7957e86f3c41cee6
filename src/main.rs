use std::sync::Arc;

use actix_files as fs;
use actix_web::{web::Data, App, HttpServer};
use dotenv::dotenv;
use log::{error, info};
use tera::Tera;

use legal_pdf_analyzer::config::{Settings, CHAT_MAX_DURATION};
use legal_pdf_analyzer::model::GroqModel;
use legal_pdf_analyzer::pdf::PdfExtractor;
use legal_pdf_analyzer::web::routes;
use legal_pdf_analyzer::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info,lopdf=warn"));

    info!("Starting LegalPDF Analyzer");

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // One-time setup of the extraction backend and the hosted model client
    let extractor = PdfExtractor::new(settings.log_extracted_text);
    let model = Arc::new(GroqModel::new(&settings));

    // Initialize template engine
    let mut tera = match Tera::new(&format!("{}/**/*", settings.template_dir)) {
        Ok(t) => t,
        Err(e) => {
            error!("Template parsing error: {}", e);
            std::process::exit(1);
        }
    };
    tera.autoescape_on(vec![".html"]);

    let app_state = Data::new(AppState {
        tera,
        model,
        extractor,
        chat_deadline: CHAT_MAX_DURATION,
    });

    let static_dir = settings.static_dir.clone();
    info!("Listening on {}:{}", settings.host, settings.port);

    // Start web server
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(routes::configure)
            .service(fs::Files::new("/static", static_dir.clone()))
    })
    .bind((settings.host.as_str(), settings.port))?
    .run()
    .await
}
