use std::env;
use std::time::Duration;

use thiserror::Error;

// Fixed model identifier; not configurable
pub const MODEL_NAME: &str = "llama3-70b-8192";

// Hard ceiling on one chat exchange
pub const CHAT_MAX_DURATION: Duration = Duration::from_secs(30);

pub const DEFAULT_MODEL_BASE_URL: &str = "https://api.groq.com/openai/v1";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub model_base_url: String,
    pub temperature: Option<f32>,
    pub host: String,
    pub port: u16,
    pub log_extracted_text: bool,
    pub template_dir: String,
    pub static_dir: String,
}

impl Settings {
    /// Reads settings from the process environment. Call `dotenv()` first so a
    /// local `.env` file is honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GROQ_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::Missing("GROQ_API_KEY"))?;

        let model_base_url = lookup("MODEL_BASE_URL")
            .unwrap_or_else(|| DEFAULT_MODEL_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let temperature = match lookup("TEMPERATURE") {
            Some(raw) => Some(parse_var("TEMPERATURE", &raw)?),
            None => None,
        };

        let port = match lookup("PORT") {
            Some(raw) => parse_var("PORT", &raw)?,
            None => 8080,
        };

        let log_extracted_text = match lookup("LOG_EXTRACTED_TEXT") {
            Some(raw) => parse_bool("LOG_EXTRACTED_TEXT", &raw)?,
            None => true,
        };

        Ok(Self {
            api_key,
            model_base_url,
            temperature,
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            log_extracted_text,
            template_dir: lookup("TEMPLATE_DIR").unwrap_or_else(|| "templates".to_string()),
            static_dir: lookup("STATIC_DIR").unwrap_or_else(|| "static".to_string()),
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
        }),
    }
}
