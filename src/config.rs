//! Environment-driven configuration, loaded once at startup.

use anyhow::{Context, Result};

/// Runtime settings. Every external dependency the pipeline talks to is
/// configured here and passed explicitly into its client at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    /// Base URL of the OCR sidecar service.
    pub ocr_url: String,
    /// Language hint forwarded to the OCR engine.
    pub ocr_language: String,
    /// Spans at or below this confidence are discarded.
    pub ocr_confidence_threshold: f64,
    pub groq_api_key: String,
    /// Chat model identifier sent with every completion request.
    pub model: String,
    pub supabase_url: String,
    pub supabase_service_role_key: String,
}

const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

impl Settings {
    /// Read settings from the environment. Required: `GROQ_API_KEY`,
    /// `SUPABASE_URL`, `SUPABASE_SERVICE_ROLE_KEY`. Everything else has a
    /// development default.
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(v) => v.parse().context("PORT is not a valid port number")?,
            Err(_) => 8000,
        };

        let ocr_confidence_threshold = match std::env::var("OCR_CONFIDENCE_THRESHOLD") {
            Ok(v) => v
                .parse()
                .context("OCR_CONFIDENCE_THRESHOLD is not a valid float")?,
            Err(_) => 0.5,
        };

        Ok(Self {
            port,
            ocr_url: std::env::var("OCR_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            ocr_language: std::env::var("OCR_LANGUAGE").unwrap_or_else(|_| "en".to_string()),
            ocr_confidence_threshold,
            groq_api_key: std::env::var("GROQ_API_KEY")
                .context("GROQ_API_KEY environment variable not set")?,
            model: std::env::var("MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            supabase_url: std::env::var("SUPABASE_URL")
                .context("SUPABASE_URL environment variable not set")?,
            supabase_service_role_key: std::env::var("SUPABASE_SERVICE_ROLE_KEY")
                .context("SUPABASE_SERVICE_ROLE_KEY environment variable not set")?,
        })
    }
}
