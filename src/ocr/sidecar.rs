//! OCR sidecar engine.
//!
//! Talks to a companion OCR service over HTTP. The sidecar accepts a
//! multipart image upload and returns text spans with per-span confidence.

use super::OcrEngine;
use crate::schema::ExtractedSpan;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
struct SidecarResponse {
    spans: Vec<SidecarSpan>,
}

#[derive(Debug, Deserialize)]
struct SidecarSpan {
    text: String,
    confidence: f64,
}

pub struct SidecarOcr {
    url: String,
    language: String,
    client: reqwest::Client,
}

impl SidecarOcr {
    pub fn new(client: reqwest::Client, url: String, language: String) -> Self {
        Self {
            url,
            language,
            client,
        }
    }
}

#[async_trait::async_trait]
impl OcrEngine for SidecarOcr {
    fn name(&self) -> &str {
        "sidecar"
    }

    async fn readtext(&self, image: &[u8]) -> anyhow::Result<Vec<ExtractedSpan>> {
        use reqwest::multipart::{Form, Part};

        let part = Part::bytes(image.to_vec())
            .file_name("label")
            .mime_str("application/octet-stream")?;

        let form = Form::new()
            .part("file", part)
            .text("language", self.language.clone());

        info!("SidecarOcr: sending {} bytes to {}", image.len(), self.url);

        let response = self
            .client
            .post(format!("{}/readtext", self.url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OCR sidecar error ({}): {}", status, error_text);
        }

        let parsed: SidecarResponse = response.json().await?;

        Ok(parsed
            .spans
            .into_iter()
            .map(|s| ExtractedSpan {
                text: s.text,
                confidence: s.confidence,
            })
            .collect())
    }
}
