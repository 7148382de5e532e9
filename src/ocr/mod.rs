//! OCR engine abstraction and the confidence-filtering text extractor.
//!
//! Defines the [`OcrEngine`] trait so different OCR backends can be swapped
//! without touching the pipeline, plus [`TextExtractor`] which applies the
//! confidence threshold before spans reach the rest of the system.

pub mod sidecar;

use crate::schema::ExtractedSpan;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// OCR engine failure. Fatal for the request: the pipeline does not attempt
/// to interpret the image itself, so there is nothing to recover from.
#[derive(Debug, Error)]
#[error("text extraction failed: {0}")]
pub struct ExtractionError(#[from] pub anyhow::Error);

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Read text spans from raw image bytes. Any engine failure (corrupt
    /// image, unsupported encoding, internal error) surfaces as an opaque
    /// error.
    async fn readtext(&self, image: &[u8]) -> anyhow::Result<Vec<ExtractedSpan>>;
}

/// Wraps an OCR engine and filters its output by confidence.
///
/// Spans with confidence at or below the threshold are dropped silently; an
/// empty result is valid and propagates as zero ingredients, not an error.
#[derive(Clone)]
pub struct TextExtractor {
    engine: Arc<dyn OcrEngine>,
    confidence_threshold: f64,
}

impl TextExtractor {
    pub fn new(engine: Arc<dyn OcrEngine>, confidence_threshold: f64) -> Self {
        Self {
            engine,
            confidence_threshold,
        }
    }

    pub async fn extract(&self, image: &[u8]) -> Result<Vec<ExtractedSpan>, ExtractionError> {
        let spans = self.engine.readtext(image).await?;

        let kept: Vec<ExtractedSpan> = spans
            .into_iter()
            .filter(|s| s.confidence > self.confidence_threshold)
            .map(|s| ExtractedSpan {
                text: s.text.trim().to_string(),
                confidence: s.confidence,
            })
            .collect();

        debug!(
            "TextExtractor: {} spans above threshold {} (engine={})",
            kept.len(),
            self.confidence_threshold,
            self.engine.name()
        );

        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticEngine {
        spans: Vec<ExtractedSpan>,
    }

    #[async_trait::async_trait]
    impl OcrEngine for StaticEngine {
        fn name(&self) -> &str {
            "static"
        }

        async fn readtext(&self, _image: &[u8]) -> anyhow::Result<Vec<ExtractedSpan>> {
            Ok(self.spans.clone())
        }
    }

    struct FailingEngine;

    #[async_trait::async_trait]
    impl OcrEngine for FailingEngine {
        fn name(&self) -> &str {
            "failing"
        }

        async fn readtext(&self, _image: &[u8]) -> anyhow::Result<Vec<ExtractedSpan>> {
            anyhow::bail!("unsupported encoding")
        }
    }

    fn span(text: &str, confidence: f64) -> ExtractedSpan {
        ExtractedSpan {
            text: text.to_string(),
            confidence,
        }
    }

    #[tokio::test]
    async fn test_low_confidence_spans_are_dropped() {
        let engine = StaticEngine {
            spans: vec![span(" sugar ", 0.9), span("kale", 0.3), span("salt", 0.5)],
        };
        let extractor = TextExtractor::new(Arc::new(engine), 0.5);

        let spans = extractor.extract(b"image").await.unwrap();
        assert_eq!(spans, vec![span("sugar", 0.9)]);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_an_error() {
        let engine = StaticEngine {
            spans: vec![span("blur", 0.1)],
        };
        let extractor = TextExtractor::new(Arc::new(engine), 0.5);

        let spans = extractor.extract(b"image").await.unwrap();
        assert!(spans.is_empty());
    }

    #[tokio::test]
    async fn test_engine_failure_surfaces_as_extraction_error() {
        let extractor = TextExtractor::new(Arc::new(FailingEngine), 0.5);
        let err = extractor.extract(b"image").await.unwrap_err();
        assert!(err.to_string().contains("unsupported encoding"));
    }
}
