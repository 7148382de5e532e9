//! Three-stage analysis pipeline: extract, normalize, resolve.
//!
//! A run is strictly sequential with no retries and no partial results: a
//! failing stage aborts the run with that stage's error. Partial-failure
//! tolerance lives inside the resolver's batch handling, not here.

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::groq::ModelError;
use crate::normalizer::IngredientNormalizer;
use crate::ocr::{ExtractionError, TextExtractor};
use crate::resolver::{RatingResolver, ResolveError};
use crate::schema::AnalysisResult;

/// Tagged per-stage failure surfaced to the caller.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("extraction stage failed: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("normalization stage failed: {0}")]
    Normalization(#[source] ModelError),
    #[error("resolution stage failed: {0}")]
    Resolution(#[source] ResolveError),
}

pub struct AnalysisPipeline {
    extractor: TextExtractor,
    normalizer: IngredientNormalizer,
    resolver: RatingResolver,
}

impl AnalysisPipeline {
    pub fn new(
        extractor: TextExtractor,
        normalizer: IngredientNormalizer,
        resolver: RatingResolver,
    ) -> Self {
        Self {
            extractor,
            normalizer,
            resolver,
        }
    }

    /// Analyze a label image: one assessment per detected ingredient.
    pub async fn analyze(&self, image: &[u8]) -> Result<AnalysisResult, AnalysisError> {
        let content_hash = {
            let mut hasher = Sha256::new();
            hasher.update(image);
            format!("{:x}", hasher.finalize())
        };
        info!(
            "Starting analysis ({} bytes, sha256={})",
            image.len(),
            &content_hash[..12]
        );

        let spans = self.extractor.extract(image).await?;
        let raw_text = spans
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(",");
        info!("Extraction complete: {} spans", spans.len());

        let ingredients = self
            .normalizer
            .normalize(&raw_text)
            .await
            .map_err(AnalysisError::Normalization)?;
        info!("Normalization complete: {} ingredients", ingredients.len());

        let names: Vec<String> = ingredients.into_iter().map(|i| i.name).collect();
        let assessments = self
            .resolver
            .resolve(&names)
            .await
            .map_err(AnalysisError::Resolution)?;
        info!("Resolution complete: {} assessments", assessments.len());

        Ok(AnalysisResult::new(assessments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groq::{Message, ModelClient};
    use crate::ocr::OcrEngine;
    use crate::schema::{CacheRecord, ExtractedSpan, Rating};
    use crate::store::{CacheStore, StoreError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct FakeOcr {
        spans: Vec<(&'static str, f64)>,
    }

    #[async_trait]
    impl OcrEngine for FakeOcr {
        fn name(&self) -> &str {
            "fake"
        }

        async fn readtext(&self, _image: &[u8]) -> anyhow::Result<Vec<ExtractedSpan>> {
            Ok(self
                .spans
                .iter()
                .map(|(text, confidence)| ExtractedSpan {
                    text: text.to_string(),
                    confidence: *confidence,
                })
                .collect())
        }
    }

    /// Serves both pipeline stages: a plain-text ingredient list when no
    /// structured output is expected, a JSON rating object when it is.
    struct StagedModel {
        list_response: String,
        json_response: String,
        list_calls: AtomicUsize,
        json_calls: AtomicUsize,
    }

    impl StagedModel {
        fn new(list_response: &str, json_response: &str) -> Arc<Self> {
            Arc::new(Self {
                list_response: list_response.to_string(),
                json_response: json_response.to_string(),
                list_calls: AtomicUsize::new(0),
                json_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ModelClient for StagedModel {
        async fn complete(
            &self,
            _messages: Vec<Message>,
            json_expected: bool,
        ) -> Result<String, ModelError> {
            if json_expected {
                self.json_calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.json_response.clone())
            } else {
                self.list_calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.list_response.clone())
            }
        }
    }

    #[derive(Default)]
    struct FakeStore {
        rows: Mutex<HashMap<String, CacheRecord>>,
    }

    impl FakeStore {
        fn with_rows(rows: Vec<CacheRecord>) -> Arc<Self> {
            Arc::new(Self {
                rows: Mutex::new(rows.into_iter().map(|r| (r.name.clone(), r)).collect()),
            })
        }

        fn row(&self, key: &str) -> Option<CacheRecord> {
            self.rows.lock().unwrap().get(key).cloned()
        }
    }

    #[async_trait]
    impl CacheStore for FakeStore {
        async fn batch_get(
            &self,
            keys: &[String],
        ) -> Result<HashMap<String, CacheRecord>, StoreError> {
            let rows = self.rows.lock().unwrap();
            Ok(keys
                .iter()
                .filter_map(|k| rows.get(k).map(|r| (k.clone(), r.clone())))
                .collect())
        }

        async fn batch_insert_if_absent(
            &self,
            records: &[CacheRecord],
        ) -> Result<usize, StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let mut inserted = 0;
            for record in records {
                if !rows.contains_key(&record.name) {
                    rows.insert(record.name.clone(), record.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        }
    }

    fn pipeline(
        ocr: FakeOcr,
        model: Arc<StagedModel>,
        store: Arc<FakeStore>,
    ) -> AnalysisPipeline {
        AnalysisPipeline::new(
            TextExtractor::new(Arc::new(ocr), 0.5),
            IngredientNormalizer::new(model.clone()),
            RatingResolver::new(model, store),
        )
    }

    #[tokio::test]
    async fn test_fresh_names_are_rated_and_persisted() {
        let ocr = FakeOcr {
            spans: vec![("sugar", 0.9), ("kale", 0.95)],
        };
        let model = StagedModel::new(
            "sugar, kale",
            r#"{"sugar": {"rating": "unhealthy", "reason": "Empty calories"},
                "kale": {"rating": "healthy", "reason": "Rich in fiber"}}"#,
        );
        let store = FakeStore::with_rows(vec![]);
        let pipeline = pipeline(ocr, model.clone(), store.clone());

        let result = pipeline.analyze(b"label").await.unwrap();

        assert_eq!(model.json_calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.assessments.len(), 2);
        assert_eq!(result.assessments["Sugar"].rating, Rating::Unhealthy);
        assert_eq!(result.assessments["Kale"].rating, Rating::Healthy);
        assert!(store.row("sugar").is_some());
        assert!(store.row("kale").is_some());
    }

    #[tokio::test]
    async fn test_cached_name_skips_model_rating_call() {
        let ocr = FakeOcr {
            spans: vec![("sugar", 0.9)],
        };
        let model = StagedModel::new("sugar", "{}");
        let store = FakeStore::with_rows(vec![CacheRecord {
            name: "sugar".to_string(),
            rating: Rating::Unhealthy,
            reason: "High in empty calories".to_string(),
        }]);
        let pipeline = pipeline(ocr, model.clone(), store);

        let result = pipeline.analyze(b"label").await.unwrap();

        assert_eq!(model.json_calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.assessments["Sugar"].rating, Rating::Unhealthy);
        assert_eq!(
            result.assessments["Sugar"].reason,
            "High in empty calories"
        );
    }

    #[tokio::test]
    async fn test_all_spans_below_threshold_yields_empty_result() {
        let ocr = FakeOcr {
            spans: vec![("blurry", 0.2), ("smudge", 0.4)],
        };
        let model = StagedModel::new("should not be called", "{}");
        let store = FakeStore::with_rows(vec![]);
        let pipeline = pipeline(ocr, model.clone(), store);

        let result = pipeline.analyze(b"label").await.unwrap();

        assert!(result.assessments.is_empty());
        assert_eq!(model.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(model.json_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_reason_degrades_to_unknown() {
        let ocr = FakeOcr {
            spans: vec![("sugar", 0.9)],
        };
        let model = StagedModel::new("sugar", r#"{"sugar": {"rating": "unhealthy"}}"#);
        let store = FakeStore::with_rows(vec![]);
        let pipeline = pipeline(ocr, model, store);

        let result = pipeline.analyze(b"label").await.unwrap();

        assert_eq!(result.assessments["Sugar"].rating, Rating::Unknown);
        assert!(result.assessments["Sugar"].reason.contains("Parsing failed"));
    }

    #[tokio::test]
    async fn test_extraction_failure_aborts_run() {
        struct BrokenOcr;

        #[async_trait]
        impl OcrEngine for BrokenOcr {
            fn name(&self) -> &str {
                "broken"
            }

            async fn readtext(&self, _image: &[u8]) -> anyhow::Result<Vec<ExtractedSpan>> {
                anyhow::bail!("corrupt image")
            }
        }

        let model = StagedModel::new("", "{}");
        let store = FakeStore::with_rows(vec![]);
        let pipeline = AnalysisPipeline::new(
            TextExtractor::new(Arc::new(BrokenOcr), 0.5),
            IngredientNormalizer::new(model.clone()),
            RatingResolver::new(model, store),
        );

        let err = pipeline.analyze(b"label").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Extraction(_)));
    }
}
