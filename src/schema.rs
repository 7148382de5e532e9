//! Core domain types for ingredient health analysis.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A span of text read from the label image, with OCR confidence in `[0, 1]`.
///
/// Spans below the configured confidence threshold are dropped before they
/// reach the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSpan {
    pub text: String,
    pub confidence: f64,
}

/// A candidate ingredient name.
///
/// Confidence is only meaningful for extractor output; names produced by the
/// normalizer carry the default of 0.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    #[serde(default)]
    pub confidence: f64,
}

impl Ingredient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            confidence: 0.0,
        }
    }
}

/// Health rating for a single ingredient.
///
/// `Unknown` is a local sentinel for entries that could not be resolved; the
/// model is never asked to produce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Healthy,
    Unhealthy,
    Neutral,
    Unknown,
}

/// A rating plus a short justification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub rating: Rating,
    pub reason: String,
}

/// Persisted form of an [`Assessment`], keyed by normalized ingredient name.
///
/// At most one record exists per normalized name; the store enforces this
/// with a uniqueness constraint, so concurrent writers racing on the same
/// name cannot both insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub name: String,
    pub rating: Rating,
    pub reason: String,
}

impl CacheRecord {
    pub fn assessment(&self) -> Assessment {
        Assessment {
            rating: self.rating,
            reason: self.reason.clone(),
        }
    }
}

/// Final pipeline output: one assessment per detected ingredient occurrence,
/// keyed by the ingredient name as the normalizer produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: String,
    pub assessments: HashMap<String, Assessment>,
}

impl AnalysisResult {
    pub fn new(assessments: HashMap<String, Assessment>) -> Self {
        Self {
            id: format!("ana_{}", Uuid::new_v4().simple()),
            assessments,
        }
    }
}

/// Normalize an ingredient name into its cache lookup key.
///
/// Keys are lower-cased and trimmed so that `"Sugar"`, `" sugar "` and
/// `"SUGAR"` all resolve to the same record.
pub fn cache_key(name: &str) -> String {
    name.trim().to_lowercase()
}
