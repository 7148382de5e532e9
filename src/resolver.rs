//! Cache-aside rating resolution.
//!
//! Given a batch of ingredient names, serves assessments from the cache
//! store where possible and consults the model exactly once for the missing
//! subset. Parsing of the model response is fault tolerant at the field
//! level: one malformed entry degrades to [`Rating::Unknown`] without
//! affecting its siblings, and a fully unparseable response degrades every
//! missing name instead of failing the run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::groq::{Message, ModelClient, ModelError};
use crate::schema::{cache_key, Assessment, CacheRecord, Rating};
use crate::store::{CacheStore, StoreError};

const SYSTEM_PROMPT: &str = "You are a certified nutrition expert. Assess food ingredients based \
on general nutritional science: 'healthy' for nutrient-dense/low-calorie items (e.g., \
vegetables), 'unhealthy' for high-sugar/processed items, 'neutral' for moderate ones. Provide \
brief, evidence-based reasons. Output raw JSON only.";

/// Resolution failure: either the cache read or the model call failed.
/// Write failures never show up here; they are logged and swallowed.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-entry parse outcome. Degraded entries carry the reason string that
/// ends up in the returned assessment; they are never persisted.
enum EntryOutcome {
    Parsed(Assessment),
    Degraded(String),
}

pub struct RatingResolver {
    model: Arc<dyn ModelClient>,
    store: Arc<dyn CacheStore>,
}

impl RatingResolver {
    pub fn new(model: Arc<dyn ModelClient>, store: Arc<dyn CacheStore>) -> Self {
        Self { model, store }
    }

    /// Resolve an assessment for every input name.
    ///
    /// Names that only differ in casing or surrounding whitespace share one
    /// cache key and therefore one assessment, but the returned map carries
    /// one entry per distinct original spelling.
    pub async fn resolve(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, Assessment>, ResolveError> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }

        // Preserve the original -> lookup-key mapping so results can be
        // reported against the original casing.
        let keyed: Vec<(String, String)> = names
            .iter()
            .map(|n| (n.clone(), cache_key(n)))
            .collect();

        let mut unique_keys: Vec<String> = Vec::new();
        let mut display_names: HashMap<String, String> = HashMap::new();
        for (original, key) in &keyed {
            if !display_names.contains_key(key) {
                unique_keys.push(key.clone());
                display_names.insert(key.clone(), original.clone());
            }
        }

        let cached = self.store.batch_get(&unique_keys).await?;
        info!(
            "Cache hit: {}/{} ingredients found in store",
            cached.len(),
            unique_keys.len()
        );

        let mut by_key: HashMap<String, Assessment> = cached
            .into_iter()
            .map(|(key, record)| (key, record.assessment()))
            .collect();

        let missing_keys: Vec<String> = unique_keys
            .iter()
            .filter(|k| !by_key.contains_key(*k))
            .cloned()
            .collect();

        if missing_keys.is_empty() {
            info!("Full cache hit: no model call needed");
        } else {
            let missing_names: Vec<&str> = missing_keys
                .iter()
                .map(|k| display_names[k].as_str())
                .collect();
            info!(
                "Cache miss: calling model for {} ingredients: {:?}",
                missing_names.len(),
                missing_names
            );

            let response = self
                .model
                .complete(assessment_messages(&missing_names), true)
                .await?;
            debug!("Model response for assessment: {}", response);

            let outcomes = parse_assessments(&response, &missing_keys);

            let mut fresh = Vec::new();
            for (key, outcome) in outcomes {
                match outcome {
                    EntryOutcome::Parsed(assessment) => {
                        fresh.push(CacheRecord {
                            name: key.clone(),
                            rating: assessment.rating,
                            reason: assessment.reason.clone(),
                        });
                        by_key.insert(key, assessment);
                    }
                    EntryOutcome::Degraded(reason) => {
                        warn!("Degraded assessment for {}: {}", key, reason);
                        by_key.insert(
                            key,
                            Assessment {
                                rating: Rating::Unknown,
                                reason,
                            },
                        );
                    }
                }
            }

            // Best-effort persistence: the in-memory result is already
            // complete, so a write failure must not surface to the caller.
            if !fresh.is_empty() {
                match self.store.batch_insert_if_absent(&fresh).await {
                    Ok(inserted) => debug!("Persisted {} new assessments", inserted),
                    Err(e) => error!("Cache write failed: {}", e),
                }
            }
        }

        Ok(keyed
            .into_iter()
            .filter_map(|(original, key)| {
                by_key.get(&key).cloned().map(|a| (original, a))
            })
            .collect())
    }
}

fn assessment_messages(names: &[&str]) -> Vec<Message> {
    let list = names.join(", ");
    vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(format!(
            r#"For these ingredients: {list}, rate each as 'healthy', 'unhealthy', or 'neutral' with a brief reason. If unknown or empty, return an empty JSON object.
Format: {{"ingredient1": {{"rating": "healthy", "reason": "Rich in vitamins"}}, "ingredient2": {{...}}}}
Example: Ingredients: sugar, kale
Output: {{"sugar": {{"rating": "unhealthy", "reason": "High in empty calories, linked to obesity"}}, "kale": {{"rating": "healthy", "reason": "Packed with vitamins and fiber"}}}}
Now assess: {list}"#
        )),
    ]
}

/// Parse the batched model response into one outcome per missing key.
///
/// An unparseable overall response degrades every key; a well-formed
/// response with a bad entry degrades only that entry. Entries for names
/// that were never requested are dropped, and requested names absent from
/// the response degrade rather than disappearing from the result.
fn parse_assessments(response: &str, missing_keys: &[String]) -> HashMap<String, EntryOutcome> {
    let wanted: HashSet<&str> = missing_keys.iter().map(String::as_str).collect();

    let object = serde_json::from_str::<serde_json::Value>(strip_code_fences(response))
        .ok()
        .and_then(|v| v.as_object().cloned());

    let mut outcomes: HashMap<String, EntryOutcome> = HashMap::new();

    match object {
        None => {
            warn!("Model response was not a JSON object");
            for key in missing_keys {
                outcomes.insert(
                    key.clone(),
                    EntryOutcome::Degraded(
                        "Parsing failed: model response was not valid JSON".to_string(),
                    ),
                );
            }
        }
        Some(map) => {
            for (name, value) in &map {
                let key = cache_key(name);
                if !wanted.contains(key.as_str()) {
                    warn!("Ignoring unsolicited assessment for: {}", name);
                    continue;
                }
                outcomes.insert(key, parse_entry(value));
            }
            for key in missing_keys {
                outcomes.entry(key.clone()).or_insert_with(|| {
                    EntryOutcome::Degraded(
                        "Parsing failed: no rating returned for this ingredient".to_string(),
                    )
                });
            }
        }
    }

    outcomes
}

fn parse_entry(value: &serde_json::Value) -> EntryOutcome {
    let Some(entry) = value.as_object() else {
        return EntryOutcome::Degraded("Parsing failed: entry is not an object".to_string());
    };

    let rating = match entry.get("rating").and_then(|v| v.as_str()) {
        None => {
            return EntryOutcome::Degraded("Parsing failed: missing field `rating`".to_string())
        }
        Some(s) => match parse_rating(s) {
            Some(r) => r,
            None => {
                return EntryOutcome::Degraded(format!("Parsing failed: invalid rating `{s}`"))
            }
        },
    };

    let reason = match entry.get("reason").and_then(|v| v.as_str()) {
        None => {
            return EntryOutcome::Degraded("Parsing failed: missing field `reason`".to_string())
        }
        Some(s) => s.to_string(),
    };

    EntryOutcome::Parsed(Assessment { rating, reason })
}

/// Only the three ratings the model is asked for are accepted; `unknown` is
/// reserved for local failure handling.
fn parse_rating(s: &str) -> Option<Rating> {
    match s.trim().to_lowercase().as_str() {
        "healthy" => Some(Rating::Healthy),
        "unhealthy" => Some(Rating::Unhealthy),
        "neutral" => Some(Rating::Neutral),
        _ => None,
    }
}

/// Models occasionally wrap JSON in markdown code fences despite the
/// raw-JSON instruction.
fn strip_code_fences(response: &str) -> &str {
    if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(response)
            .trim()
    } else if response.contains("```") {
        response.split("```").nth(1).unwrap_or(response).trim()
    } else {
        response.trim()
    }
}
