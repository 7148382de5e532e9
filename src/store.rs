//! Persistent ingredient assessment cache, backed by Supabase.
//!
//! One row per normalized ingredient name in the `ingredients` table. The
//! table carries a unique constraint on `name`, so insert-if-absent is
//! idempotent under concurrent writers: the first writer wins and later
//! duplicates are skipped by the store, never by pipeline-side locking.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::schema::CacheRecord;

const INGREDIENTS_TABLE: &str = "ingredients";

/// Cache store failure. Fatal on read (resolution cannot proceed without
/// knowing what is cached); logged and swallowed on write.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Batch key/value access to persisted assessments, keyed by normalized
/// ingredient name.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up every key in one call. Missing keys are simply absent from
    /// the returned map.
    async fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, CacheRecord>, StoreError>;

    /// Insert records whose keys are not yet present, skipping existing ones
    /// silently. Returns the number actually inserted.
    async fn batch_insert_if_absent(&self, records: &[CacheRecord]) -> Result<usize, StoreError>;
}

/// Supabase-backed cache store (PostgREST over HTTP).
#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseStore {
    pub fn new(client: Client, base_url: String, service_role_key: String) -> Self {
        Self {
            client,
            base_url,
            service_role_key,
        }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, INGREDIENTS_TABLE)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.service_role_key)
            .header(
                "Authorization",
                format!("Bearer {}", self.service_role_key),
            )
    }
}

#[async_trait]
impl CacheStore for SupabaseStore {
    async fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, CacheRecord>, StoreError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let filter = in_filter(keys);
        let response = self
            .authed(self.client.get(self.table_url()))
            .query(&[("select", "name,rating,reason"), ("name", filter.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Api { status, message });
        }

        let rows: Vec<CacheRecord> = response.json().await?;
        debug!("SupabaseStore: {}/{} keys found", rows.len(), keys.len());

        Ok(rows.into_iter().map(|r| (r.name.clone(), r)).collect())
    }

    async fn batch_insert_if_absent(&self, records: &[CacheRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let response = self
            .authed(self.client.post(self.table_url()))
            .query(&[("on_conflict", "name")])
            .header("Prefer", "resolution=ignore-duplicates,return=representation")
            .json(records)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Api { status, message });
        }

        let inserted: Vec<CacheRecord> = response.json().await?;
        debug!(
            "SupabaseStore: inserted {}/{} records ({} already present)",
            inserted.len(),
            records.len(),
            records.len() - inserted.len()
        );

        Ok(inserted.len())
    }
}

/// Build a PostgREST `in.(...)` filter over a set of keys. Values are quoted
/// so names containing commas or spaces survive the trip.
fn in_filter(keys: &[String]) -> String {
    let quoted: Vec<String> = keys
        .iter()
        .map(|k| format!("\"{}\"", k.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_filter_quotes_keys() {
        let keys = vec!["sugar".to_string(), "corn syrup".to_string()];
        assert_eq!(in_filter(&keys), r#"in.("sugar","corn syrup")"#);
    }

    #[test]
    fn test_in_filter_escapes_embedded_quotes() {
        let keys = vec![r#"so "pure" honey"#.to_string()];
        assert_eq!(in_filter(&keys), r#"in.("so \"pure\" honey")"#);
    }
}
