//! Ingredient normalization.
//!
//! Turns raw OCR text into a cleaned, title-cased list of ingredient names
//! by delegating to the model under a strict output contract: the response
//! must be a comma-separated ingredient list and nothing else.

use std::sync::Arc;
use tracing::{debug, info};

use crate::groq::{Message, ModelClient, ModelError};
use crate::schema::Ingredient;

const SYSTEM_PROMPT: &str = "You are a precise ingredient extraction tool. You ONLY output \
comma-separated ingredient lists with no additional text whatsoever.";

pub struct IngredientNormalizer {
    model: Arc<dyn ModelClient>,
}

impl IngredientNormalizer {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }

    /// Normalize raw extracted text into discrete ingredient names.
    ///
    /// Duplicates are preserved; they collapse later when the resolver uses
    /// names as map keys. Empty input short-circuits without a model call,
    /// since a label with no readable spans has no ingredients to extract.
    pub async fn normalize(&self, raw_text: &str) -> Result<Vec<Ingredient>, ModelError> {
        if raw_text.trim().is_empty() {
            debug!("Normalizer: empty input, skipping model call");
            return Ok(Vec::new());
        }

        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(format!(
                "Extract ingredients from: {}\n\nOutput format: ingredient1, ingredient2, ingredient3",
                raw_text
            )),
        ];

        let response = self.model.complete(messages, false).await?;
        let ingredients = split_ingredients(&response);

        info!("Normalizer: found {} ingredients", ingredients.len());
        Ok(ingredients)
    }
}

/// Split a comma-separated model response into ingredients: trim whitespace,
/// drop empty tokens, title-case each name.
fn split_ingredients(response: &str) -> Vec<Ingredient> {
    response
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| Ingredient::new(title_case(token)))
        .collect()
}

/// Title-case a name: uppercase each letter that follows a non-letter,
/// lowercase the rest. Hyphenated words get a capital after the hyphen.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_is_alpha = false;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if prev_is_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_is_alpha = true;
        } else {
            out.push(ch);
            prev_is_alpha = false;
        }
    }
    out
}
