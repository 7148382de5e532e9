//! Ingredient health analysis server.
//!
//! Accepts a food label photo, extracts readable text via an OCR sidecar,
//! normalizes it into ingredient names, and rates each one against a
//! persistent assessment cache with a generative-model fallback.

mod config;
mod groq;
mod normalizer;
mod ocr;
mod pipeline;
mod resolver;
mod schema;
mod store;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use config::Settings;
use groq::GroqClient;
use normalizer::IngredientNormalizer;
use ocr::{sidecar::SidecarOcr, TextExtractor};
use pipeline::{AnalysisError, AnalysisPipeline};
use resolver::{RatingResolver, ResolveError};
use schema::AnalysisResult;
use std::sync::Arc;
use store::SupabaseStore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<AnalysisPipeline>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "nutriscan=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    // One connection pool shared by every outbound client
    let http = reqwest::Client::new();

    let engine = Arc::new(SidecarOcr::new(
        http.clone(),
        settings.ocr_url.clone(),
        settings.ocr_language.clone(),
    ));
    let model = Arc::new(GroqClient::new(
        http.clone(),
        settings.groq_api_key.clone(),
        settings.model.clone(),
    ));
    let cache = Arc::new(SupabaseStore::new(
        http,
        settings.supabase_url.clone(),
        settings.supabase_service_role_key.clone(),
    ));
    info!("Clients initialized (ocr={}, model={})", settings.ocr_url, settings.model);

    let pipeline = AnalysisPipeline::new(
        TextExtractor::new(engine, settings.ocr_confidence_threshold),
        IngredientNormalizer::new(model.clone()),
        RatingResolver::new(model, cache),
    );

    let state = AppState {
        pipeline: Arc::new(pipeline),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/analyze", post(analyze_image))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", settings.port)).await?;
    info!("Server listening on http://0.0.0.0:{}", settings.port);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Upload a label photo and analyze its ingredients.
async fn analyze_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisResult>, (StatusCode, String)> {
    let mut image_bytes = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("file") {
            image_bytes = field
                .bytes()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e)))?
                .to_vec();
            break;
        }
    }

    if image_bytes.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Empty file received".to_string()));
    }

    info!("Received image ({} bytes)", image_bytes.len());

    let result = state.pipeline.analyze(&image_bytes).await.map_err(|e| {
        error!("Analysis failed: {}", e);
        (error_status(&e), format!("Analysis failed: {}", e))
    })?;

    info!("Analysis complete: {}", result.id);
    Ok(Json(result))
}

/// Map each stage's failure to a transport status: unreadable images are the
/// client's problem, upstream outages are gateway errors, store failures are
/// ours.
fn error_status(error: &AnalysisError) -> StatusCode {
    match error {
        AnalysisError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AnalysisError::Normalization(_) => StatusCode::BAD_GATEWAY,
        AnalysisError::Resolution(ResolveError::Model(_)) => StatusCode::BAD_GATEWAY,
        AnalysisError::Resolution(ResolveError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groq::ModelError;
    use crate::ocr::ExtractionError;
    use crate::store::StoreError;

    #[test]
    fn test_error_status_mapping() {
        let extraction =
            AnalysisError::Extraction(ExtractionError(anyhow::anyhow!("corrupt image")));
        assert_eq!(error_status(&extraction), StatusCode::UNPROCESSABLE_ENTITY);

        let model = AnalysisError::Normalization(ModelError::EmptyResponse);
        assert_eq!(error_status(&model), StatusCode::BAD_GATEWAY);

        let store = AnalysisError::Resolution(ResolveError::Store(StoreError::Api {
            status: 500,
            message: "boom".to_string(),
        }));
        assert_eq!(error_status(&store), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
