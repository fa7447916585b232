//! Gateway - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP frame submission onto the broker topic
//! - Request validation
//! - Health and processing statistics endpoints

use axum::extract::{Multipart, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::consumer::FrameEnvelope;
use crate::error::{Error, Result};
use crate::models::{ingest_timestamp, ApiResponse, HealthResponse};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/analyze", post(submit_frame))
        .route("/api/stats", get(processing_stats))
        .route("/api/incidents", get(list_incidents))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let ledger_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        // Startup fails fast when the broker is unreachable, so a running
        // process implies the initial connection succeeded
        broker_connected: true,
        ledger_connected: ledger_ok,
    };

    Json(response)
}

/// Processing counters from the consumer loop
pub async fn processing_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.stats.snapshot()))
}

/// All incidents currently on the ledger
pub async fn list_incidents(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let incidents = state.store.list_incidents().await?;
    Ok(Json(ApiResponse::success(incidents)))
}

/// Accept a frame over multipart and enqueue it for analysis.
///
/// Fields: `image` (required), `organization_id` (required non-empty),
/// `location` and `timestamp` (optional). The frame is published to the
/// broker topic; analysis happens asynchronously in the consumer loop.
pub async fn submit_frame(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut image: Option<Vec<u8>> = None;
    let mut organization_id: Option<String> = None;
    let mut location: Option<String> = None;
    let mut timestamp: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::Validation(format!("failed to read image: {}", e)))?;
                image = Some(bytes.to_vec());
            }
            "organization_id" => {
                organization_id = Some(field.text().await.map_err(|e| {
                    Error::Validation(format!("failed to read organization_id: {}", e))
                })?);
            }
            "location" => {
                location = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| Error::Validation(format!("failed to read location: {}", e)))?,
                );
            }
            "timestamp" => {
                timestamp = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| Error::Validation(format!("failed to read timestamp: {}", e)))?,
                );
            }
            _ => {}
        }
    }

    let image = image
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| Error::Validation("image field is required".to_string()))?;
    let organization_id = organization_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| Error::Validation("organization_id is required".to_string()))?;

    let envelope = FrameEnvelope {
        image: BASE64.encode(&image),
        timestamp: Some(
            timestamp
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(ingest_timestamp),
        ),
        location,
        organization_id,
    };

    state.publisher.publish(&envelope).await?;

    tracing::info!(
        organization_id = %envelope.organization_id,
        location = envelope.location.as_deref().unwrap_or(crate::models::DEFAULT_LOCATION),
        bytes = image.len(),
        "Frame queued for analysis"
    );

    Ok(Json(ApiResponse::success(json!({
        "status": "queued",
        "location": envelope.location,
        "timestamp": envelope.timestamp,
        "image_bytes": image.len(),
    }))))
}
