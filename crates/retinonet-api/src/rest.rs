//! REST API handlers

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use retinonet_core::{recommendation_for, ApiConfig, ImageTensor, ModelStatus, RetinoError};
use retinonet_manager::ModelManager;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Retry hint sent when the manager has no backoff of its own
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Application state shared across handlers
pub struct AppState {
    pub manager: ModelManager,
}

/// Create the API router
pub fn create_router(manager: ModelManager, api: &ApiConfig) -> Router {
    let state = Arc::new(AppState { manager });

    let router = Router::new()
        .route("/", get(home))
        .route("/status", get(get_status))
        .route("/ready", get(get_ready))
        .route("/predict/", post(predict))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if api.cors_enabled {
        router.layer(cors_layer(&api.cors_origins))
    } else {
        router
    }
}

/// CORS policy for the configured origins
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

/// Error returned by handlers
#[derive(Debug)]
pub enum ApiError {
    /// Model not loaded; the client should retry later
    Unavailable { message: String, retry_after: u64 },
    /// Request could not be turned into model input
    BadRequest(String),
    /// Unexpected failure
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unavailable {
                message,
                retry_after,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, retry_after.to_string())],
                Json(ErrorBody { detail: message }),
            )
                .into_response(),
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorBody { detail: message })).into_response()
            }
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody { detail: message }),
            )
                .into_response(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Debug, Serialize)]
struct HomeResponse {
    message: &'static str,
}

/// Service banner
async fn home() -> Json<HomeResponse> {
    Json(HomeResponse {
        message: "RetinoNet API is running",
    })
}

/// Model lifecycle status; never triggers a load
async fn get_status(State(state): State<Arc<AppState>>) -> Json<ModelStatus> {
    Json(state.manager.status().await)
}

/// Readiness response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub ready: bool,
}

/// Readiness probe: 200 when the model is loaded, 503 otherwise
async fn get_ready(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadyResponse>) {
    let ready = state.manager.is_model_loaded();
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(ReadyResponse { ready }))
}

/// Request to screen an image
#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
    /// Packed RGB8 pixels, row-major
    pub pixels: Vec<u8>,
}

/// Screening result
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub request_id: Uuid,
    pub predictions: BTreeMap<String, String>,
    pub top_class: String,
    pub recommendation: String,
}

/// Screen an image with the loaded model
async fn predict(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, ApiError> {
    let request_id = Uuid::new_v4();

    let tensor = ImageTensor::from_rgb8(req.width, req.height, &req.pixels)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let model = match state.manager.try_get_model().await {
        Ok(model) => model,
        Err(e) => {
            let retry_after = match e {
                RetinoError::RetryDeferred(remaining) => {
                    (remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)).max(1)
                }
                _ => state
                    .manager
                    .status()
                    .await
                    .retry_in_secs
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            };
            warn!(
                request_id = %request_id,
                error = %e,
                retry_after = retry_after,
                "Model not ready for prediction"
            );
            return Err(ApiError::Unavailable {
                message: "Model is not loaded yet, please retry later".to_string(),
                retry_after,
            });
        }
    };

    let prediction = tokio::task::spawn_blocking(move || model.predict(&tensor))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let top_class = prediction
        .top()
        .map(|s| s.class_name.clone())
        .ok_or_else(|| ApiError::Internal("model produced no scores".to_string()))?;

    info!(
        request_id = %request_id,
        top_class = %top_class,
        width = req.width,
        height = req.height,
        "Prediction complete"
    );

    Ok(Json(PredictResponse {
        request_id,
        predictions: prediction.formatted(),
        recommendation: recommendation_for(&top_class).to_string(),
        top_class,
    }))
}
