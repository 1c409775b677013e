use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, MatchedPath, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::extract::{ExtractionError, RecipeExtractor};
use crate::fetch::FetchError;
use crate::models::{parse_http_url, ExtractRequest, ExtractResponse};
use crate::providers::ModelError;

/// Shared across handlers. Immutable; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<RecipeExtractor>,
}

impl AppState {
    pub fn new(extractor: RecipeExtractor) -> Self {
        Self {
            extractor: Arc::new(extractor),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/extract", post(extract_endpoint))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let path = request
                        .extensions()
                        .get::<MatchedPath>()
                        .map(MatchedPath::as_str)
                        .unwrap_or(request.uri().path());
                    tracing::info_span!("http_request", method = %request.method(), path = %path)
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "Recipe Extractor API",
        "endpoints": {
            "/extract": "POST - Extract recipe data from a URL",
            "/health": "GET - Health check"
        }
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn extract_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<ExtractRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            return failure(
                StatusCode::BAD_REQUEST,
                format!("Invalid request body: {}", rejection.body_text()),
            )
        }
    };

    let url = match parse_http_url(&req.url) {
        Ok(url) => url,
        Err(msg) => {
            return error_response(&ExtractionError::InvalidUrl(msg));
        }
    };

    match state.extractor.extract(&url).await {
        Ok(recipe) => (StatusCode::OK, Json(ExtractResponse::ok(recipe))).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Status for each failure kind. Fetch and model failures are upstream
/// problems (502), timeouts on either side are 504.
pub fn status_for(error: &ExtractionError) -> StatusCode {
    match error {
        ExtractionError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
        ExtractionError::Fetch(FetchError::UnsupportedContent(_) | FetchError::TooLarge(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ExtractionError::Fetch(FetchError::Timeout(_))
        | ExtractionError::Model(ModelError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        ExtractionError::Fetch(_)
        | ExtractionError::Model(_)
        | ExtractionError::MalformedOutput { .. } => StatusCode::BAD_GATEWAY,
        ExtractionError::PageProcessing(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &ExtractionError) -> Response {
    let status = status_for(error);
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %error, "extraction failed");
    } else {
        tracing::warn!(status = status.as_u16(), error = %error, "extraction rejected");
    }
    failure(status, error.to_string())
}

fn failure(status: StatusCode, message: String) -> Response {
    (status, Json(ExtractResponse::failure(message))).into_response()
}
