pub mod search;
pub mod snippet;
pub mod statistics;

use anyhow::Result;
use axum::{
    extract::{Form, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use search::{SearchEngine, SearchError, SearchQuery, SearchResponse};
use serde::{Deserialize, Serialize};
use sitesearch_core::{AppConfig, Store};
use sitesearch_indexer::{IndexingResponse, IndexingService};
use statistics::StatisticsResponse;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub indexing: IndexingService,
    pub search: Arc<SearchEngine>,
}

impl AppState {
    /// Needs a running tokio runtime for the indexing service.
    pub fn new(config: AppConfig, store: Store) -> Result<Self> {
        let search = Arc::new(SearchEngine::new(store.clone(), config.language));
        let indexing = IndexingService::new(config, store)?;
        Ok(Self { indexing, search })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub result: bool,
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { result: false, error: message.into() }))
}

#[derive(Debug, Deserialize)]
pub struct IndexPageForm {
    pub url: String,
}

pub fn build_app(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/startIndexing", get(start_indexing))
        .route("/api/stopIndexing", get(stop_indexing))
        .route("/api/indexPage", post(index_page))
        .route("/api/search", get(search_handler))
        .route("/api/statistics", get(statistics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn start_indexing(State(state): State<AppState>) -> Json<IndexingResponse> {
    Json(state.indexing.start())
}

async fn stop_indexing(State(state): State<AppState>) -> Json<IndexingResponse> {
    Json(state.indexing.stop())
}

async fn index_page(State(state): State<AppState>, Form(form): Form<IndexPageForm>) -> Json<IndexingResponse> {
    Json(state.indexing.index_page(&form.url).await)
}

async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    let engine = state.search.clone();
    let outcome = tokio::task::spawn_blocking(move || engine.search(&params))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    match outcome {
        Ok(response) => Ok(Json(response)),
        Err(e @ SearchError::EmptyQuery) => Err(api_error(StatusCode::BAD_REQUEST, e.to_string())),
        Err(e) => {
            error!(error = %e, "search failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn statistics_handler(State(state): State<AppState>) -> Result<Json<StatisticsResponse>, ApiError> {
    let indexing = &state.indexing;
    statistics::collect(indexing.config(), indexing.store(), indexing.is_indexing())
        .map(Json)
        .map_err(|e| {
            error!(error = %e, "statistics failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })
}
