pub mod auth;
pub mod errors;
pub mod health;
pub mod receipts;
pub mod responses;

use crate::config::Config;
use crate::queue::WorkerPool;
use crate::store::receipt_files::ReceiptFiles;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use http::StatusCode;
use std::sync::Arc;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub config: Config,
    pub files: ReceiptFiles,
    pub pool: WorkerPool,
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_size;
    let request_timeout = state.config.request_timeout;

    Router::new()
        .route("/health", get(health::health))
        .route("/receipts", post(receipts::upload_receipt))
        .route("/receipts/{receipt_id}", get(receipts::download_receipt))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .with_state(state)
}
