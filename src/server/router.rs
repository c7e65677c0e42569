//! Route table and the non-streaming handlers
//!
//! All routes hang off the management base path. With the endpoint
//! disabled no logfile route is registered, so every one answers 404.

use super::{sse, websocket, LogFileEndpoint};
use crate::error::StreamError;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

/// Build the axum router
pub fn build_router(base_path: &str, endpoint: Option<Arc<LogFileEndpoint>>) -> Router {
    let Some(endpoint) = endpoint else {
        return Router::new();
    };

    let base = base_path.trim_end_matches('/');
    Router::new()
        .route(&format!("{}/logfile", base), get(download))
        .route(&format!("{}/logfile/stream", base), get(sse::stream_logfile))
        .route(&format!("{}/logfile/ws", base), get(websocket::stream_logfile))
        .route(&format!("{}/logfile/status", base), get(status))
        .with_state(endpoint)
}

/// Whole current file as plain text
async fn download(State(endpoint): State<Arc<LogFileEndpoint>>) -> Result<Response, StreamError> {
    let path = endpoint.log_file.path.clone();
    let content = tokio::task::spawn_blocking(move || std::fs::read(&path))
        .await
        .map_err(|e| StreamError::Io {
            path: endpoint.log_file.path.clone(),
            source: std::io::Error::other(e),
        })?
        .map_err(|e| StreamError::Io {
            path: endpoint.log_file.path.clone(),
            source: e,
        })?;

    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], content).into_response())
}

async fn status(State(endpoint): State<Arc<LogFileEndpoint>>) -> Json<serde_json::Value> {
    Json(json!({
        "file": endpoint.log_file.path.display().to_string(),
        "source": endpoint.log_file.source.key(),
        "watchers": endpoint.broadcaster.status(),
    }))
}
