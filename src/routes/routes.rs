//! Defines routes for thumbnail upload, retrieval and health.
//!
//! ## Structure
//! - **Upload**
//!   - `POST   /upload/` — multipart image upload; generates every preset
//!
//! - **Retrieval**
//!   - `GET    /view/{dimension}/{name}` — one stored thumbnail
//!   - `GET    /thumbnails/{dimension}/{name}` — static, read-only file tree
//!
//! - **Health checks**
//!   - `GET    /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        thumbnail_handlers::{not_found, upload_image, view_thumbnail},
    },
    services::thumbnail_service::ThumbnailService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::path::Path;
use tower_http::{services::ServeDir, trace::TraceLayer};

/// Build and return the router for all thumbnail routes.
///
/// `thumbnail_dir` is the on-disk tree mounted at `/thumbnails`; uploads
/// larger than `max_upload_bytes` are rejected with 413.
pub fn routes(thumbnail_dir: &Path, max_upload_bytes: usize) -> Router<ThumbnailService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/upload/",
            post(upload_image).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/view/{dimension}/{name}", get(view_thumbnail))
        .nest_service("/thumbnails", ServeDir::new(thumbnail_dir))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
}
