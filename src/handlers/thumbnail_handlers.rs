//! HTTP handlers for uploading images and viewing generated thumbnails.
//! Multipart parsing and header shaping live here; generation and storage
//! are delegated to `ThumbnailService`.

use crate::{
    errors::AppError,
    models::thumbnail::{Upload, UploadResponse},
    services::thumbnail_service::{ServiceError, ThumbnailService},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use tracing::warn;

/// Multipart field that carries the image.
pub const UPLOAD_FIELD: &str = "file";

/// `POST /upload/` — generate every preset in PNG and WebP.
pub async fn upload_image(
    State(service): State<ThumbnailService>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let upload = read_upload(&mut multipart).await?;
    let filename = upload.filename.clone();

    match service.process_upload(upload).await {
        Ok(response) => Ok(Json(response)),
        Err(err) => {
            warn!("rejected upload `{}`: {}", filename, err);
            Err(err.into())
        }
    }
}

/// `GET /view/{dimension}/{name}` — return a stored thumbnail.
pub async fn view_thumbnail(
    State(service): State<ThumbnailService>,
    Path((dimension, name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let dimension: u32 = dimension.parse().map_err(|_| ServiceError::NotFound)?;
    let artifact = service.retrieve(dimension, &name).await?;
    let length = artifact.bytes.len();

    let mut response = Response::new(Body::from(artifact.bytes));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(artifact.format.mime_type()),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    Ok(response)
}

/// Fallback for unknown routes.
pub async fn not_found() -> AppError {
    AppError::not_found("Not Found")
}

/// Pull the image part out of the form.
///
/// Prefers the field named `file`; otherwise the first part that carries a
/// file name is used.
async fn read_upload(multipart: &mut Multipart) -> Result<Upload, AppError> {
    let mut fallback = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let is_upload_field = field.name() == Some(UPLOAD_FIELD);
        if !is_upload_field && field.file_name().is_none() {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        let upload = Upload {
            filename,
            content_type,
            bytes,
        };

        if is_upload_field {
            return Ok(upload);
        }
        fallback.get_or_insert(upload);
    }

    fallback.ok_or_else(|| AppError::bad_request(format!("missing `{}` field", UPLOAD_FIELD)))
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}
