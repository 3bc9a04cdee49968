use crate::image_ops::image_types::{Extensions, MimeType};
use crate::image_ops::validation::validate_upload;
use crate::queue::ResizeTask;
use crate::routes::AppState;
use crate::routes::auth::UsernameToken;
use crate::routes::errors::{DownloadErrorType, UploadErrorType};
use crate::routes::responses::{ApiError, ImageResponse, api_error};
use crate::store::receipt_files::StoreError;
use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Path, Query, State};
use http::{Response, StatusCode, header};
use log::{debug, error, info};
use sanitize_filename::sanitize;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Multipart field carrying the photo
pub const RECEIPT_FIELD: &str = "receipt";

const MAX_RECEIPT_ID_LEN: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub receipt_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    #[serde(default)]
    pub size: String,
}

async fn read_receipt_field(
    multipart: &mut Multipart,
) -> Result<Bytes, ApiError<UploadErrorType>> {
    let invalid_body =
        |status, detail: String| api_error(status, detail, Some(UploadErrorType::InvalidBody));

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| invalid_body(err.status(), err.body_text()))?
    {
        if field.name() == Some(RECEIPT_FIELD) {
            return field
                .bytes()
                .await
                .map_err(|err| invalid_body(err.status(), err.body_text()));
        }
    }

    Err(invalid_body(
        StatusCode::BAD_REQUEST,
        format!("multipart field \"{RECEIPT_FIELD}\" is required"),
    ))
}

/// Store the original and queue it for resizing
///
/// Responds as soon as the task is queued, variants show up on download once a worker is done
pub async fn upload_receipt(
    State(state): State<Arc<AppState>>,
    UsernameToken(owner): UsernameToken,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError<UploadErrorType>> {
    let data = read_receipt_field(&mut multipart).await?;
    debug!("Received {} bytes from {}", data.len(), owner);

    let extension = validate_upload(
        &data,
        state.config.min_image_width,
        state.config.min_image_height,
    )
    .map_err(|err| {
        api_error(
            StatusCode::BAD_REQUEST,
            err.to_string(),
            Some(UploadErrorType::InvalidImage),
        )
    })?;

    let artifact = state
        .files
        .store_original(&owner, extension.name(), &data)
        .await
        .map_err(|err| {
            error!("Can't store upload of {}: {}", owner, err);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "can't store receipt",
                Some(UploadErrorType::StorageError),
            )
        })?;

    // the server stops taking requests before the pool closes, so a rejection means a full queue
    let task = ResizeTask::new(artifact.clone(), state.files.resized_dir());
    if !state.pool.submit(task) {
        state.files.discard_original(&artifact).await;
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "resize queue is full, try again later",
            Some(UploadErrorType::QueueFull),
        ));
    }

    info!(
        "Queued receipt {} of {}, {} pending",
        artifact.receipt_id,
        owner,
        state.pool.pending()
    );
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            receipt_id: artifact.receipt_id,
        }),
    ))
}

fn is_valid_receipt_id(receipt_id: &str) -> bool {
    (1..=MAX_RECEIPT_ID_LEN).contains(&receipt_id.len())
        && receipt_id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Serve a stored variant, or the unscaled copy when no size is given
///
/// Until the resize worker published the file this is a plain 404
pub async fn download_receipt(
    State(state): State<Arc<AppState>>,
    UsernameToken(owner): UsernameToken,
    Path(receipt_id): Path<String>,
    Query(params): Query<DownloadParams>,
) -> Result<ImageResponse, ApiError<DownloadErrorType>> {
    if !is_valid_receipt_id(&receipt_id) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "invalid receipt id",
            Some(DownloadErrorType::InvalidReceiptId),
        ));
    }
    if !state.config.dimensions.is_allowed_label(&params.size) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!(
                "invalid size {:?}, expected one of: {}",
                params.size, state.config.dimensions
            ),
            Some(DownloadErrorType::InvalidSize),
        ));
    }

    let stored = state
        .files
        .load_variant(&receipt_id, &params.size, &owner)
        .await
        .map_err(|err| match err {
            StoreError::NotFound(_) => api_error(
                StatusCode::NOT_FOUND,
                "receipt not found",
                Some(DownloadErrorType::NotFound),
            ),
            err => {
                error!("Can't read receipt {}: {}", receipt_id, err);
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "can't read receipt",
                    Some(DownloadErrorType::StorageError),
                )
            }
        })?;
    debug!("Serving {}", stored.artifact.path.display());

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, Extensions::Jpeg.mime_type())
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "inline; filename=\"{}\"",
                sanitize(&stored.artifact.file_name)
            ),
        )
        .header(
            header::CACHE_CONTROL,
            format!("private, max-age={}", state.config.client_cache_ttl),
        );
    if let Some(modified) = stored.modified {
        response = response.header(header::LAST_MODIFIED, httpdate::fmt_http_date(modified));
    }

    response
        .body(Body::from(stored.data))
        .map(ImageResponse)
        .map_err(|err| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
                Some(DownloadErrorType::StorageError),
            )
        })
}
