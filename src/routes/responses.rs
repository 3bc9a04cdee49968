use crate::routes::errors::ErrorResponse;
use axum::Json;
use axum::body::Body;
use axum::response::IntoResponse;
use http::{Response, StatusCode};
use serde::Serialize;

#[derive(Debug)]
pub struct ApiError<T> {
    status: StatusCode,
    detail: String,
    error_type: Option<T>,
}

impl<T: Serialize> IntoResponse for ApiError<T> {
    fn into_response(self) -> axum::response::Response {
        let payload = ErrorResponse {
            detail: self.detail,
            error_type: self.error_type,
        };
        (self.status, Json(payload)).into_response()
    }
}

pub struct ImageResponse(pub Response<Body>);

impl IntoResponse for ImageResponse {
    fn into_response(self) -> axum::response::Response {
        self.0
    }
}

pub fn api_error<T>(
    status: StatusCode,
    detail: impl Into<String>,
    error_type: Option<T>,
) -> ApiError<T> {
    ApiError {
        status,
        detail: detail.into(),
        error_type,
    }
}
