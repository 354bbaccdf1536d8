use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::SearchError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
pub struct AppError {
    pub status: StatusCode,
    pub error: anyhow::Error,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self { status, error: anyhow::anyhow!(msg.into()) }
    }
}

/// 搜索错误对应的状态码
pub fn search_error_status(err: &SearchError) -> StatusCode {
    match err {
        SearchError::Extraction(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        SearchError::Extraction(_) => StatusCode::BAD_REQUEST,
        SearchError::InsufficientDescriptor(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SearchError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.error.to_string() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let error = err.into();
        let status = match error.downcast_ref::<SearchError>() {
            Some(e) => search_error_status(e),
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, error }
    }
}
