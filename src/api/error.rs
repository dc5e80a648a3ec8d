use crate::error::{ExtractError, SessionError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// HTTP 层错误，统一返回 `{error}` (无法解析模型输出时附带 `raw`)
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// 提取/校验请求体无法解析
    #[error("{0}")]
    Malformed(String),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Extract(e) => match e {
                ExtractError::MissingImage => StatusCode::BAD_REQUEST,
                ExtractError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Session(e) => match e {
                SessionError::NotFound(_) => StatusCode::NOT_FOUND,
                SessionError::Busy(_) | SessionError::NoInvoice(_) => StatusCode::CONFLICT,
                SessionError::ItemOutOfRange { .. } | SessionError::InvalidValue { .. } => StatusCode::BAD_REQUEST,
            },
            ApiError::Malformed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "Request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %message, "Request rejected");
        }

        let body = match &self {
            ApiError::Extract(ExtractError::NoJsonObject { raw }) => json!({ "error": message, "raw": raw }),
            _ => json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}
