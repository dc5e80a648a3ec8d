use thiserror::Error;

/// 视觉模型调用边界上的错误
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("No image data provided")]
    MissingImage,

    #[error("unsupported file type: {0} (only image/* is accepted)")]
    UnsupportedMediaType(String),

    #[error("invalid base64 image data: {0}")]
    InvalidImageEncoding(#[from] base64::DecodeError),

    #[error("model API key not configured (set INVOICE_MODEL_API_KEY or OPENAI_API_KEY)")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("empty response from model")]
    EmptyResponse,

    #[error("Model did not return valid JSON")]
    NoJsonObject { raw: String },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExtractError {
    /// 可重试的瞬时错误: 连接失败、超时、429、5xx
    pub fn is_transient(&self) -> bool {
        match self {
            ExtractError::Http(e) => e.is_timeout() || e.is_connect(),
            ExtractError::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// 会话操作错误
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(uuid::Uuid),

    #[error("session {0} already has a request in flight")]
    Busy(uuid::Uuid),

    #[error("session {0} has no invoice loaded")]
    NoInvoice(uuid::Uuid),

    #[error("item index {index} out of range ({len} items)")]
    ItemOutOfRange { index: usize, len: usize },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
