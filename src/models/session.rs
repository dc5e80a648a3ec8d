use super::{InvoiceRecord, ValidationReport};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// 最近一次上传的文件信息
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadInfo {
    pub file_name: Option<String>,
    pub mime_type: String,
    pub size_bytes: usize,
    pub uploaded_at: DateTime<Utc>,
}

/// 单个用户会话的界面状态
///
/// `generation` 在每次重置时递增，用于丢弃重置前发出的请求结果。
/// `last_active` 每次访问时刷新，闲置超时的会话会被清理。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub invoice: Option<InvoiceRecord>,
    pub upload: Option<UploadInfo>,
    pub last_validation: Option<ValidationReport>,
    pub in_flight: bool,
    pub last_active: DateTime<Utc>,
    #[serde(skip)]
    pub generation: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            invoice: None,
            upload: None,
            last_validation: None,
            in_flight: false,
            last_active: Utc::now(),
            generation: 0,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
