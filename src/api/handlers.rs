use super::error::ApiError;
use super::AppState;
use crate::error::ExtractError;
use crate::models::{InvoiceRecord, LineItemField, SessionState, UploadInfo, ValidationErrorSet};
use crate::service::{ImagePayload, RequestGuard};
use axum::{
    extract::{
        rejection::JsonRejection, FromRequest, Json, Multipart, Path, Query, Request, State,
    },
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 可选的会话参数 `?session=<id>`
#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session: Option<Uuid>,
}

/// 提取请求 (JSON 形式)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractRequest {
    pub image_base64: Option<String>,
    #[serde(default)]
    pub file_type: String,
    pub form_data: Option<InvoiceRecord>,
}

/// 校验请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    #[serde(default)]
    pub form_data: InvoiceRecord,
    pub image_base64: Option<String>,
    #[serde(default)]
    pub file_type: String,
}

#[derive(Debug, Serialize)]
pub struct ValidationSuccess {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ValidationFailure {
    pub errors: ValidationErrorSet,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub session_id: Uuid,
}

/// 明细编辑请求
#[derive(Debug, Deserialize)]
pub struct ItemEdit {
    pub field: LineItemField,
    pub value: Value,
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 上传发票并提取字段
///
/// 支持 multipart (`file` 字段，可附 `formData`) 或 JSON `{imageBase64, fileType, formData?}`。
pub async fn extract(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    request: Request,
) -> Result<Json<InvoiceRecord>, ApiError> {
    let (image, form) = read_upload(request).await?;
    image.ensure_supported()?;

    let guard = match query.session {
        Some(id) => Some(RequestGuard::new(
            state.sessions.clone(),
            state.sessions.begin_upload(
                id,
                UploadInfo {
                    file_name: image.file_name.clone(),
                    mime_type: image.mime_type.clone(),
                    size_bytes: image.bytes.len(),
                    uploaded_at: Utc::now(),
                },
            )?,
        )),
        None => None,
    };

    let record = state.service.extract(image, form.as_ref()).await?;
    if let Some(guard) = guard {
        guard.complete_extraction(record.clone());
    }
    Ok(Json(record))
}

/// 提交表单并校验
pub async fn validate(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    payload: Result<Json<ValidateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::Malformed(e.body_text()))?;

    let data = req
        .image_base64
        .filter(|s| !s.trim().is_empty())
        .ok_or(ExtractError::MissingImage)?;
    let image = ImagePayload::from_base64(&data, &req.file_type)?;
    image.ensure_supported()?;

    let guard = match query.session {
        Some(id) => Some(RequestGuard::new(state.sessions.clone(), state.sessions.begin_validation(id)?)),
        None => None,
    };

    let report = state.service.validate(&req.form_data, image).await?;
    if let Some(guard) = guard {
        guard.complete_validation(req.form_data, report.clone());
    }

    let response = if report.passed() {
        (StatusCode::OK, Json(ValidationSuccess { message: "Validation successful" })).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(ValidationFailure { errors: report.errors })).into_response()
    };
    Ok(response)
}

/// 创建会话
pub async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionCreated>) {
    let session_id = state.sessions.create();
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionState>, ApiError> {
    Ok(Json(state.sessions.get(id)?))
}

/// 用户修改表单 (整体替换)
pub async fn replace_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<InvoiceRecord>, JsonRejection>,
) -> Result<Json<InvoiceRecord>, ApiError> {
    let Json(invoice) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    Ok(Json(state.sessions.replace_invoice(id, invoice)?))
}

/// 修改单个明细字段，返回重算后的发票
pub async fn edit_item(
    State(state): State<AppState>,
    Path((id, index)): Path<(Uuid, usize)>,
    payload: Result<Json<ItemEdit>, JsonRejection>,
) -> Result<Json<InvoiceRecord>, ApiError> {
    let Json(edit) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    Ok(Json(state.sessions.edit_item(id, index, edit.field, &edit.value)?))
}

pub async fn reset_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.sessions.reset(id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.sessions.remove(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// 读取上传的图片和可选的表单值
async fn read_upload(request: Request) -> Result<(ImagePayload, Option<InvoiceRecord>), ApiError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if !is_multipart {
        let Json(req) = Json::<ExtractRequest>::from_request(request, &())
            .await
            .map_err(|e| ApiError::Malformed(e.body_text()))?;
        let data = req
            .image_base64
            .filter(|s| !s.trim().is_empty())
            .ok_or(ExtractError::MissingImage)?;
        let image = ImagePayload::from_base64(&data, &req.file_type)?;
        return Ok((image, req.form_data));
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| ApiError::Malformed(e.body_text()))?;

    let mut image = None;
    let mut form = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Malformed(e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(|e| ApiError::Malformed(e.body_text()))?;
                image = Some(ImagePayload { bytes: bytes.to_vec(), mime_type, file_name });
            }
            Some("formData") => {
                let text = field.text().await.map_err(|e| ApiError::Malformed(e.body_text()))?;
                let record = serde_json::from_str(&text)
                    .map_err(|e| ApiError::Malformed(format!("invalid formData: {}", e)))?;
                form = Some(record);
            }
            _ => {}
        }
    }

    let image = image.ok_or(ExtractError::MissingImage)?;
    Ok((image, form))
}
