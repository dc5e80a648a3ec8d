#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::Engine as _;
use futures::future::BoxFuture;
use invoice_validate_rust::config::ValidationMode;
use invoice_validate_rust::error::ExtractError;
use invoice_validate_rust::models::MissingFieldPolicy;
use invoice_validate_rust::service::{VisionModel, VisionRequest};
use invoice_validate_rust::{router, AppState, InvoiceService, SessionStore};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tower::ServiceExt;

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake-image";

pub fn png_base64() -> String {
    base64::engine::general_purpose::STANDARD.encode(PNG_BYTES)
}

/// 按顺序返回预设回复的模型替身
pub struct StubModel {
    replies: Mutex<VecDeque<Result<String, ExtractError>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl StubModel {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn failing(error: ExtractError) -> Self {
        let stub = Self::new(vec![]);
        stub.replies.lock().unwrap().push_back(Err(error));
        stub
    }

    /// 回复前等待 `gate` 被通知
    pub fn gated(replies: Vec<&str>, gate: Arc<Notify>) -> Self {
        Self { gate: Some(gate), ..Self::new(replies) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl VisionModel for StubModel {
    fn complete(&self, request: VisionRequest) -> BoxFuture<'_, Result<String, ExtractError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ExtractError::EmptyResponse));
        let gate = self.gate.clone();
        Box::pin(async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            reply
        })
    }

    fn name(&self) -> &str {
        "stub"
    }
}

pub struct TestApp {
    pub app: Router,
    pub model: Arc<StubModel>,
}

impl TestApp {
    pub fn new(model: StubModel) -> Self {
        Self::with_options(model, MissingFieldPolicy::Strict, ValidationMode::Local)
    }

    pub fn with_options(model: StubModel, policy: MissingFieldPolicy, mode: ValidationMode) -> Self {
        let model = Arc::new(model);
        let service = Arc::new(InvoiceService::new(model.clone(), policy, mode));
        let sessions = Arc::new(SessionStore::new(0.1));
        let app = router(AppState { service, sessions }, 10 * 1024 * 1024);
        Self { app, model }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(json_request("POST", uri, body)).await
    }
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
}

/// 构造只含 `file` 字段的 multipart 请求
pub fn multipart_request(uri: &str, file_name: &str, mime_type: &str, bytes: &[u8]) -> Request<Body> {
    let boundary = "invoice-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            file_name, mime_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={}", boundary))
        .body(Body::from(body))
        .unwrap()
}

/// 模型对 "Acme Corp" 发票的提取回复
pub const ACME_EXTRACTION: &str = r#"Here is the invoice:
{
  "invoiceNumber": "INV-1001",
  "invoiceDate": "January 15, 2022",
  "dueDate": "February 14, 2022",
  "vendor": {"name": "Acme Corp", "email": "", "address": "1 Road, Springfield"},
  "customer": {"name": "Bob Buyer", "address": "2 Lane, Shelbyville"},
  "items": [
    {"description": "Widget", "quantity": 2, "unitPrice": 5, "amount": 10},
    {"description": "Gadget", "quantity": "1", "unitPrice": 5, "amount": 5}
  ],
  "subtotal": 0,
  "tax": 1.5,
  "total": 16.5
}
Let me know if you need anything else."#;
