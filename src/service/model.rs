use crate::config::ModelConfig;
use crate::error::ExtractError;
use base64::Engine as _;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// 上传的发票图片
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: Option<String>,
}

impl ImagePayload {
    /// 从 base64 (可带 `data:<mime>;base64,` 前缀) 构造
    pub fn from_base64(data: &str, mime_type: &str) -> Result<Self, ExtractError> {
        let (mime_type, encoded) = match data.strip_prefix("data:").and_then(|rest| rest.split_once(";base64,")) {
            Some((embedded_mime, encoded)) if mime_type.trim().is_empty() => (embedded_mime, encoded),
            Some((_, encoded)) => (mime_type, encoded),
            None => (mime_type, data),
        };

        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
        Ok(Self {
            bytes,
            mime_type: mime_type.trim().to_string(),
            file_name: None,
        })
    }

    /// 只接受 `image/*`；PDF 及其他类型在调用模型前拒绝
    pub fn ensure_supported(&self) -> Result<(), ExtractError> {
        if self.bytes.is_empty() {
            return Err(ExtractError::MissingImage);
        }
        if !self.mime_type.starts_with("image/") {
            return Err(ExtractError::UnsupportedMediaType(self.mime_type.clone()));
        }
        Ok(())
    }

    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// 一次视觉模型请求: 提示词 + 图片
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub prompt: String,
    pub image: ImagePayload,
}

/// 视觉语言模型接口，返回模型原始文本
pub trait VisionModel: Send + Sync {
    fn complete(&self, request: VisionRequest) -> BoxFuture<'_, Result<String, ExtractError>>;

    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: String,
    detail: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// OpenAI 兼容的 chat-completions 视觉模型客户端
///
/// 对瞬时错误 (连接失败、超时、429、5xx) 做有限次指数退避重试。
pub struct OpenAiVisionClient {
    client: reqwest::Client,
    config: ModelConfig,
    api_key: String,
}

impl OpenAiVisionClient {
    /// 从环境变量读取 API key: `INVOICE_MODEL_API_KEY`，其次 `OPENAI_API_KEY`
    pub fn from_env(config: ModelConfig) -> Result<Self, ExtractError> {
        let api_key = std::env::var("INVOICE_MODEL_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| ExtractError::MissingApiKey)?;
        Self::new(config, api_key)
    }

    pub fn new(config: ModelConfig, api_key: String) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config, api_key })
    }

    async fn complete_with_retry(&self, request: VisionRequest) -> Result<String, ExtractError> {
        let max_backoff = Duration::from_millis(self.config.max_backoff_ms);
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms).min(max_backoff);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.send_once(&request).await {
                Ok(content) => return Ok(content),
                Err(e) if e.is_transient() && attempt <= self.config.max_retries => {
                    warn!(
                        attempt,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Transient model error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff, max_backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, request: &VisionRequest) -> Result<String, ExtractError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: &request.prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: request.image.data_url(),
                            detail: &self.config.image_detail,
                        },
                    },
                ],
            }],
            response_format: ResponseFormat { kind: "json_object" },
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        info!(
            model = %self.config.model,
            mime_type = %request.image.mime_type,
            image_bytes = request.image.bytes.len(),
            "Calling vision model"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Upstream { status: status.as_u16(), body });
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ExtractError::EmptyResponse)
    }
}

/// 指数退避: 翻倍并封顶，不会溢出
fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

impl VisionModel for OpenAiVisionClient {
    fn complete(&self, request: VisionRequest) -> BoxFuture<'_, Result<String, ExtractError>> {
        Box::pin(self.complete_with_retry(request))
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_with_data_url_prefix() {
        let image = ImagePayload::from_base64("data:image/png;base64,aGVsbG8=", "").unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes, b"hello");
        assert_eq!(image.data_url(), "data:image/png;base64,aGVsbG8=");
    }

    #[test]
    fn explicit_file_type_wins_over_embedded() {
        let image = ImagePayload::from_base64("data:image/png;base64,aGVsbG8=", "image/jpeg").unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
    }

    #[test]
    fn bad_base64_is_an_error() {
        assert!(matches!(
            ImagePayload::from_base64("***", "image/png"),
            Err(ExtractError::InvalidImageEncoding(_))
        ));
    }

    #[test]
    fn pdf_and_empty_images_rejected() {
        let pdf = ImagePayload { bytes: vec![1], mime_type: "application/pdf".into(), file_name: None };
        assert!(matches!(pdf.ensure_supported(), Err(ExtractError::UnsupportedMediaType(_))));

        let empty = ImagePayload { bytes: vec![], mime_type: "image/png".into(), file_name: None };
        assert!(matches!(empty.ensure_supported(), Err(ExtractError::MissingImage)));
    }

    #[test]
    fn upstream_status_classification() {
        let busy = ExtractError::Upstream { status: 429, body: String::new() };
        let broken = ExtractError::Upstream { status: 503, body: String::new() };
        let denied = ExtractError::Upstream { status: 401, body: String::new() };
        assert!(busy.is_transient());
        assert!(broken.is_transient());
        assert!(!denied.is_transient());
        assert!(!ExtractError::EmptyResponse.is_transient());
    }

    #[test]
    fn chat_request_shape() {
        let body = ChatRequest {
            model: "gpt-4o",
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: "hi" },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: "data:image/png;base64,AA==".into(), detail: "high" },
                    },
                ],
            }],
            response_format: ResponseFormat { kind: "json_object" },
            temperature: 0.0,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(json["messages"][0]["content"][1]["image_url"]["detail"], "high");
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let cap = Duration::from_millis(8_000);
        assert_eq!(next_backoff(Duration::from_millis(500), cap), Duration::from_millis(1_000));
        assert_eq!(next_backoff(Duration::from_millis(6_000), cap), cap);
        assert_eq!(next_backoff(Duration::MAX, cap), cap);
    }

    mod retry {
        use super::*;
        use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        #[derive(Clone)]
        struct Upstream {
            hits: Arc<AtomicUsize>,
            failures: usize,
            failure_status: StatusCode,
        }

        async fn chat_completions(State(upstream): State<Upstream>) -> (StatusCode, Json<serde_json::Value>) {
            let hit = upstream.hits.fetch_add(1, Ordering::SeqCst);
            if hit < upstream.failures {
                return (upstream.failure_status, Json(serde_json::json!({ "error": "unavailable" })));
            }
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "choices": [{ "message": { "content": "{\"total\": 5}" } }]
                })),
            )
        }

        /// 本地起一个假上游，前 `failures` 次返回 `failure_status`，之后返回成功
        async fn spawn_upstream(failures: usize, failure_status: StatusCode) -> (String, Arc<AtomicUsize>) {
            let hits = Arc::new(AtomicUsize::new(0));
            let app = Router::new()
                .route("/v1/chat/completions", post(chat_completions))
                .with_state(Upstream { hits: hits.clone(), failures, failure_status });
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            (format!("http://{}/v1", addr), hits)
        }

        fn client(base_url: String) -> OpenAiVisionClient {
            let config = ModelConfig {
                base_url,
                model: "gpt-4o".into(),
                image_detail: "high".into(),
                timeout_secs: 5,
                max_retries: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 10,
            };
            OpenAiVisionClient::new(config, "test-key".into()).unwrap()
        }

        fn request() -> VisionRequest {
            VisionRequest {
                prompt: "extract".into(),
                image: ImagePayload { bytes: vec![1, 2, 3], mime_type: "image/png".into(), file_name: None },
            }
        }

        #[tokio::test]
        async fn recovers_after_transient_failures() {
            let (base_url, hits) = spawn_upstream(2, StatusCode::SERVICE_UNAVAILABLE).await;
            let content = client(base_url).complete(request()).await.unwrap();
            assert_eq!(content, "{\"total\": 5}");
            assert_eq!(hits.load(Ordering::SeqCst), 3);
        }

        #[tokio::test]
        async fn gives_up_after_max_retries() {
            let (base_url, hits) = spawn_upstream(usize::MAX, StatusCode::SERVICE_UNAVAILABLE).await;
            let err = client(base_url).complete(request()).await.unwrap_err();
            assert!(matches!(err, ExtractError::Upstream { status: 503, .. }));
            assert_eq!(hits.load(Ordering::SeqCst), 3);
        }

        #[tokio::test]
        async fn auth_failure_is_not_retried() {
            let (base_url, hits) = spawn_upstream(usize::MAX, StatusCode::UNAUTHORIZED).await;
            let err = client(base_url).complete(request()).await.unwrap_err();
            assert!(matches!(err, ExtractError::Upstream { status: 401, .. }));
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }
    }
}
