pub mod error;
pub mod handlers;

pub use error::ApiError;
pub use handlers::*;

use crate::service::{InvoiceService, SessionStore};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;

/// 共享状态：提取/校验服务 + 会话表
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InvoiceService>,
    pub sessions: Arc<SessionStore>,
}

/// 构建路由
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let session_routes = Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/invoice", put(replace_invoice))
        .route("/api/sessions/:id/items/:index", patch(edit_item))
        .route("/api/sessions/:id/reset", post(reset_session));

    let invoice_routes = Router::new()
        .route("/api/extract", post(extract))
        .route("/api/validate", post(validate));

    Router::new()
        .route("/health", get(health_check))
        .merge(invoice_routes)
        .merge(session_routes)
        .layer(ServiceBuilder::new().layer(DefaultBodyLimit::max(max_upload_bytes)))
        .with_state(state)
}
