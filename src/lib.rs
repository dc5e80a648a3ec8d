pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod service;

pub use api::{router, AppState};
pub use config::AppConfig;
pub use service::{InvoiceService, OpenAiVisionClient, SessionStore};
