use invoice_validate_rust::{
    models::MissingFieldPolicy, router, AppConfig, AppState, InvoiceService, OpenAiVisionClient,
    SessionStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt::time::ChronoLocal, EnvFilter};

/// 闲置超时上限 (一年)
const MAX_IDLE_SECS: u64 = 365 * 24 * 3600;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 本地时间格式，级别由 RUST_LOG 控制
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config);

    // 创建模型客户端与服务
    let model = Arc::new(OpenAiVisionClient::from_env(config.model.clone())?);
    let policy = MissingFieldPolicy::from_strict_flag(config.validation.strict_missing_field_policy);
    let service = Arc::new(InvoiceService::new(model, policy, config.validation.mode));
    let sessions = Arc::new(SessionStore::new(config.session.tax_rate));
    info!(?policy, mode = ?config.validation.mode, "Validation policy configured");

    // 定期清理闲置会话
    let idle_timeout = chrono::Duration::seconds(config.session.idle_timeout_secs.min(MAX_IDLE_SECS) as i64);
    let purge_interval = Duration::from_secs(config.session.purge_interval_secs.max(1));
    let purge_sessions = sessions.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_interval);
        loop {
            ticker.tick().await;
            purge_sessions.purge_idle(idle_timeout);
        }
    });

    let app = router(AppState { service, sessions }, config.server.max_upload_bytes);

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/extract              - upload invoice image, returns normalized fields");
    info!("  POST /api/validate             - validate form values against the invoice image");
    info!("  POST /api/sessions             - create a form session");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
