use serde::{Deserialize, Serialize};

/// 应用配置
///
/// 加载顺序: 内置默认值 -> `config/invoice.{toml,yaml,json}` (可选) -> `INVOICE_` 环境变量
/// (嵌套字段用 `__` 分隔，例如 `INVOICE_SERVER__PORT=9000`)。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub validation: ValidationConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

/// 视觉模型接口配置 (API key 不在此处，只从环境变量读取)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub image_detail: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    /// 单次退避等待上限
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// 模型只做提取，本地确定性比对
    Local,
    /// 模型按提示词规则直接给出 `{validationResult, errors}`
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Case B 开关: 表单为空而发票有值时是否报错
    pub strict_missing_field_policy: bool,
    pub mode: ValidationMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 编辑明细后重算税额使用的税率
    pub tax_rate: f64,
    /// 闲置超过该秒数的会话会被清理
    pub idle_timeout_secs: u64,
    /// 清理任务执行间隔
    pub purge_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                max_upload_bytes: 10 * 1024 * 1024,
            },
            model: ModelConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o".to_string(),
                image_detail: "high".to_string(),
                timeout_secs: 60,
                max_retries: 2,
                initial_backoff_ms: 500,
                max_backoff_ms: 8_000,
            },
            validation: ValidationConfig {
                strict_missing_field_policy: true,
                mode: ValidationMode::Local,
            },
            session: SessionConfig {
                tax_rate: 0.1,
                idle_timeout_secs: 3600,
                purge_interval_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// 从默认值、配置文件和环境变量加载配置
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config/invoice").required(false))
            .add_source(
                config::Environment::with_prefix("INVOICE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
