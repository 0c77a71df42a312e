//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SAGE__*` 覆盖（双下划线表示嵌套，如 `SAGE__LLM__PROVIDER=mock`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub orchestrator: OrchestratorSection,
    pub llm: LlmSection,
    pub pipeline: PipelineSection,
}

/// [server] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 允许的跨域来源；为空时放开所有来源
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// [storage] 段：未设置 database_path 时使用内存存储
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            database_path: None,
            max_connections: default_max_connections(),
        }
    }
}

/// [orchestrator] 段：反馈轮询、流保活与阶段调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_poll_interval_ms")]
    pub feedback_poll_interval_ms: u64,
    #[serde(default = "default_feedback_timeout_secs")]
    pub feedback_timeout_secs: u64,
    #[serde(default = "default_stream_idle_secs")]
    pub stream_idle_secs: u64,
    /// 单次阶段调用超时（秒），0 表示不限制
    #[serde(default = "default_pipeline_timeout_secs")]
    pub pipeline_timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_feedback_timeout_secs() -> u64 {
    600
}

fn default_stream_idle_secs() -> u64 {
    30
}

fn default_pipeline_timeout_secs() -> u64 {
    1800
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            feedback_poll_interval_ms: default_poll_interval_ms(),
            feedback_timeout_secs: default_feedback_timeout_secs(),
            stream_idle_secs: default_stream_idle_secs(),
            pipeline_timeout_secs: default_pipeline_timeout_secs(),
        }
    }
}

impl OrchestratorSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.feedback_poll_interval_ms)
    }

    pub fn feedback_timeout(&self) -> Duration {
        Duration::from_secs(self.feedback_timeout_secs)
    }

    pub fn stream_idle(&self) -> Duration {
        Duration::from_secs(self.stream_idle_secs.max(1))
    }

    pub fn pipeline_timeout(&self) -> Option<Duration> {
        (self.pipeline_timeout_secs > 0).then(|| Duration::from_secs(self.pipeline_timeout_secs))
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY / DEEPSEEK_API_KEY
    pub api_key: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            api_key: None,
        }
    }
}

/// [pipeline] 段：阶段二访谈并发
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_max_concurrent_interviews")]
    pub max_concurrent_interviews: usize,
}

fn default_max_concurrent_interviews() -> usize {
    3
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_concurrent_interviews: default_max_concurrent_interviews(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 SAGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SAGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SAGE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
