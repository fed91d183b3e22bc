use serde::{Deserialize, Serialize};

/// Top-level system configuration, deserialized from system.toml and
/// overridable by environment variables at load time (see
/// `deepresearch_engine::config::loader`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemConfig {
    pub llm: LlmConfig,
    pub ratelimit: RateLimitConfig,
    pub search: SearchConfig,
    pub fetch: FetchConfig,
    pub pdf: PdfConfig,
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// LLM provider selection and model identifiers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "local" or "openai_compatible".
    pub provider: String,
    pub default_model: String,
    pub reason_model: String,
    /// Context window size; `<= 2000` means "omit from the request".
    #[serde(default)]
    pub default_ctx: u32,
    #[serde(default)]
    pub reason_ctx: u32,
    pub local_base_url: String,
    pub openai_base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Secondary model invoked at most once on empty/rate/context errors.
    pub fallback_model: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// <= 0 disables rate limiting.
    pub requests_per_minute: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    pub base_url: String,
    pub max_results: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    pub concurrent_limit: usize,
    /// Seconds enforced per-domain after a fetch releases the domain mutex.
    pub cool_down: f64,
    pub use_reader: bool,
    #[serde(default)]
    pub reader_base_url: String,
    #[serde(default)]
    pub reader_api_key: String,
    /// 0 = full render + markdownify, 1 = innerText only.
    pub browse_lite: bool,
    pub max_html_length: usize,
    pub max_eval_time: u64,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
}

fn default_cache_ttl_seconds() -> u64 {
    3600
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PdfConfig {
    pub max_pages: u32,
    pub max_filesize: u64,
    pub timeout: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub database_url: String,
    pub db_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}
