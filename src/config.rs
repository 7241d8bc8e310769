use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::Validate;

const CONFIG_DIR: &str = "config";
const DEFAULT_ENV: &str = "development";

/// Application configuration, loaded from `config/*.toml` files and
/// `APP__`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to create missing tables on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// JWT secret for bearer-token verification
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// JWT expiration in seconds
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration_secs: u64,

    /// Shared secret the gateway signs webhook bodies with
    #[validate(length(min = 8))]
    pub payment_webhook_secret: String,

    /// Payment gateway REST endpoint
    #[serde(default = "default_gateway_base_url")]
    pub gateway_base_url: String,

    /// Gateway API key id (basic-auth user)
    #[serde(default)]
    pub gateway_key_id: String,

    /// Gateway API key secret (basic-auth password)
    #[serde(default)]
    pub gateway_key_secret: String,

    /// Outbound gateway request timeout (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Currency every order is priced in
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Shipping charge per kilometre to the nearest warehouse
    #[serde(default = "default_shipping_rate_per_km")]
    pub shipping_rate_per_km: u32,

    /// Shipping charge floor
    #[serde(default = "default_shipping_min_fee")]
    pub shipping_min_fee: u32,

    /// Shipping charge ceiling
    #[serde(default = "default_shipping_max_fee")]
    pub shipping_max_fee: u32,

    /// Seconds between reconciliation sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// A payment is only swept once it is older than this grace window.
    /// Must exceed the gateway's worst-case webhook latency.
    #[serde(default = "default_sweep_grace_secs")]
    pub sweep_grace_secs: i64,

    /// A still-uncaptured payment older than this is treated as abandoned
    #[serde(default = "default_sweep_abandon_secs")]
    pub sweep_abandon_secs: i64,

    /// Maximum payments examined per sweep tick
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: u64,

    /// Concurrent gateway lookups per sweep tick
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,

    /// Consecutive gateway failures before a payment is parked for manual review
    #[serde(default = "default_sweep_failure_threshold")]
    pub sweep_failure_threshold: i32,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// CORS: comma-separated list of allowed origins; unset means permissive
    /// (development only)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
}

fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_jwt_expiration() -> u64 {
    3600
}
fn default_gateway_base_url() -> String {
    "https://api.razorpay.com".to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    10
}
fn default_currency() -> String {
    "INR".to_string()
}
fn default_shipping_rate_per_km() -> u32 {
    10
}
fn default_shipping_min_fee() -> u32 {
    50
}
fn default_shipping_max_fee() -> u32 {
    1500
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_sweep_grace_secs() -> i64 {
    300
}
fn default_sweep_abandon_secs() -> i64 {
    1800
}
fn default_sweep_batch_size() -> u64 {
    100
}
fn default_sweep_concurrency() -> usize {
    4
}
fn default_sweep_failure_threshold() -> i32 {
    5
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}

impl AppConfig {
    /// Builds a configuration from the required fields, filling everything
    /// else with defaults. Used by binaries and tests that do not go through
    /// the file/environment loader.
    pub fn new(
        database_url: impl Into<String>,
        jwt_secret: impl Into<String>,
        payment_webhook_secret: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            host: host.into(),
            port,
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            jwt_secret: jwt_secret.into(),
            jwt_expiration_secs: default_jwt_expiration(),
            payment_webhook_secret: payment_webhook_secret.into(),
            gateway_base_url: default_gateway_base_url(),
            gateway_key_id: String::new(),
            gateway_key_secret: String::new(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            currency: default_currency(),
            shipping_rate_per_km: default_shipping_rate_per_km(),
            shipping_min_fee: default_shipping_min_fee(),
            shipping_max_fee: default_shipping_max_fee(),
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_grace_secs: default_sweep_grace_secs(),
            sweep_abandon_secs: default_sweep_abandon_secs(),
            sweep_batch_size: default_sweep_batch_size(),
            sweep_concurrency: default_sweep_concurrency(),
            sweep_failure_threshold: default_sweep_failure_threshold(),
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            cors_allowed_origins: None,
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self.environment.as_str(), "development" | "test")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Loads configuration from `config/default.toml`, an environment-specific
/// overlay, and `APP__*` environment variables (highest precedence).
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://fulfillment.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("environment", DEFAULT_ENV)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let cfg: AppConfig = config.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

/// Installs the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("fulfillment_api={},tower_http=info", level);
    let filter = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter))
            .json()
            .try_init();
    } else {
        let _ = fmt().with_env_filter(EnvFilter::new(filter)).try_init();
    }
}
