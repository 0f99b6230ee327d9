use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::gateway::GatewayEnvironment;
use crate::services::settlement::SettlementConfig;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_PENDING_ORDER_TTL_MINUTES: i64 = 30;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("invalid configuration value: {0}")]
    Invalid(String),
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret used to verify bearer tokens issued by the identity service
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Public base URL used to construct the gateway's return/cancel
    /// callback targets
    #[serde(default = "default_public_base_url")]
    #[validate(custom = "validate_base_url")]
    pub public_base_url: String,

    /// Settlement currency (ISO 4217)
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub settlement_currency: String,

    /// Platform fee as a percentage of the item price; 0 disables the fee
    #[serde(default)]
    #[validate(custom = "validate_fee_percent")]
    pub platform_fee_percent: f64,

    /// Minutes a pending order may go untouched before it is considered
    /// stale and eligible for lazy expiry
    #[serde(default = "default_pending_order_ttl_minutes")]
    #[validate(custom = "validate_ttl_minutes")]
    pub pending_order_ttl_minutes: i64,

    /// Payment gateway deployment to talk to
    #[serde(default)]
    pub gateway_environment: GatewayEnvironment,

    /// OAuth2 client credentials for the payment gateway
    #[serde(default)]
    pub gateway_client_id: String,
    #[serde(default)]
    pub gateway_client_secret: String,

    /// Explicit gateway base URL override (local stubs); when unset, the
    /// environment's default endpoint is used
    #[serde(default)]
    pub gateway_base_url: Option<String>,

    /// Request timeout for gateway calls (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Resolves the immutable settlement knobs handed to the service
    /// constructor; transition code never reads config after this.
    pub fn settlement(&self) -> Result<SettlementConfig, AppConfigError> {
        let platform_fee_percent = Decimal::try_from(self.platform_fee_percent).map_err(|_| {
            AppConfigError::Invalid(format!(
                "platform_fee_percent {} is not representable",
                self.platform_fee_percent
            ))
        })?;

        Ok(SettlementConfig {
            currency: self.settlement_currency.clone(),
            platform_fee_percent,
            pending_order_ttl: chrono::Duration::minutes(self.pending_order_ttl_minutes),
            public_base_url: self.public_base_url.clone(),
        })
    }
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
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

fn default_db_idle_timeout_secs() -> u64 {
    600
}

fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_pending_order_ttl_minutes() -> i64 {
    DEFAULT_PENDING_ORDER_TTL_MINUTES
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_base_url(value: &str) -> Result<(), ValidationError> {
    let parsed = url::Url::parse(value);
    match parsed {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => {
            let mut err = ValidationError::new("public_base_url");
            err.message = Some("public_base_url must be an absolute http(s) URL".into());
            Err(err)
        }
    }
}

fn validate_fee_percent(value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || value < 0.0 || value >= 100.0 {
        let mut err = ValidationError::new("platform_fee_percent");
        err.message = Some("platform_fee_percent must be a finite value in [0, 100)".into());
        return Err(err);
    }
    Ok(())
}

fn validate_ttl_minutes(value: i64) -> Result<(), ValidationError> {
    if value <= 0 {
        let mut err = ValidationError::new("pending_order_ttl_minutes");
        err.message = Some("pending_order_ttl_minutes must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("atelier_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config file (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
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
        .set_default("database_url", "sqlite://atelier.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate()?;

    Ok(app_config)
}
