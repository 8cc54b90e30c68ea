use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_GATEWAY_BASE_URL: &str = "https://api-merchant.payos.vn";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_INVOICE_AMOUNT: i64 = 100_000_000;
const DEFAULT_INVOICE_TTL_SECS: u64 = 1800;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_REMINDER_DELAY_SECS: u64 = 86_400;
const DEFAULT_AUDIT_LOG_PATH: &str = "billing-audit.jsonl";

/// Payment gateway credentials and endpoints
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Gateway API base URL
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// Merchant client id, sent as the `x-client-id` header
    pub client_id: String,

    /// Merchant API key, sent as the `x-api-key` header
    pub api_key: String,

    /// Shared HMAC checksum key for request signing and webhook verification
    #[validate(length(min = 16))]
    pub checksum_key: String,

    /// Optional partner code header
    #[serde(default)]
    pub partner_code: Option<String>,

    /// URL the customer lands on after a successful checkout
    pub return_url: String,

    /// URL the customer lands on after abandoning checkout
    pub cancel_url: String,

    /// Hard timeout applied to every gateway call; timed-out calls are
    /// treated as failed and never retried automatically
    #[serde(default = "default_gateway_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Application configuration with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Payment gateway settings
    #[validate]
    pub gateway: GatewayConfig,

    /// Ceiling for a single invoice, in minor currency units
    #[serde(default = "default_max_invoice_amount")]
    #[validate(custom = "validate_positive_amount")]
    pub max_invoice_amount: i64,

    /// How long a pending invoice stays payable before the sweeper cancels it
    #[serde(default = "default_invoice_ttl_secs")]
    pub invoice_ttl_secs: u64,

    /// Expiration sweeper tick interval
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Delay before the balance-due reminder goes out on a deposit payment
    #[serde(default = "default_reminder_delay_secs")]
    pub deposit_reminder_delay_secs: u64,

    /// Channel that receives actionable refund-request alerts
    pub staff_channel_id: String,

    /// Bot relay endpoint for customer notifications; falls back to
    /// log-only delivery when unset
    #[serde(default)]
    pub notify_relay_url: Option<String>,

    /// Append-only audit log for terminal invoice and refund transitions
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_max_invoice_amount() -> i64 {
    DEFAULT_MAX_INVOICE_AMOUNT
}

fn default_invoice_ttl_secs() -> u64 {
    DEFAULT_INVOICE_TTL_SECS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_reminder_delay_secs() -> u64 {
    DEFAULT_REMINDER_DELAY_SECS
}

fn default_audit_log_path() -> String {
    DEFAULT_AUDIT_LOG_PATH.to_string()
}

fn validate_positive_amount(value: i64) -> Result<(), ValidationError> {
    if value > 0 {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("amount ceiling must be greater than 0".into());
        Err(err)
    }
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Loads configuration from `config/default`, the environment-specific
/// profile, and `APP__`-prefixed environment variables (highest priority).
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

    let builder = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    // The checksum key guards webhook authentication; fail fast with a
    // clear message rather than a generic deserialization error.
    if config.get_string("gateway.checksum_key").is_err() {
        error!("Gateway checksum key is not configured. Set APP__GATEWAY__CHECKSUM_KEY.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "gateway.checksum_key is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

/// Initializes the global tracing subscriber. Honors `RUST_LOG` when set,
/// otherwise derives a filter from the configured level.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("billing_engine={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_gateway() -> GatewayConfig {
        GatewayConfig {
            base_url: default_gateway_base_url(),
            client_id: "client".to_string(),
            api_key: "key".to_string(),
            checksum_key: "0123456789abcdef0123".to_string(),
            partner_code: None,
            return_url: "https://example.com/return".to_string(),
            cancel_url: "https://example.com/cancel".to_string(),
            request_timeout_secs: default_gateway_timeout_secs(),
        }
    }

    fn base_config() -> AppConfig {
        AppConfig {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            gateway: base_gateway(),
            max_invoice_amount: default_max_invoice_amount(),
            invoice_ttl_secs: default_invoice_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            deposit_reminder_delay_secs: default_reminder_delay_secs(),
            staff_channel_id: "staff-channel".to_string(),
            notify_relay_url: None,
            audit_log_path: default_audit_log_path(),
        }
    }

    #[test]
    fn default_config_validates() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn short_checksum_key_is_rejected() {
        let mut cfg = base_config();
        cfg.gateway.checksum_key = "short".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_amount_ceiling_is_rejected() {
        let mut cfg = base_config();
        cfg.max_invoice_amount = 0;
        assert!(cfg.validate().is_err());
    }
}
