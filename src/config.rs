use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Application configuration with validation.
///
/// Loaded from `config/default.toml`, an environment-specific overlay, and
/// `APP_`-prefixed environment variables, in that order.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    /// Create missing tables from the entity definitions on startup.
    /// Intended for SQLite and test environments.
    #[serde(default)]
    pub auto_schema: bool,

    /// ISO currency code used for every order
    #[validate(length(min = 3, max = 3))]
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Flat tax rate applied to the discounted subtotal, in percent
    #[serde(default = "default_tax_rate")]
    pub tax_rate_percent: Decimal,

    /// Prepaid orders at or above this discounted subtotal ship free
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: Decimal,
    /// Base shipping charge for the first kilogram
    #[serde(default = "default_shipping_base")]
    pub shipping_base_charge: Decimal,
    /// Charge per additional started kilogram
    #[serde(default = "default_shipping_per_kg")]
    pub shipping_per_kg_charge: Decimal,
    /// Flat estimate used when line weights are unknown
    #[serde(default = "default_weight_grams")]
    pub default_weight_grams: i32,
    /// Surcharge added to pay-on-delivery orders
    #[serde(default = "default_cod_surcharge")]
    pub cod_surcharge: Decimal,

    /// Payment gateway REST endpoint
    #[serde(default = "default_gateway_url")]
    pub gateway_base_url: String,
    pub gateway_key_id: String,
    pub gateway_key_secret: String,
    /// Secret used to verify gateway callback signatures
    #[validate(length(min = 16))]
    pub gateway_webhook_secret: String,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
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
fn default_currency() -> String {
    "INR".to_string()
}
fn default_tax_rate() -> Decimal {
    dec!(18)
}
fn default_free_shipping_threshold() -> Decimal {
    dec!(10000)
}
fn default_shipping_base() -> Decimal {
    dec!(99)
}
fn default_shipping_per_kg() -> Decimal {
    dec!(40)
}
fn default_weight_grams() -> i32 {
    500
}
fn default_cod_surcharge() -> Decimal {
    dec!(49)
}
fn default_gateway_url() -> String {
    "https://api.gateway.example".to_string()
}

impl AppConfig {
    /// Minimal constructor used by tests and embedded setups.
    pub fn new(database_url: impl Into<String>, gateway_webhook_secret: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: default_host(),
            port: default_port(),
            environment: "test".to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_schema: true,
            currency: default_currency(),
            tax_rate_percent: default_tax_rate(),
            free_shipping_threshold: default_free_shipping_threshold(),
            shipping_base_charge: default_shipping_base(),
            shipping_per_kg_charge: default_shipping_per_kg(),
            default_weight_grams: default_weight_grams(),
            cod_surcharge: default_cod_surcharge(),
            gateway_base_url: default_gateway_url(),
            gateway_key_id: "test_key".to_string(),
            gateway_key_secret: "test_secret".to_string(),
            gateway_webhook_secret: gateway_webhook_secret.into(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Load configuration from files and environment.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let env = std::env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder();
    let default_path = Path::new(CONFIG_DIR).join("default.toml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }
    let env_path = Path::new(CONFIG_DIR).join(format!("{env}.toml"));
    if env_path.exists() {
        builder = builder.add_source(File::from(env_path));
    }
    builder = builder.add_source(Environment::with_prefix("APP").separator("__"));

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    info!(environment = %cfg.environment, "configuration loaded");
    Ok(cfg)
}

/// Initialize the tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let cfg = AppConfig::new("sqlite::memory:", "test_webhook_secret_32_chars_long");
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.tax_rate_percent, dec!(18));
        assert_eq!(cfg.currency, "INR");
        assert!(cfg.free_shipping_threshold > Decimal::ZERO);
    }

    #[test]
    fn test_short_webhook_secret_rejected() {
        let cfg = AppConfig::new("sqlite::memory:", "short");
        assert!(cfg.validate().is_err());
    }
}
