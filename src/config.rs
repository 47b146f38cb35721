use std::{env, str::FromStr};

use dotenvy::dotenv;
use thiserror::Error;
use validator::{Validate, ValidationErrors};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Clone, Validate)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// PostgreSQL URL. When unset, transfers are kept in process memory.
    pub database_url: Option<String>,
    #[validate(range(min = 1, max = 100))]
    pub database_max_connections: u32,
    /// Counter store for the rate limiter. When unset, counters are kept in process memory.
    pub redis_url: Option<String>,
    pub upload_dir: String,
    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    pub s3_bucket: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub use_s3: bool,
    #[validate(range(min = 1, max = 104857600))] // Max 100MB
    pub max_file_size: u64,
    #[validate(range(min = 1, max = 604800))]
    pub transfer_ttl_secs: i64,
    #[validate(range(min = 1))]
    pub max_downloads: i32,
    #[validate(range(min = 1))]
    pub rate_limit_max: u64,
    #[validate(range(min = 1))]
    pub rate_limit_window_secs: u64,
    pub trust_proxy: bool,
    pub static_dir: String,
    pub sweep_interval_secs: u64,
    pub sweep_grace_secs: i64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: 3001,
            database_url: None,
            database_max_connections: 5,
            redis_url: None,
            upload_dir: "uploads".to_string(),
            s3_endpoint: None,
            s3_region: "us-east-1".to_string(),
            s3_bucket: "codedrop".to_string(),
            s3_access_key: "minioadmin".to_string(),
            s3_secret_key: "minioadmin".to_string(),
            use_s3: false,
            max_file_size: 10_485_760,
            transfer_ttl_secs: 600,
            max_downloads: 100,
            rate_limit_max: 30,
            rate_limit_window_secs: 3600,
            trust_proxy: false,
            static_dir: "frontend".to_string(),
            sweep_interval_secs: 60,
            sweep_grace_secs: 300,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load environment variables from `.env` file (if it exists)
        dotenv().ok();

        let d = Config::default();
        let config = Config {
            host: env::var("HOST").unwrap_or(d.host),
            port: parse_var("PORT", d.port)?,
            database_url: optional_var("DATABASE_URL"),
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", d.database_max_connections)?,
            redis_url: optional_var("REDIS_URL"),
            upload_dir: env::var("UPLOAD_DIR").unwrap_or(d.upload_dir),
            s3_endpoint: optional_var("S3_ENDPOINT"),
            s3_region: env::var("S3_REGION").unwrap_or(d.s3_region),
            s3_bucket: env::var("S3_BUCKET").unwrap_or(d.s3_bucket),
            s3_access_key: env::var("S3_ACCESS_KEY").unwrap_or(d.s3_access_key),
            s3_secret_key: env::var("S3_SECRET_KEY").unwrap_or(d.s3_secret_key),
            use_s3: parse_var("USE_S3", d.use_s3)?,
            max_file_size: parse_var("MAX_FILE_SIZE", d.max_file_size)?,
            transfer_ttl_secs: parse_var("TRANSFER_TTL_SECS", d.transfer_ttl_secs)?,
            max_downloads: parse_var("MAX_DOWNLOADS", d.max_downloads)?,
            rate_limit_max: parse_var("RATE_LIMIT_MAX", d.rate_limit_max)?,
            rate_limit_window_secs: parse_var("RATE_LIMIT_WINDOW_SECS", d.rate_limit_window_secs)?,
            trust_proxy: parse_var("TRUST_PROXY", d.trust_proxy)?,
            static_dir: env::var("STATIC_DIR").unwrap_or(d.static_dir),
            sweep_interval_secs: parse_var("SWEEP_INTERVAL_SECS", d.sweep_interval_secs)?,
            sweep_grace_secs: parse_var("SWEEP_GRACE_SECS", d.sweep_grace_secs)?,
        };

        // Validate configuration values (e.g. file size range)
        config.validate()?;
        Ok(config)
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Parse an environment variable, falling back to `default` when it is unset.
/// A value that is set but unparsable is an error rather than silently ignored.
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(default),
    }
}
