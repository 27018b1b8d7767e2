// donation_app/src/config.rs

use crate::errors::{AppError, Result};
use chrono::Duration as ChronoDuration;
use conversion_relay::RetryPolicy;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  pub database_url: String,
  pub app_base_url: String,
  /// Path of the page donors land on after paying; reported as the order-complete URL.
  pub order_complete_path: String,

  pub conversion_api_url: String,
  pub conversion_api_token: Option<String>,
  pub geo_lookup_enabled: bool,
  /// Bound on every outbound HTTP call.
  pub http_timeout: Duration,

  pub sweep_interval: Duration,
  pub retry_cooldown_secs: i64,
  pub retry_max_attempts: i32,
}

fn parse_var<T>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  match raw {
    None => Ok(default),
    Some(value) => value
      .trim()
      .parse::<T>()
      .map_err(|e| AppError::Config(format!("Invalid {}: {}", name, e))),
  }
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok(); // Load .env file if present
    Self::from_lookup(|name| env::var(name).ok())
  }

  /// Builds the config from any variable source. `from_env` passes the process environment.
  pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let server_host = get("SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
    let server_port = parse_var("SERVER_PORT", get("SERVER_PORT"), 8080u16)?;
    let database_url = get("DATABASE_URL").unwrap_or_else(|| "sqlite://donations.db?mode=rwc".to_string());
    let app_base_url = get("APP_BASE_URL").unwrap_or_else(|| format!("http://{}:{}", server_host, server_port));
    let order_complete_path = get("ORDER_COMPLETE_PATH").unwrap_or_else(|| "/thank-you".to_string());

    let conversion_api_url = get("CONVERSION_API_URL")
      .filter(|url| !url.trim().is_empty())
      .ok_or_else(|| AppError::Config("Missing environment variable 'CONVERSION_API_URL'".to_string()))?;
    let conversion_api_token = get("CONVERSION_API_TOKEN").filter(|t| !t.trim().is_empty());
    let geo_lookup_enabled = parse_var("GEO_LOOKUP_ENABLED", get("GEO_LOOKUP_ENABLED"), true)?;
    let http_timeout_secs = parse_var("HTTP_TIMEOUT_SECS", get("HTTP_TIMEOUT_SECS"), 10u64)?;

    let sweep_interval_secs = parse_var("RETRY_SWEEP_INTERVAL_SECS", get("RETRY_SWEEP_INTERVAL_SECS"), 60u64)?;
    if sweep_interval_secs == 0 {
      return Err(AppError::Config("RETRY_SWEEP_INTERVAL_SECS must be positive".to_string()));
    }
    let retry_cooldown_secs = parse_var(
      "RETRY_COOLDOWN_SECS",
      get("RETRY_COOLDOWN_SECS"),
      conversion_relay::policy::DEFAULT_COOLDOWN_SECS,
    )?;
    let retry_max_attempts = parse_var(
      "RETRY_MAX_ATTEMPTS",
      get("RETRY_MAX_ATTEMPTS"),
      conversion_relay::policy::DEFAULT_MAX_ATTEMPTS,
    )?;
    if retry_max_attempts < 1 {
      return Err(AppError::Config("RETRY_MAX_ATTEMPTS must be at least 1".to_string()));
    }

    tracing::info!("Application configuration loaded successfully.");

    Ok(Self {
      server_host,
      server_port,
      database_url,
      app_base_url,
      order_complete_path,
      conversion_api_url,
      conversion_api_token,
      geo_lookup_enabled,
      http_timeout: Duration::from_secs(http_timeout_secs),
      sweep_interval: Duration::from_secs(sweep_interval_secs),
      retry_cooldown_secs,
      retry_max_attempts,
    })
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy::new(self.retry_max_attempts, ChronoDuration::seconds(self.retry_cooldown_secs))
  }

  /// `APP_BASE_URL` joined with `ORDER_COMPLETE_PATH`.
  pub fn order_complete_url(&self) -> String {
    format!(
      "{}/{}",
      self.app_base_url.trim_end_matches('/'),
      self.order_complete_path.trim_start_matches('/')
    )
  }
}
