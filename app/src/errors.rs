// donation_app/src/errors.rs

use actix_web::{HttpResponse, ResponseError};
use conversion_relay::RelayError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Validation Error: {0}")]
  Validation(String),

  #[error("Resource Not Found: {0}")]
  NotFound(String),

  #[error("Conflict: {0}")]
  Conflict(String),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Database Error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("Database Migration Error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  #[error("Conversion Relay Error: {source}")]
  Relay { source: RelayError },

  #[error("Internal Server Error: {0}")]
  Internal(String),
}

impl From<RelayError> for AppError {
  fn from(err: RelayError) -> Self {
    match err {
      RelayError::DonationNotFound { order_id } => AppError::NotFound(format!("Donation '{}'", order_id)),
      RelayError::DuplicateOrder { order_id } => AppError::Conflict(format!("Donation '{}' already exists", order_id)),
      other => AppError::Relay { source: other },
    }
  }
}

impl From<anyhow::Error> for AppError {
  fn from(err: anyhow::Error) -> Self {
    match err.downcast::<sqlx::Error>() {
      Ok(sqlx_err) => AppError::Sqlx(sqlx_err),
      Err(other) => AppError::Internal(other.to_string()),
    }
  }
}

impl ResponseError for AppError {
  fn error_response(&self) -> HttpResponse {
    tracing::error!(application_error = %self, "Responding with error");
    match self {
      AppError::Validation(m) => HttpResponse::BadRequest().json(json!({"error": m})),
      AppError::NotFound(m) => HttpResponse::NotFound().json(json!({"error": m})),
      AppError::Conflict(m) => HttpResponse::Conflict().json(json!({"error": m})),
      AppError::Config(m) => {
        HttpResponse::InternalServerError().json(json!({"error": "Configuration issue", "detail": m}))
      }
      AppError::Sqlx(_) | AppError::Migration(_) => {
        HttpResponse::InternalServerError().json(json!({"error": "Database operation failed"}))
      }
      AppError::Relay { source } => {
        tracing::error!(relay_error_source = ?source, "Conversion relay error details");
        HttpResponse::InternalServerError().json(json!({"error": "Conversion processing error"}))
      }
      AppError::Internal(m) => {
        HttpResponse::InternalServerError().json(json!({"error": "An internal error occurred", "detail": m}))
      }
    }
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
