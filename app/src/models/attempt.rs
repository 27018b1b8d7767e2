// donation_app/src/models/attempt.rs

use chrono::{DateTime, Utc};
use conversion_relay::{AttemptStatus, ConversionAttempt, RelayError};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::FromRow;

/// A `conversion_attempts` row. `status` is kept as text and checked on conversion.
#[derive(Debug, Clone, FromRow)]
pub struct AttemptRow {
  pub id: i64,
  pub order_id: String,
  pub raw_payload: Option<Json<JsonValue>>,
  pub attempts: i32,
  pub last_attempt_at: Option<DateTime<Utc>>,
  pub status: String,
  pub last_error: Option<String>,
  pub created_at: DateTime<Utc>,
}

impl TryFrom<AttemptRow> for ConversionAttempt {
  type Error = RelayError;

  fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
    Ok(ConversionAttempt {
      id: row.id,
      order_id: row.order_id,
      raw_payload: row.raw_payload.map(|Json(v)| v),
      attempts: row.attempts,
      last_attempt_at: row.last_attempt_at,
      status: row.status.parse::<AttemptStatus>()?,
      last_error: row.last_error,
      created_at: row.created_at,
    })
  }
}
