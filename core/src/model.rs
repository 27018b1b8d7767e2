// conversion_relay/src/model.rs

//! Donation records and their conversion attempt log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

use crate::error::RelayError;

/// Ad-click attribution tokens captured on the donation page.
///
/// `fbc` can be derived from `fbclid`; `fbp` is generated when the browser supplied none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
  pub fbclid: Option<String>,
  pub fbp: Option<String>,
  pub fbc: Option<String>,
}

/// One payment attempt, created when the payment intent is requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationRecord {
  pub order_id: String,
  /// Minor currency units.
  pub amount: i64,
  pub currency: String,
  pub donor_name: Option<String>,
  pub donor_email: Option<String>,
  pub receipt_id: Option<String>,
  pub attribution: Attribution,
  pub client_ip: Option<String>,
  pub user_agent: Option<String>,
  pub country: Option<String>,
  /// Only ever moves from `false` to `true`, once the ad platform acknowledged a report.
  pub conversion_sent: bool,
  pub provider_payload: Option<JsonValue>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl DonationRecord {
  /// Amount in major units, as reported to the ad platform.
  pub fn amount_major(&self) -> f64 {
    self.amount as f64 / 100.0
  }
}

/// Fields captured when a payment intent is requested.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDonation {
  pub order_id: String,
  pub amount: i64,
  pub currency: String,
  pub attribution: Attribution,
  pub client_ip: Option<String>,
  pub user_agent: Option<String>,
}

/// What the payment provider told us about an order. Present fields replace stored ones.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderNotification {
  pub receipt_id: Option<String>,
  pub donor_name: Option<String>,
  pub donor_email: Option<String>,
  pub payload: JsonValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
  Pending,
  Sent,
  /// Attempts exhausted without an acknowledged send. Terminal.
  Failed,
}

impl AttemptStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      AttemptStatus::Pending => "pending",
      AttemptStatus::Sent => "sent",
      AttemptStatus::Failed => "failed",
    }
  }
}

impl fmt::Display for AttemptStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for AttemptStatus {
  type Err = RelayError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(AttemptStatus::Pending),
      "sent" => Ok(AttemptStatus::Sent),
      "failed" => Ok(AttemptStatus::Failed),
      other => Err(RelayError::InvalidStoredValue {
        field: "conversion_attempts.status",
        value: other.to_string(),
      }),
    }
  }
}

/// A row of the conversion attempt log. Rows are created once and then only updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionAttempt {
  pub id: i64,
  pub order_id: String,
  pub raw_payload: Option<JsonValue>,
  pub attempts: i32,
  pub last_attempt_at: Option<DateTime<Utc>>,
  pub status: AttemptStatus,
  pub last_error: Option<String>,
  pub created_at: DateTime<Utc>,
}

/// Update applied to an attempt row after a failed send.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
  pub attempts: i32,
  pub at: DateTime<Utc>,
  pub error: String,
  pub status: AttemptStatus,
}
