// donation_app/src/models/donation.rs

use chrono::{DateTime, Utc};
use conversion_relay::{Attribution, DonationRecord};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct DonationRow {
  pub order_id: String,
  pub amount: i64,
  pub currency: String,
  pub donor_name: Option<String>,
  pub donor_email: Option<String>,
  pub receipt_id: Option<String>,
  pub fbclid: Option<String>,
  pub fbp: Option<String>,
  pub fbc: Option<String>,
  pub client_ip: Option<String>,
  pub user_agent: Option<String>,
  pub country: Option<String>,
  pub conversion_sent: bool,
  pub provider_payload: Option<Json<JsonValue>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl From<DonationRow> for DonationRecord {
  fn from(row: DonationRow) -> Self {
    DonationRecord {
      order_id: row.order_id,
      amount: row.amount,
      currency: row.currency,
      donor_name: row.donor_name,
      donor_email: row.donor_email,
      receipt_id: row.receipt_id,
      attribution: Attribution {
        fbclid: row.fbclid,
        fbp: row.fbp,
        fbc: row.fbc,
      },
      client_ip: row.client_ip,
      user_agent: row.user_agent,
      country: row.country,
      conversion_sent: row.conversion_sent,
      provider_payload: row.provider_payload.map(|Json(v)| v),
      created_at: row.created_at,
      updated_at: row.updated_at,
    }
  }
}
