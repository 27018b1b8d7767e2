// conversion_relay/src/sender.rs

//! The conversion sender seam: what a send produces, what it transmits, and the
//! bounded redo every sender applies inside one logical attempt.

use crate::geo::CountryLookup;
use crate::model::DonationRecord;
use crate::policy::SendPolicy;
use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use tracing::{debug, warn};

/// Result of one logical send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
  pub success: bool,
  /// HTTP calls made for this send, including the immediate redo.
  pub attempts: u32,
  pub error: Option<String>,
}

impl SendReport {
  pub fn sent(attempts: u32) -> Self {
    Self {
      success: true,
      attempts,
      error: None,
    }
  }

  pub fn failed(attempts: u32, error: impl Into<String>) -> Self {
    Self {
      success: false,
      attempts,
      error: Some(error.into()),
    }
  }
}

/// Produces and transmits one conversion report for a donation.
///
/// Implementations never return errors: every failure is folded into the report.
#[async_trait]
pub trait ConversionSender: Send + Sync {
  async fn send(&self, record: &DonationRecord) -> SendReport;
}

/// Body POSTed to the ad platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionPayload {
  pub order_id: String,
  pub name: Option<String>,
  pub email: Option<String>,
  pub amount: f64,
  pub currency: String,
  pub receipt_id: Option<String>,
  pub fbclid: Option<String>,
  pub fbp: Option<String>,
  pub fbc: Option<String>,
  pub client_ip: Option<String>,
  pub user_agent: Option<String>,
  pub order_complete_url: String,
  /// Empty when the country could not be resolved.
  pub country: String,
}

impl ConversionPayload {
  pub fn from_record(record: &DonationRecord, order_complete_url: String, country: String) -> Self {
    Self {
      order_id: record.order_id.clone(),
      name: record.donor_name.clone(),
      email: record.donor_email.clone(),
      amount: record.amount_major(),
      currency: record.currency.clone(),
      receipt_id: record.receipt_id.clone(),
      fbclid: record.attribution.fbclid.clone(),
      fbp: record.attribution.fbp.clone(),
      fbc: record.attribution.fbc.clone(),
      client_ip: record.client_ip.clone(),
      user_agent: record.user_agent.clone(),
      order_complete_url,
      country,
    }
  }
}

/// The record's country, or a best-effort lookup of its client address, or `""`.
pub async fn resolve_country(lookup: Option<&dyn CountryLookup>, record: &DonationRecord) -> String {
  if let Some(country) = record.country.as_deref().filter(|c| !c.is_empty()) {
    return country.to_string();
  }
  match (lookup, record.client_ip.as_deref()) {
    (Some(lookup), Some(ip)) => lookup.country_for(ip).await.unwrap_or_default(),
    _ => String::new(),
  }
}

/// Calls `attempt` up to `policy.tries_per_send` times, stopping at the first success.
///
/// `attempt` receives the 1-based try number. The last error is reported on failure.
pub async fn send_with_redo<F, Fut>(policy: &SendPolicy, mut attempt: F) -> SendReport
where
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<(), String>>,
{
  let tries = policy.tries_per_send.max(1);
  let mut last_error = String::new();

  for try_no in 1..=tries {
    match attempt(try_no).await {
      Ok(()) => {
        debug!(try_no, "Conversion send acknowledged.");
        return SendReport::sent(try_no);
      }
      Err(e) => {
        warn!(try_no, tries, error = %e, "Conversion send try failed.");
        last_error = e;
      }
    }
  }

  SendReport::failed(tries, last_error)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Attribution;
  use chrono::Utc;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn record() -> DonationRecord {
    DonationRecord {
      order_id: "O1".into(),
      amount: 1050,
      currency: "EUR".into(),
      donor_name: Some("Ada".into()),
      donor_email: Some("ada@example.org".into()),
      receipt_id: Some("R-9".into()),
      attribution: Attribution {
        fbclid: Some("FC1".into()),
        fbp: None,
        fbc: None,
      },
      client_ip: Some("10.0.0.1".into()),
      user_agent: Some("ua".into()),
      country: None,
      conversion_sent: false,
      provider_payload: None,
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  struct FixedLookup(Option<&'static str>);

  #[async_trait]
  impl CountryLookup for FixedLookup {
    async fn country_for(&self, _ip: &str) -> Option<String> {
      self.0.map(str::to_string)
    }
  }

  #[tokio::test]
  async fn redo_stops_at_first_success() {
    let calls = AtomicU32::new(0);
    let report = send_with_redo(&SendPolicy::default(), |try_no| {
      calls.fetch_add(1, Ordering::SeqCst);
      async move {
        if try_no == 1 {
          Err("503".to_string())
        } else {
          Ok(())
        }
      }
    })
    .await;
    assert_eq!(report, SendReport::sent(2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn redo_is_bounded_and_keeps_last_error() {
    let calls = AtomicU32::new(0);
    let report = send_with_redo(&SendPolicy::default(), |try_no| {
      calls.fetch_add(1, Ordering::SeqCst);
      async move { Err(format!("boom {try_no}")) }
    })
    .await;
    assert_eq!(report, SendReport::failed(2, "boom 2"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn country_prefers_record_then_lookup_then_empty() {
    let mut rec = record();
    assert_eq!(resolve_country(Some(&FixedLookup(Some("DE"))), &rec).await, "DE");
    assert_eq!(resolve_country(Some(&FixedLookup(None)), &rec).await, "");
    assert_eq!(resolve_country(None, &rec).await, "");

    rec.country = Some("NL".into());
    assert_eq!(resolve_country(Some(&FixedLookup(Some("DE"))), &rec).await, "NL");
  }

  #[test]
  fn payload_carries_record_fields() {
    let payload = ConversionPayload::from_record(&record(), "https://x/thank-you?order=O1".into(), "FR".into());
    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(json["orderId"], "O1");
    assert_eq!(json["amount"], 10.5);
    assert_eq!(json["receiptId"], "R-9");
    assert_eq!(json["fbclid"], "FC1");
    assert_eq!(json["orderCompleteUrl"], "https://x/thank-you?order=O1");
    assert_eq!(json["country"], "FR");
  }
}
