// conversion_relay/src/store/memory.rs

//! An in-process `ConversionStore`, used by tests and benches.

use crate::error::{RelayError, RelayResult};
use crate::model::{
  Attribution, AttemptFailure, AttemptStatus, ConversionAttempt, DonationRecord, NewDonation, ProviderNotification,
};
use crate::store::ConversionStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct MemoryState {
  donations: HashMap<String, DonationRecord>,
  attempts: Vec<ConversionAttempt>,
  next_attempt_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
  state: Mutex<MemoryState>,
  due_queries: AtomicUsize,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// How many times `due_attempts` has been called.
  pub fn due_query_count(&self) -> usize {
    self.due_queries.load(Ordering::SeqCst)
  }

  /// Overwrites a stored record, bypassing the usual update rules. Test fixture helper.
  pub fn put_donation(&self, record: DonationRecord) {
    self.state.lock().donations.insert(record.order_id.clone(), record);
  }

  /// Drops a record but keeps its attempt rows, leaving them orphaned.
  pub fn remove_donation(&self, order_id: &str) -> Option<DonationRecord> {
    self.state.lock().donations.remove(order_id)
  }
}

#[async_trait]
impl ConversionStore for MemoryStore {
  async fn insert_donation(&self, new_donation: NewDonation) -> RelayResult<DonationRecord> {
    let mut state = self.state.lock();
    if state.donations.contains_key(&new_donation.order_id) {
      return Err(RelayError::DuplicateOrder {
        order_id: new_donation.order_id,
      });
    }
    let now = Utc::now();
    let record = DonationRecord {
      order_id: new_donation.order_id,
      amount: new_donation.amount,
      currency: new_donation.currency,
      donor_name: None,
      donor_email: None,
      receipt_id: None,
      attribution: new_donation.attribution,
      client_ip: new_donation.client_ip,
      user_agent: new_donation.user_agent,
      country: None,
      conversion_sent: false,
      provider_payload: None,
      created_at: now,
      updated_at: now,
    };
    state.donations.insert(record.order_id.clone(), record.clone());
    Ok(record)
  }

  async fn get_donation(&self, order_id: &str) -> RelayResult<Option<DonationRecord>> {
    Ok(self.state.lock().donations.get(order_id).cloned())
  }

  async fn record_provider_notification(
    &self,
    order_id: &str,
    notification: ProviderNotification,
  ) -> RelayResult<Option<DonationRecord>> {
    let mut state = self.state.lock();
    let Some(record) = state.donations.get_mut(order_id) else {
      return Ok(None);
    };
    record.provider_payload = Some(notification.payload);
    record.receipt_id = notification.receipt_id.or(record.receipt_id.take());
    record.donor_name = notification.donor_name.or(record.donor_name.take());
    record.donor_email = notification.donor_email.or(record.donor_email.take());
    record.updated_at = Utc::now();
    Ok(Some(record.clone()))
  }

  async fn backfill_attribution(&self, order_id: &str, candidates: &Attribution) -> RelayResult<DonationRecord> {
    let mut state = self.state.lock();
    let record = state
      .donations
      .get_mut(order_id)
      .ok_or_else(|| RelayError::DonationNotFound {
        order_id: order_id.to_string(),
      })?;
    record.attribution = record.attribution.coalesce(candidates);
    record.updated_at = Utc::now();
    Ok(record.clone())
  }

  async fn insert_attempt(&self, order_id: &str, raw_payload: Option<JsonValue>) -> RelayResult<ConversionAttempt> {
    let mut state = self.state.lock();
    if !state.donations.contains_key(order_id) {
      return Err(RelayError::DonationNotFound {
        order_id: order_id.to_string(),
      });
    }
    state.next_attempt_id += 1;
    let attempt = ConversionAttempt {
      id: state.next_attempt_id,
      order_id: order_id.to_string(),
      raw_payload,
      attempts: 0,
      last_attempt_at: None,
      status: AttemptStatus::Pending,
      last_error: None,
      created_at: Utc::now(),
    };
    state.attempts.push(attempt.clone());
    Ok(attempt)
  }

  async fn active_attempt(&self, order_id: &str) -> RelayResult<Option<ConversionAttempt>> {
    Ok(
      self
        .state
        .lock()
        .attempts
        .iter()
        .rev()
        .find(|a| a.order_id == order_id && a.status == AttemptStatus::Pending)
        .cloned(),
    )
  }

  async fn record_attempt_success(
    &self,
    order_id: &str,
    attempt_id: i64,
    attempts: i32,
    at: DateTime<Utc>,
  ) -> RelayResult<()> {
    let mut state = self.state.lock();
    if !state.attempts.iter().any(|a| a.id == attempt_id) {
      return Err(RelayError::AttemptNotFound { attempt_id });
    }
    let record = state
      .donations
      .get_mut(order_id)
      .ok_or_else(|| RelayError::DonationNotFound {
        order_id: order_id.to_string(),
      })?;
    if !record.conversion_sent {
      record.conversion_sent = true;
      record.updated_at = at;
    }
    if let Some(attempt) = state.attempts.iter_mut().find(|a| a.id == attempt_id) {
      attempt.status = AttemptStatus::Sent;
      attempt.attempts = attempts;
      attempt.last_attempt_at = Some(at);
      attempt.last_error = None;
    }
    Ok(())
  }

  async fn record_attempt_failure(&self, attempt_id: i64, failure: AttemptFailure) -> RelayResult<()> {
    let mut state = self.state.lock();
    let attempt = state
      .attempts
      .iter_mut()
      .find(|a| a.id == attempt_id)
      .ok_or(RelayError::AttemptNotFound { attempt_id })?;
    attempt.attempts = failure.attempts;
    attempt.last_attempt_at = Some(failure.at);
    attempt.last_error = Some(failure.error);
    attempt.status = failure.status;
    Ok(())
  }

  async fn close_attempt(&self, attempt_id: i64) -> RelayResult<()> {
    let mut state = self.state.lock();
    let attempt = state
      .attempts
      .iter_mut()
      .find(|a| a.id == attempt_id)
      .ok_or(RelayError::AttemptNotFound { attempt_id })?;
    if attempt.status == AttemptStatus::Pending {
      attempt.status = AttemptStatus::Sent;
    }
    Ok(())
  }

  async fn due_attempts(&self, max_attempts: i32, cutoff: DateTime<Utc>) -> RelayResult<Vec<ConversionAttempt>> {
    self.due_queries.fetch_add(1, Ordering::SeqCst);
    Ok(
      self
        .state
        .lock()
        .attempts
        .iter()
        .filter(|a| {
          a.status == AttemptStatus::Pending
            && a.attempts < max_attempts
            && a.last_attempt_at.map_or(true, |at| at <= cutoff)
        })
        .cloned()
        .collect(),
    )
  }

  async fn list_attempts(&self, order_id: &str) -> RelayResult<Vec<ConversionAttempt>> {
    Ok(
      self
        .state
        .lock()
        .attempts
        .iter()
        .filter(|a| a.order_id == order_id)
        .cloned()
        .collect(),
    )
  }
}
