// conversion_relay/src/store/mod.rs

//! The record store contract the conversion flow consumes.

pub mod memory;

use crate::error::RelayResult;
use crate::model::{Attribution, AttemptFailure, ConversionAttempt, DonationRecord, NewDonation, ProviderNotification};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

pub use memory::MemoryStore;

/// Durable keyed storage for donation records and their conversion attempt log.
#[async_trait]
pub trait ConversionStore: Send + Sync {
  /// Fails with `DuplicateOrder` if the order id is taken.
  async fn insert_donation(&self, new_donation: NewDonation) -> RelayResult<DonationRecord>;

  async fn get_donation(&self, order_id: &str) -> RelayResult<Option<DonationRecord>>;

  /// Attaches the provider's payload; present receipt and donor fields replace stored ones.
  /// Returns `None` for an unknown order.
  async fn record_provider_notification(
    &self,
    order_id: &str,
    notification: ProviderNotification,
  ) -> RelayResult<Option<DonationRecord>>;

  /// Fills only the attribution fields that are currently null (COALESCE) and returns
  /// the updated record.
  async fn backfill_attribution(&self, order_id: &str, candidates: &Attribution) -> RelayResult<DonationRecord>;

  /// Creates a `pending` row with `attempts = 0`.
  async fn insert_attempt(&self, order_id: &str, raw_payload: Option<JsonValue>) -> RelayResult<ConversionAttempt>;

  /// The most recent `pending` row for the order.
  async fn active_attempt(&self, order_id: &str) -> RelayResult<Option<ConversionAttempt>>;

  /// In one transaction: sets `conversion_sent` (only if still false) and marks the row
  /// `sent` with the new counter and timestamp.
  async fn record_attempt_success(
    &self,
    order_id: &str,
    attempt_id: i64,
    attempts: i32,
    at: DateTime<Utc>,
  ) -> RelayResult<()>;

  async fn record_attempt_failure(&self, attempt_id: i64, failure: AttemptFailure) -> RelayResult<()>;

  /// Marks a `pending` row `sent` without touching its counter, for a record whose
  /// conversion went out through another path. Rows in any other status are left alone.
  async fn close_attempt(&self, attempt_id: i64) -> RelayResult<()>;

  /// `pending` rows with fewer than `max_attempts` attempts whose last attempt is absent
  /// or at/before `cutoff`, oldest first.
  async fn due_attempts(&self, max_attempts: i32, cutoff: DateTime<Utc>) -> RelayResult<Vec<ConversionAttempt>>;

  async fn list_attempts(&self, order_id: &str) -> RelayResult<Vec<ConversionAttempt>>;
}
