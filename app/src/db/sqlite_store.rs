// donation_app/src/db/sqlite_store.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conversion_relay::{
  Attribution, AttemptFailure, AttemptStatus, ConversionAttempt, ConversionStore, DonationRecord, NewDonation,
  ProviderNotification, RelayError, RelayResult,
};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::SqlitePool;
use tracing::instrument;

use crate::models::{AttemptRow, DonationRow};

#[derive(Debug, Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

}

fn not_found(order_id: &str) -> RelayError {
  RelayError::DonationNotFound {
    order_id: order_id.to_string(),
  }
}

fn into_attempts(rows: Vec<AttemptRow>) -> RelayResult<Vec<ConversionAttempt>> {
  rows.into_iter().map(ConversionAttempt::try_from).collect()
}

#[async_trait]
impl ConversionStore for SqliteStore {
  #[instrument(skip_all, fields(order_id = %new_donation.order_id))]
  async fn insert_donation(&self, new_donation: NewDonation) -> RelayResult<DonationRecord> {
    let now = Utc::now();
    let row = sqlx::query_as::<_, DonationRow>(
      r#"
      INSERT INTO donations
        (order_id, amount, currency, fbclid, fbp, fbc, client_ip, user_agent, conversion_sent, created_at, updated_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
      RETURNING *
      "#,
    )
    .bind(&new_donation.order_id)
    .bind(new_donation.amount)
    .bind(&new_donation.currency)
    .bind(&new_donation.attribution.fbclid)
    .bind(&new_donation.attribution.fbp)
    .bind(&new_donation.attribution.fbc)
    .bind(&new_donation.client_ip)
    .bind(&new_donation.user_agent)
    .bind(now)
    .bind(now)
    .fetch_one(&self.pool)
    .await
    .map_err(|e| match e {
      sqlx::Error::Database(db) if db.is_unique_violation() => RelayError::DuplicateOrder {
        order_id: new_donation.order_id.clone(),
      },
      other => RelayError::store(other),
    })?;
    Ok(row.into())
  }

  async fn get_donation(&self, order_id: &str) -> RelayResult<Option<DonationRecord>> {
    let row = sqlx::query_as::<_, DonationRow>("SELECT * FROM donations WHERE order_id = ?")
      .bind(order_id)
      .fetch_optional(&self.pool)
      .await
      .map_err(RelayError::store)?;
    Ok(row.map(Into::into))
  }

  #[instrument(skip(self, notification))]
  async fn record_provider_notification(
    &self,
    order_id: &str,
    notification: ProviderNotification,
  ) -> RelayResult<Option<DonationRecord>> {
    let row = sqlx::query_as::<_, DonationRow>(
      r#"
      UPDATE donations SET
        provider_payload = ?,
        receipt_id = COALESCE(?, receipt_id),
        donor_name = COALESCE(?, donor_name),
        donor_email = COALESCE(?, donor_email),
        updated_at = ?
      WHERE order_id = ?
      RETURNING *
      "#,
    )
    .bind(Json(&notification.payload))
    .bind(&notification.receipt_id)
    .bind(&notification.donor_name)
    .bind(&notification.donor_email)
    .bind(Utc::now())
    .bind(order_id)
    .fetch_optional(&self.pool)
    .await
    .map_err(RelayError::store)?;
    Ok(row.map(Into::into))
  }

  #[instrument(skip(self, candidates))]
  async fn backfill_attribution(&self, order_id: &str, candidates: &Attribution) -> RelayResult<DonationRecord> {
    let row = sqlx::query_as::<_, DonationRow>(
      r#"
      UPDATE donations SET
        fbclid = COALESCE(fbclid, ?),
        fbp = COALESCE(fbp, ?),
        fbc = COALESCE(fbc, ?),
        updated_at = ?
      WHERE order_id = ?
      RETURNING *
      "#,
    )
    .bind(&candidates.fbclid)
    .bind(&candidates.fbp)
    .bind(&candidates.fbc)
    .bind(Utc::now())
    .bind(order_id)
    .fetch_optional(&self.pool)
    .await
    .map_err(RelayError::store)?;
    row.map(Into::into).ok_or_else(|| not_found(order_id))
  }

  #[instrument(skip(self, raw_payload))]
  async fn insert_attempt(&self, order_id: &str, raw_payload: Option<JsonValue>) -> RelayResult<ConversionAttempt> {
    let row = sqlx::query_as::<_, AttemptRow>(
      r#"
      INSERT INTO conversion_attempts (order_id, raw_payload, attempts, status, created_at)
      VALUES (?, ?, 0, ?, ?)
      RETURNING *
      "#,
    )
    .bind(order_id)
    .bind(raw_payload.map(Json))
    .bind(AttemptStatus::Pending.as_str())
    .bind(Utc::now())
    .fetch_one(&self.pool)
    .await
    .map_err(|e| match e {
      sqlx::Error::Database(db) if db.is_foreign_key_violation() => not_found(order_id),
      other => RelayError::store(other),
    })?;
    row.try_into()
  }

  async fn active_attempt(&self, order_id: &str) -> RelayResult<Option<ConversionAttempt>> {
    let row = sqlx::query_as::<_, AttemptRow>(
      "SELECT * FROM conversion_attempts WHERE order_id = ? AND status = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(order_id)
    .bind(AttemptStatus::Pending.as_str())
    .fetch_optional(&self.pool)
    .await
    .map_err(RelayError::store)?;
    row.map(ConversionAttempt::try_from).transpose()
  }

  #[instrument(skip(self, at))]
  async fn record_attempt_success(
    &self,
    order_id: &str,
    attempt_id: i64,
    attempts: i32,
    at: DateTime<Utc>,
  ) -> RelayResult<()> {
    let mut tx = self.pool.begin().await.map_err(RelayError::store)?;

    let updated = sqlx::query(
      "UPDATE conversion_attempts SET status = ?, attempts = ?, last_attempt_at = ?, last_error = NULL WHERE id = ?",
    )
    .bind(AttemptStatus::Sent.as_str())
    .bind(attempts)
    .bind(at)
    .bind(attempt_id)
    .execute(&mut *tx)
    .await
    .map_err(RelayError::store)?;
    if updated.rows_affected() == 0 {
      return Err(RelayError::AttemptNotFound { attempt_id });
    }

    // Compare-and-set: the flag only ever moves from 0 to 1.
    let flagged = sqlx::query("UPDATE donations SET conversion_sent = 1, updated_at = ? WHERE order_id = ? AND conversion_sent = 0")
      .bind(at)
      .bind(order_id)
      .execute(&mut *tx)
      .await
      .map_err(RelayError::store)?;
    if flagged.rows_affected() == 0 {
      let exists = sqlx::query_scalar::<_, i64>("SELECT 1 FROM donations WHERE order_id = ?")
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(RelayError::store)?;
      if exists.is_none() {
        return Err(not_found(order_id));
      }
      tracing::warn!("Donation was already flagged as sent.");
    }

    tx.commit().await.map_err(RelayError::store)
  }

  #[instrument(skip(self, failure), fields(attempts = failure.attempts, status = %failure.status))]
  async fn record_attempt_failure(&self, attempt_id: i64, failure: AttemptFailure) -> RelayResult<()> {
    let updated = sqlx::query(
      "UPDATE conversion_attempts SET attempts = ?, last_attempt_at = ?, last_error = ?, status = ? WHERE id = ?",
    )
    .bind(failure.attempts)
    .bind(failure.at)
    .bind(&failure.error)
    .bind(failure.status.as_str())
    .bind(attempt_id)
    .execute(&self.pool)
    .await
    .map_err(RelayError::store)?;
    if updated.rows_affected() == 0 {
      return Err(RelayError::AttemptNotFound { attempt_id });
    }
    Ok(())
  }

  #[instrument(skip(self))]
  async fn close_attempt(&self, attempt_id: i64) -> RelayResult<()> {
    let status = sqlx::query_scalar::<_, String>("SELECT status FROM conversion_attempts WHERE id = ?")
      .bind(attempt_id)
      .fetch_optional(&self.pool)
      .await
      .map_err(RelayError::store)?;
    if status.is_none() {
      return Err(RelayError::AttemptNotFound { attempt_id });
    }

    sqlx::query("UPDATE conversion_attempts SET status = ? WHERE id = ? AND status = ?")
      .bind(AttemptStatus::Sent.as_str())
      .bind(attempt_id)
      .bind(AttemptStatus::Pending.as_str())
      .execute(&self.pool)
      .await
      .map_err(RelayError::store)?;
    Ok(())
  }

  async fn due_attempts(&self, max_attempts: i32, cutoff: DateTime<Utc>) -> RelayResult<Vec<ConversionAttempt>> {
    // Stored timestamps carry a variable number of fractional digits, so compare them
    // numerically rather than as text.
    let rows = sqlx::query_as::<_, AttemptRow>(
      r#"
      SELECT * FROM conversion_attempts
      WHERE status = ?
        AND attempts < ?
        AND (last_attempt_at IS NULL OR julianday(last_attempt_at) <= julianday(?))
      ORDER BY id ASC
      "#,
    )
    .bind(AttemptStatus::Pending.as_str())
    .bind(max_attempts)
    .bind(cutoff)
    .fetch_all(&self.pool)
    .await
    .map_err(RelayError::store)?;
    into_attempts(rows)
  }

  async fn list_attempts(&self, order_id: &str) -> RelayResult<Vec<ConversionAttempt>> {
    let rows = sqlx::query_as::<_, AttemptRow>("SELECT * FROM conversion_attempts WHERE order_id = ? ORDER BY id ASC")
      .bind(order_id)
      .fetch_all(&self.pool)
      .await
      .map_err(RelayError::store)?;
    into_attempts(rows)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::memory_pool;
  use chrono::Duration;
  use serde_json::json;

  async fn store() -> SqliteStore {
    SqliteStore::new(memory_pool().await)
  }

  fn new_donation(order_id: &str) -> NewDonation {
    NewDonation {
      order_id: order_id.to_string(),
      amount: 1000,
      currency: "EUR".into(),
      attribution: Attribution {
        fbclid: Some("abc".into()),
        fbp: None,
        fbc: None,
      },
      client_ip: Some("81.2.69.142".into()),
      user_agent: Some("ua".into()),
    }
  }

  #[tokio::test]
  async fn insert_and_read_back_donation() {
    let store = store().await;
    let created = store.insert_donation(new_donation("O1")).await.unwrap();
    assert!(!created.conversion_sent);

    let fetched = store.get_donation("O1").await.unwrap().unwrap();
    assert_eq!(fetched.amount, 1000);
    assert_eq!(fetched.attribution.fbclid.as_deref(), Some("abc"));
    assert!(store.get_donation("nope").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn duplicate_order_is_reported() {
    let store = store().await;
    store.insert_donation(new_donation("O1")).await.unwrap();
    let err = store.insert_donation(new_donation("O1")).await.unwrap_err();
    assert!(matches!(err, RelayError::DuplicateOrder { order_id } if order_id == "O1"));
  }

  #[tokio::test]
  async fn notification_keeps_stored_fields_it_does_not_carry() {
    let store = store().await;
    store.insert_donation(new_donation("O1")).await.unwrap();
    let notification = |receipt: Option<&str>, name: Option<&str>| ProviderNotification {
      receipt_id: receipt.map(str::to_string),
      donor_name: name.map(str::to_string),
      donor_email: None,
      payload: json!({ "orderId": "O1", "status": "success" }),
    };

    store
      .record_provider_notification("O1", notification(Some("R-1"), Some("Ada")))
      .await
      .unwrap();
    let record = store
      .record_provider_notification("O1", notification(None, None))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(record.receipt_id.as_deref(), Some("R-1"));
    assert_eq!(record.donor_name.as_deref(), Some("Ada"));
    assert_eq!(record.provider_payload.unwrap()["status"], "success");

    assert!(store
      .record_provider_notification("missing", notification(None, None))
      .await
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn backfill_only_fills_nulls() {
    let store = store().await;
    store.insert_donation(new_donation("O1")).await.unwrap();

    let first = Attribution {
      fbclid: Some("other".into()),
      fbp: Some("fb.1.1.1111111111".into()),
      fbc: Some("fb.1.1.abc".into()),
    };
    let record = store.backfill_attribution("O1", &first).await.unwrap();
    assert_eq!(record.attribution.fbclid.as_deref(), Some("abc"));
    assert_eq!(record.attribution.fbp.as_deref(), Some("fb.1.1.1111111111"));
    assert_eq!(record.attribution.fbc.as_deref(), Some("fb.1.1.abc"));

    let second = Attribution {
      fbclid: None,
      fbp: Some("fb.1.2.2222222222".into()),
      fbc: Some("X".into()),
    };
    let record = store.backfill_attribution("O1", &second).await.unwrap();
    assert_eq!(record.attribution, first_with_stored_click_id(&first));

    let err = store.backfill_attribution("missing", &second).await.unwrap_err();
    assert!(matches!(err, RelayError::DonationNotFound { .. }));
  }

  fn first_with_stored_click_id(first: &Attribution) -> Attribution {
    Attribution {
      fbclid: Some("abc".into()),
      ..first.clone()
    }
  }

  #[tokio::test]
  async fn attempt_lifecycle_and_success_transaction() {
    let store = store().await;
    store.insert_donation(new_donation("O1")).await.unwrap();

    let attempt = store
      .insert_attempt("O1", Some(json!({ "status": "success" })))
      .await
      .unwrap();
    assert_eq!(attempt.attempts, 0);
    assert_eq!(attempt.status, AttemptStatus::Pending);
    assert_eq!(store.active_attempt("O1").await.unwrap().unwrap().id, attempt.id);

    store
      .record_attempt_success("O1", attempt.id, 1, Utc::now())
      .await
      .unwrap();

    assert!(store.get_donation("O1").await.unwrap().unwrap().conversion_sent);
    let rows = store.list_attempts("O1").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, AttemptStatus::Sent);
    assert_eq!(rows[0].attempts, 1);
    assert_eq!(rows[0].raw_payload, Some(json!({ "status": "success" })));
    assert!(store.active_attempt("O1").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn success_for_unknown_attempt_leaves_flag_untouched() {
    let store = store().await;
    store.insert_donation(new_donation("O1")).await.unwrap();

    let err = store
      .record_attempt_success("O1", 999, 1, Utc::now())
      .await
      .unwrap_err();
    assert!(matches!(err, RelayError::AttemptNotFound { attempt_id: 999 }));
    assert!(!store.get_donation("O1").await.unwrap().unwrap().conversion_sent);
  }

  #[tokio::test]
  async fn attempt_for_unknown_donation_is_rejected() {
    let store = store().await;
    let err = store.insert_attempt("ghost", None).await.unwrap_err();
    assert!(matches!(err, RelayError::DonationNotFound { .. }));
  }

  #[tokio::test]
  async fn due_query_honours_cooldown_count_and_status() {
    let store = store().await;
    let now = Utc::now();
    let cutoff = now - Duration::minutes(5);

    for order_id in ["FRESH", "COOLED", "NEVER", "EXHAUSTED", "FAILED"] {
      store.insert_donation(new_donation(order_id)).await.unwrap();
    }
    let fail = |attempts: i32, at: DateTime<Utc>, status: AttemptStatus| AttemptFailure {
      attempts,
      at,
      error: "HTTP 500".into(),
      status,
    };

    let fresh = store.insert_attempt("FRESH", None).await.unwrap();
    store
      .record_attempt_failure(fresh.id, fail(1, now, AttemptStatus::Pending))
      .await
      .unwrap();
    let cooled = store.insert_attempt("COOLED", None).await.unwrap();
    store
      .record_attempt_failure(cooled.id, fail(1, now - Duration::minutes(6), AttemptStatus::Pending))
      .await
      .unwrap();
    let never = store.insert_attempt("NEVER", None).await.unwrap();
    let exhausted = store.insert_attempt("EXHAUSTED", None).await.unwrap();
    store
      .record_attempt_failure(exhausted.id, fail(3, now - Duration::hours(1), AttemptStatus::Pending))
      .await
      .unwrap();
    let failed = store.insert_attempt("FAILED", None).await.unwrap();
    store
      .record_attempt_failure(failed.id, fail(2, now - Duration::hours(1), AttemptStatus::Failed))
      .await
      .unwrap();

    let due: Vec<i64> = store
      .due_attempts(3, cutoff)
      .await
      .unwrap()
      .into_iter()
      .map(|a| a.id)
      .collect();
    assert_eq!(due, vec![cooled.id, never.id]);
  }

  #[tokio::test]
  async fn close_attempt_only_settles_pending_rows() {
    let store = store().await;
    store.insert_donation(new_donation("O1")).await.unwrap();
    let pending = store.insert_attempt("O1", None).await.unwrap();
    let failed = store.insert_attempt("O1", None).await.unwrap();
    store
      .record_attempt_failure(
        failed.id,
        AttemptFailure {
          attempts: 3,
          at: Utc::now(),
          error: "HTTP 500".into(),
          status: AttemptStatus::Failed,
        },
      )
      .await
      .unwrap();

    store.close_attempt(pending.id).await.unwrap();
    store.close_attempt(failed.id).await.unwrap();

    let rows = store.list_attempts("O1").await.unwrap();
    assert_eq!(rows[0].status, AttemptStatus::Sent);
    assert_eq!(rows[0].attempts, 0);
    assert_eq!(rows[1].status, AttemptStatus::Failed);
    assert!(store.due_attempts(3, Utc::now()).await.unwrap().is_empty());

    let err = store.close_attempt(999).await.unwrap_err();
    assert!(matches!(err, RelayError::AttemptNotFound { attempt_id: 999 }));
  }

  #[tokio::test]
  async fn failure_for_unknown_attempt_is_reported() {
    let store = store().await;
    let err = store
      .record_attempt_failure(
        42,
        AttemptFailure {
          attempts: 1,
          at: Utc::now(),
          error: "x".into(),
          status: AttemptStatus::Pending,
        },
      )
      .await
      .unwrap_err();
    assert!(matches!(err, RelayError::AttemptNotFound { attempt_id: 42 }));
  }
}
