// conversion_relay/src/orchestrator.rs

//! Decides whether a donation still needs its conversion reported, delegates the send,
//! and records the outcome against the store.
//!
//! A call runs as a pipeline of named steps over a `ConversionCtxData`:
//!
//! 1. `load_donation` re-reads the record and stops if the conversion was already sent.
//! 2. `backfill_attribution` fills missing attribution tokens (first attempt only).
//! 3. `open_attempt` picks the attempt-log row this call drives and stops unless it is
//!    due. Only a first attempt on an order with no log yet creates a row.
//! 4. `send_conversion` hands the record to the `ConversionSender`.
//! 5. `record_outcome` persists success (flag + row, one transaction) or failure.

use crate::core::{ContextData, PipelineControl, SkipCondition};
use crate::error::{RelayError, RelayResult};
use crate::model::{Attribution, AttemptFailure, AttemptStatus, ConversionAttempt, DonationRecord};
use crate::pipeline::Pipeline;
use crate::policy::RetryPolicy;
use crate::sender::{ConversionSender, SendReport};
use crate::store::ConversionStore;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

const STEP_LOAD_DONATION: &str = "load_donation";
const STEP_BACKFILL_ATTRIBUTION: &str = "backfill_attribution";
const STEP_OPEN_ATTEMPT: &str = "open_attempt";
const STEP_SEND_CONVERSION: &str = "send_conversion";
const STEP_RECORD_OUTCOME: &str = "record_outcome";

/// What `record_and_send` did. It never returns an error; failures are reported here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
  /// The record was already marked sent. Nothing was transmitted.
  AlreadySent,
  /// The ad platform acknowledged the report.
  Sent { attempts: i32 },
  /// The send failed and was logged on the attempt row. `exhausted` means the row is
  /// now `failed` and will not be retried.
  Failed {
    attempts: i32,
    error: String,
    exhausted: bool,
  },
  /// The order's attempts are used up: its log holds no `pending` row. Nothing was sent.
  Exhausted,
  /// The pending row is still cooling down, or no first attempt has opened a row yet.
  /// Nothing was sent.
  NotDue,
  /// The flow itself broke (storage error, unknown order). Logged, nothing recorded.
  Errored(String),
}

/// Underlying data for one orchestration run.
#[derive(Debug, Clone)]
pub struct ConversionCtxData {
  pub record: DonationRecord,
  /// Present only for the first attempt, triggered by the provider notification.
  pub raw_payload: Option<JsonValue>,
  pub attempt: Option<ConversionAttempt>,
  pub report: Option<SendReport>,
  pub outcome: Option<ConversionOutcome>,
}

impl ConversionCtxData {
  fn new(record: DonationRecord, raw_payload: Option<JsonValue>) -> Self {
    Self {
      record,
      raw_payload,
      attempt: None,
      report: None,
      outcome: None,
    }
  }
}

/// Per-order async locks, so concurrent triggers for one order run one at a time.
#[derive(Default)]
struct OrderLocks {
  inner: Mutex<HashMap<String, OrderSlot>>,
}

struct OrderSlot {
  mutex: Arc<AsyncMutex<()>>,
  /// Callers holding or waiting for `mutex`. The slot goes when this reaches zero.
  holders: usize,
}

struct OrderGuard<'a> {
  locks: &'a OrderLocks,
  order_id: String,
  guard: Option<OwnedMutexGuard<()>>,
}

impl OrderLocks {
  async fn lock(&self, order_id: &str) -> OrderGuard<'_> {
    let mutex = {
      let mut map = self.inner.lock();
      let slot = map.entry(order_id.to_string()).or_insert_with(|| OrderSlot {
        mutex: Arc::new(AsyncMutex::new(())),
        holders: 0,
      });
      slot.holders += 1;
      slot.mutex.clone()
    };
    // Built before waiting: a caller dropped mid-wait still gives its slot back.
    let mut order_guard = OrderGuard {
      locks: self,
      order_id: order_id.to_string(),
      guard: None,
    };
    order_guard.guard = Some(mutex.lock_owned().await);
    order_guard
  }
}

impl Drop for OrderGuard<'_> {
  fn drop(&mut self) {
    self.guard.take();
    let mut map = self.locks.inner.lock();
    if let Some(slot) = map.get_mut(&self.order_id) {
      slot.holders = slot.holders.saturating_sub(1);
      if slot.holders == 0 {
        map.remove(&self.order_id);
      }
    }
  }
}

/// The conversion orchestrator. Cheap to share behind an `Arc`.
pub struct Orchestrator {
  pipeline: Pipeline<ConversionCtxData, RelayError>,
  locks: OrderLocks,
  policy: RetryPolicy,
}

impl Orchestrator {
  pub fn new(store: Arc<dyn ConversionStore>, sender: Arc<dyn ConversionSender>, policy: RetryPolicy) -> Self {
    let skip_without_payload: SkipCondition<ConversionCtxData> =
      Arc::new(|data: &ConversionCtxData| data.raw_payload.is_none());

    let mut p = Pipeline::<ConversionCtxData, RelayError>::new(&[
      (STEP_LOAD_DONATION, None),
      (STEP_BACKFILL_ATTRIBUTION, Some(skip_without_payload)),
      (STEP_OPEN_ATTEMPT, None),
      (STEP_SEND_CONVERSION, None),
      (STEP_RECORD_OUTCOME, None),
    ]);

    let s = store.clone();
    p.on_root(STEP_LOAD_DONATION, move |ctx| load_donation(s.clone(), ctx));
    let s = store.clone();
    p.on_root(STEP_BACKFILL_ATTRIBUTION, move |ctx| backfill_attribution(s.clone(), ctx));
    let s = store.clone();
    p.on_root(STEP_OPEN_ATTEMPT, move |ctx| open_attempt(s.clone(), policy, ctx));
    p.on_root(STEP_SEND_CONVERSION, move |ctx| send_conversion(sender.clone(), ctx));
    p.on_root(STEP_RECORD_OUTCOME, move |ctx| record_outcome(store.clone(), policy, ctx));

    Self {
      pipeline: p,
      locks: OrderLocks::default(),
      policy,
    }
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  /// Ensures the donation's conversion is reported, recording the attempt.
  ///
  /// The caller must already have verified that the payment succeeded. Pass the raw
  /// provider payload on the first attempt; retries pass `None` and skip the backfill.
  ///
  /// Sends only when the order's pending row is under `max_attempts` and past its
  /// cool-down, checked under the order's lock. A retry never creates a row, and a
  /// replayed first attempt never reopens an order whose row already failed.
  #[instrument(
    name = "Orchestrator::record_and_send",
    skip_all,
    fields(order_id = %record.order_id, first_attempt = raw_payload.is_some())
  )]
  pub async fn record_and_send(&self, record: &DonationRecord, raw_payload: Option<JsonValue>) -> ConversionOutcome {
    if record.conversion_sent {
      debug!("Conversion already sent; nothing to do.");
      return ConversionOutcome::AlreadySent;
    }

    let _order_guard = self.locks.lock(&record.order_id).await;
    let ctx = ContextData::new(ConversionCtxData::new(record.clone(), raw_payload));

    match self.pipeline.run(ctx.clone()).await {
      Ok(_) => ctx.with(|data| data.outcome.clone()).unwrap_or_else(|| {
        ConversionOutcome::Errored("conversion pipeline finished without an outcome".to_string())
      }),
      Err(e) => {
        warn!(error = %e, "Conversion flow failed; the attempt log was not updated.");
        ConversionOutcome::Errored(e.to_string())
      }
    }
  }
}

async fn load_donation(
  store: Arc<dyn ConversionStore>,
  ctx: ContextData<ConversionCtxData>,
) -> RelayResult<PipelineControl> {
  let order_id = ctx.with(|data| data.record.order_id.clone());
  let current = store
    .get_donation(&order_id)
    .await?
    .ok_or(RelayError::DonationNotFound { order_id })?;

  let already_sent = current.conversion_sent;
  ctx.update(|data| {
    data.record = current;
    if already_sent {
      data.outcome = Some(ConversionOutcome::AlreadySent);
    }
  });

  if already_sent {
    debug!("Stored record is already marked sent.");
    return Ok(PipelineControl::Stop);
  }
  Ok(PipelineControl::Continue)
}

async fn backfill_attribution(
  store: Arc<dyn ConversionStore>,
  ctx: ContextData<ConversionCtxData>,
) -> RelayResult<PipelineControl> {
  let (order_id, candidates) = ctx.with(|data| {
    (
      data.record.order_id.clone(),
      Attribution::backfill_candidates(&data.record.attribution, data.raw_payload.as_ref(), Utc::now()),
    )
  });

  if candidates.is_empty() {
    return Ok(PipelineControl::Continue);
  }

  let updated = store.backfill_attribution(&order_id, &candidates).await?;
  debug!(attribution = ?updated.attribution, "Attribution backfilled.");
  ctx.update(|data| data.record = updated);
  Ok(PipelineControl::Continue)
}

fn stop_with(ctx: &ContextData<ConversionCtxData>, outcome: ConversionOutcome) -> RelayResult<PipelineControl> {
  ctx.update(|data| data.outcome = Some(outcome));
  Ok(PipelineControl::Stop)
}

async fn open_attempt(
  store: Arc<dyn ConversionStore>,
  policy: RetryPolicy,
  ctx: ContextData<ConversionCtxData>,
) -> RelayResult<PipelineControl> {
  let (order_id, raw_payload) = ctx.with(|data| (data.record.order_id.clone(), data.raw_payload.clone()));

  // A record only ever has one pending row: every call drives that row if it is due.
  let attempt = match store.active_attempt(&order_id).await? {
    Some(active) if policy.is_exhausted(active.attempts) => {
      warn!(attempt_id = active.id, attempts = active.attempts, "Pending row is over the attempt limit.");
      return stop_with(&ctx, ConversionOutcome::Exhausted);
    }
    Some(active) if !policy.is_cooled_down(active.last_attempt_at, Utc::now()) => {
      debug!(attempt_id = active.id, attempts = active.attempts, "Attempt row still cooling down.");
      return stop_with(&ctx, ConversionOutcome::NotDue);
    }
    Some(active) => active,
    None => {
      if !store.list_attempts(&order_id).await?.is_empty() {
        info!("Conversion attempts for this order are exhausted.");
        return stop_with(&ctx, ConversionOutcome::Exhausted);
      }
      if raw_payload.is_none() {
        debug!("No attempt row yet; retries wait for the first attempt.");
        return stop_with(&ctx, ConversionOutcome::NotDue);
      }
      store.insert_attempt(&order_id, raw_payload).await?
    }
  };

  debug!(attempt_id = attempt.id, attempts = attempt.attempts, "Attempt row opened.");
  ctx.update(|data| data.attempt = Some(attempt));
  Ok(PipelineControl::Continue)
}

async fn send_conversion(
  sender: Arc<dyn ConversionSender>,
  ctx: ContextData<ConversionCtxData>,
) -> RelayResult<PipelineControl> {
  let record = ctx.with(|data| data.record.clone());
  let report = sender.send(&record).await;
  ctx.update(|data| data.report = Some(report));
  Ok(PipelineControl::Continue)
}

async fn record_outcome(
  store: Arc<dyn ConversionStore>,
  policy: RetryPolicy,
  ctx: ContextData<ConversionCtxData>,
) -> RelayResult<PipelineControl> {
  let (order_id, attempt, report) = ctx.with(|data| {
    (
      data.record.order_id.clone(),
      data.attempt.clone(),
      data.report.clone(),
    )
  });
  let attempt = attempt.ok_or_else(|| RelayError::Internal("no attempt row opened".to_string()))?;
  let report = report.ok_or_else(|| RelayError::Internal("no send report".to_string()))?;

  let attempts = attempt.attempts + 1;
  let now = Utc::now();

  let outcome = if report.success {
    store
      .record_attempt_success(&order_id, attempt.id, attempts, now)
      .await?;
    info!(attempt_id = attempt.id, attempts, http_calls = report.attempts, "Conversion sent.");
    ConversionOutcome::Sent { attempts }
  } else {
    let error = report
      .error
      .unwrap_or_else(|| "conversion send failed".to_string());
    let exhausted = policy.is_exhausted(attempts);
    let status = if exhausted {
      AttemptStatus::Failed
    } else {
      AttemptStatus::Pending
    };
    store
      .record_attempt_failure(
        attempt.id,
        AttemptFailure {
          attempts,
          at: now,
          error: error.clone(),
          status,
        },
      )
      .await?;
    warn!(
      attempt_id = attempt.id,
      attempts,
      exhausted,
      error = %error,
      "Conversion send failed."
    );
    ConversionOutcome::Failed {
      attempts,
      error,
      exhausted,
    }
  };

  ctx.update(|data| data.outcome = Some(outcome));
  Ok(PipelineControl::Continue)
}
