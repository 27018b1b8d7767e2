// conversion_relay/src/sweeper.rs

//! Periodic, single-flight retry of conversion attempts that have not been sent yet.

use crate::error::RelayResult;
use crate::orchestrator::{ConversionOutcome, Orchestrator};
use crate::policy::RetryPolicy;
use crate::store::ConversionStore;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

/// A process-wide "one at a time" gate. Acquiring never waits.
#[derive(Debug, Default)]
pub struct SingleFlight {
  busy: AtomicBool,
}

/// Held while the guarded work runs; releases the gate on drop.
#[derive(Debug)]
pub struct FlightPermit<'a> {
  flight: &'a SingleFlight,
}

impl SingleFlight {
  pub fn new() -> Self {
    Self::default()
  }

  /// `None` when another holder is in flight.
  pub fn try_acquire(&self) -> Option<FlightPermit<'_>> {
    self
      .busy
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| FlightPermit { flight: self })
  }

  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::Acquire)
  }
}

impl Drop for FlightPermit<'_> {
  fn drop(&mut self) {
    self.flight.busy.store(false, Ordering::Release);
  }
}

/// Per-sweep tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepStats {
  /// Due rows returned by the eligibility query.
  pub examined: usize,
  pub sent: usize,
  /// The record was already sent; its leftover pending row is closed.
  pub already_sent: usize,
  pub failed: usize,
  /// The orchestrator found nothing due for the row on a re-check under the order lock.
  pub skipped: usize,
  /// Rows whose donation record no longer exists.
  pub missing: usize,
  pub errored: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
  /// Another sweep was running; nothing was touched.
  Busy,
  Completed(SweepStats),
}

pub struct RetrySweeper {
  store: Arc<dyn ConversionStore>,
  orchestrator: Arc<Orchestrator>,
  policy: RetryPolicy,
  flight: SingleFlight,
}

impl RetrySweeper {
  pub fn new(store: Arc<dyn ConversionStore>, orchestrator: Arc<Orchestrator>, policy: RetryPolicy) -> Self {
    Self {
      store,
      orchestrator,
      policy,
      flight: SingleFlight::new(),
    }
  }

  pub fn is_sweeping(&self) -> bool {
    self.flight.is_busy()
  }

  /// Re-runs the orchestrator, without a payload, for every due attempt row.
  ///
  /// Returns `Busy` immediately if a sweep is already in flight. Only the eligibility
  /// query can fail the sweep; each row's outcome is contained and tallied.
  #[instrument(name = "RetrySweeper::sweep", skip_all)]
  pub async fn sweep(&self) -> RelayResult<SweepOutcome> {
    let Some(_permit) = self.flight.try_acquire() else {
      debug!("Sweep already in flight; skipping.");
      return Ok(SweepOutcome::Busy);
    };

    let cutoff = self.policy.cutoff(Utc::now());
    let due = self.store.due_attempts(self.policy.max_attempts, cutoff).await?;
    let mut stats = SweepStats {
      examined: due.len(),
      ..Default::default()
    };

    for attempt in due {
      let record = match self.store.get_donation(&attempt.order_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
          warn!(order_id = %attempt.order_id, attempt_id = attempt.id, "Donation missing for due attempt; skipping.");
          stats.missing += 1;
          continue;
        }
        Err(e) => {
          error!(order_id = %attempt.order_id, error = %e, "Could not load donation for due attempt.");
          stats.errored += 1;
          continue;
        }
      };

      match self.orchestrator.record_and_send(&record, None).await {
        ConversionOutcome::Sent { .. } => stats.sent += 1,
        ConversionOutcome::AlreadySent => {
          stats.already_sent += 1;
          if let Err(e) = self.store.close_attempt(attempt.id).await {
            error!(order_id = %attempt.order_id, attempt_id = attempt.id, error = %e, "Could not close attempt row.");
          }
        }
        ConversionOutcome::Failed { .. } => stats.failed += 1,
        ConversionOutcome::Exhausted | ConversionOutcome::NotDue => stats.skipped += 1,
        ConversionOutcome::Errored(_) => stats.errored += 1,
      }
    }

    if stats.examined > 0 {
      info!(?stats, "Retry sweep finished.");
    }
    Ok(SweepOutcome::Completed(stats))
  }

  /// Runs `sweep` every `period` until the returned handle is shut down.
  ///
  /// The first tick fires immediately. Ticks missed while a sweep runs are skipped.
  pub fn spawn(self: Arc<Self>, period: Duration) -> SweeperHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let join = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
      info!(period_secs = period.as_secs(), "Retry sweeper started.");

      loop {
        tokio::select! {
          _ = &mut shutdown_rx => break,
          _ = ticker.tick() => {
            if let Err(e) = self.sweep().await {
              error!(error = %e, "Retry sweep failed.");
            }
          }
        }
      }

      info!("Retry sweeper stopped.");
    });

    SweeperHandle {
      shutdown_tx: Some(shutdown_tx),
      join,
    }
  }
}

/// Owns the background sweep task.
pub struct SweeperHandle {
  shutdown_tx: Option<oneshot::Sender<()>>,
  join: JoinHandle<()>,
}

impl SweeperHandle {
  /// Stops the timer and waits for an in-flight sweep to finish.
  pub async fn shutdown(mut self) {
    if let Some(tx) = self.shutdown_tx.take() {
      let _ = tx.send(());
    }
    if let Err(e) = (&mut self.join).await {
      warn!(error = %e, "Retry sweeper task ended abnormally.");
    }
  }
}
