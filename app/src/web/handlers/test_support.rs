// donation_app/src/web/handlers/test_support.rs

//! Shared state and fakes for handler tests.

use crate::state::AppState;
use async_trait::async_trait;
use conversion_relay::{
  ConversionSender, DonationRecord, MemoryStore, Orchestrator, RetryPolicy, RetrySweeper, SendReport,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct CountingSender {
  report: SendReport,
  calls: AtomicUsize,
}

impl CountingSender {
  pub fn new(report: SendReport) -> Arc<Self> {
    Arc::new(Self {
      report,
      calls: AtomicUsize::new(0),
    })
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ConversionSender for CountingSender {
  async fn send(&self, _record: &DonationRecord) -> SendReport {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.report.clone()
  }
}

/// App state over an in-memory store. Returns the concrete store and sender for assertions.
pub fn test_state(report: SendReport) -> (AppState, Arc<MemoryStore>, Arc<CountingSender>) {
  let store = Arc::new(MemoryStore::new());
  let sender = CountingSender::new(report);
  let policy = RetryPolicy::default();
  let orchestrator = Arc::new(Orchestrator::new(store.clone(), sender.clone(), policy));
  let sweeper = Arc::new(RetrySweeper::new(store.clone(), orchestrator.clone(), policy));
  let state = AppState {
    store: store.clone(),
    orchestrator,
    sweeper,
  };
  (state, store, sender)
}
