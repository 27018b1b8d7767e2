// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use async_trait::async_trait;
use conversion_relay::{
  Attribution, ConversionSender, ConversionStore, DonationRecord, MemoryStore, NewDonation, Orchestrator, RetryPolicy,
  SendReport,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::Level;

// --- Tracing Setup (once per test binary) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

// --- Fixtures ---
pub fn new_donation(order_id: &str) -> NewDonation {
  NewDonation {
    order_id: order_id.to_string(),
    amount: 1000,
    currency: "EUR".to_string(),
    attribution: Attribution {
      fbclid: Some("FC1".to_string()),
      fbp: None,
      fbc: None,
    },
    client_ip: Some("81.2.69.142".to_string()),
    user_agent: Some("Mozilla/5.0 (test)".to_string()),
  }
}

pub async fn seed(store: &MemoryStore, order_id: &str) -> DonationRecord {
  store.insert_donation(new_donation(order_id)).await.unwrap()
}

pub fn provider_payload(order_id: &str) -> serde_json::Value {
  serde_json::json!({
    "orderId": order_id,
    "status": "success",
    "receiptId": "R-1",
  })
}

pub fn orchestrator(store: &Arc<MemoryStore>, sender: &Arc<ScriptedSender>) -> Arc<Orchestrator> {
  orchestrator_with(store, sender, RetryPolicy::default())
}

pub fn orchestrator_with(store: &Arc<MemoryStore>, sender: &Arc<ScriptedSender>, policy: RetryPolicy) -> Arc<Orchestrator> {
  Arc::new(Orchestrator::new(store.clone(), sender.clone(), policy))
}

/// Default attempt limit, retries allowed straight away.
pub fn no_cooldown() -> RetryPolicy {
  RetryPolicy::new(3, chrono::Duration::zero())
}

// --- Senders ---

/// Plays back queued reports, then repeats the fallback. Counts every call.
pub struct ScriptedSender {
  script: Mutex<VecDeque<SendReport>>,
  fallback: SendReport,
  calls: AtomicUsize,
  seen: Mutex<Vec<DonationRecord>>,
}

impl ScriptedSender {
  pub fn always(report: SendReport) -> Arc<Self> {
    Arc::new(Self {
      script: Mutex::new(VecDeque::new()),
      fallback: report,
      calls: AtomicUsize::new(0),
      seen: Mutex::new(Vec::new()),
    })
  }

  pub fn succeeding() -> Arc<Self> {
    Self::always(SendReport::sent(1))
  }

  /// Every send makes the full redo and fails, as a down ad platform would.
  pub fn failing() -> Arc<Self> {
    Self::always(SendReport::failed(2, "HTTP 503: unavailable"))
  }

  pub fn scripted(reports: Vec<SendReport>, fallback: SendReport) -> Arc<Self> {
    Arc::new(Self {
      script: Mutex::new(reports.into()),
      fallback,
      calls: AtomicUsize::new(0),
      seen: Mutex::new(Vec::new()),
    })
  }

  /// Logical sends requested by the orchestrator.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn last_seen(&self) -> Option<DonationRecord> {
    self.seen.lock().last().cloned()
  }
}

#[async_trait]
impl ConversionSender for ScriptedSender {
  async fn send(&self, record: &DonationRecord) -> SendReport {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.seen.lock().push(record.clone());
    self.script.lock().pop_front().unwrap_or_else(|| self.fallback.clone())
  }
}

/// Blocks every send until released, so tests can hold a flow mid-flight.
pub struct GatedSender {
  pub entered: Notify,
  pub release: Notify,
  calls: AtomicUsize,
}

impl GatedSender {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      entered: Notify::new(),
      release: Notify::new(),
      calls: AtomicUsize::new(0),
    })
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ConversionSender for GatedSender {
  async fn send(&self, _record: &DonationRecord) -> SendReport {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.entered.notify_one();
    self.release.notified().await;
    SendReport::sent(1)
  }
}
