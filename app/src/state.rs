// donation_app/src/state.rs
use conversion_relay::{ConversionStore, Orchestrator, RetrySweeper};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
  pub store: Arc<dyn ConversionStore>,
  pub orchestrator: Arc<Orchestrator>,
  pub sweeper: Arc<RetrySweeper>,
}
