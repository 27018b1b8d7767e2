// conversion_relay/src/error.rs
use anyhow::Error as AnyhowError;
use thiserror::Error;

/// Faults in how a pipeline was wired, detected while it runs.
#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("Handler missing for step: {step_name}")]
  HandlerMissing { step_name: String },
}

/// Errors raised by the record store and the conversion flow.
///
/// These never cross `Orchestrator::record_and_send`; they are returned by store
/// methods and by `RetrySweeper::sweep` when the eligibility query itself fails.
#[derive(Debug, Error)]
pub enum RelayError {
  #[error("Donation not found: {order_id}")]
  DonationNotFound { order_id: String },

  #[error("Conversion attempt not found: {attempt_id}")]
  AttemptNotFound { attempt_id: i64 },

  #[error("Donation already exists: {order_id}")]
  DuplicateOrder { order_id: String },

  #[error("Record store failure. Source: {source}")]
  Store {
    #[source]
    source: AnyhowError,
  },

  #[error("Invalid stored value for '{field}': {value}")]
  InvalidStoredValue { field: &'static str, value: String },

  #[error("Conversion pipeline error: {source}")]
  Pipeline {
    #[from]
    source: PipelineError,
  },

  #[error("Internal error: {0}")]
  Internal(String),
}

impl RelayError {
  /// Wraps a backend error (sqlx, I/O, ...) raised inside a store implementation.
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    RelayError::Store {
      source: AnyhowError::new(err),
    }
  }
}

impl From<AnyhowError> for RelayError {
  fn from(err: AnyhowError) -> Self {
    RelayError::Store { source: err }
  }
}

pub type RelayResult<T, E = RelayError> = std::result::Result<T, E>;
