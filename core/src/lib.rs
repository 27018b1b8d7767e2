// src/lib.rs

//! Conversion Relay: at-least-once reporting of completed donations to an ad platform.
//!
//! The crate provides:
//!  - The `Orchestrator`, which sends a donation's conversion at most once, backfills
//!    attribution tokens on the first attempt and logs every attempt.
//!  - The `RetrySweeper`, a single-flight periodic task that re-drives failed attempts
//!    with a bounded count and a cool-down.
//!  - The `ConversionStore`, `ConversionSender` and `CountryLookup` seams, plus an
//!    in-memory store.
//!  - A small named-step async `Pipeline` engine, on which the orchestrator is built.

pub mod core;
pub mod pipeline;
pub mod error;

pub mod model;
pub mod attribution;
pub mod policy;
pub mod sender;
pub mod geo;
pub mod store;
pub mod orchestrator;
pub mod sweeper;

// --- Re-exports for the Public API ---

pub use crate::core::{ContextData, PipelineControl, PipelineResult, SkipCondition, StepDef};
pub use crate::pipeline::Pipeline;
pub use crate::error::{PipelineError, RelayError, RelayResult};

pub use crate::model::{
  Attribution, AttemptFailure, AttemptStatus, ConversionAttempt, DonationRecord, NewDonation, ProviderNotification,
};
pub use crate::attribution::{derive_fbc, generate_fbp};
pub use crate::policy::{RetryPolicy, SendPolicy};
pub use crate::sender::{resolve_country, send_with_redo, ConversionPayload, ConversionSender, SendReport};
pub use crate::geo::{is_public_ip, CountryLookup};
pub use crate::store::{ConversionStore, MemoryStore};
pub use crate::orchestrator::{ConversionOutcome, Orchestrator};
pub use crate::sweeper::{RetrySweeper, SingleFlight, SweepOutcome, SweepStats, SweeperHandle};

/*
    Conversion flow:
    1. The donation page creates a record (`ConversionStore::insert_donation`) with the
       amount and whatever attribution tokens the browser had.
    2. The payment provider's success callback is persisted
       (`record_provider_notification`), then `Orchestrator::record_and_send(&record,
       Some(payload))` runs the first attempt.
    3. `RetrySweeper::spawn` re-drives pending rows on a timer until they are sent or
       reach `RetryPolicy::max_attempts`, at which point the row is marked `failed`.
*/
