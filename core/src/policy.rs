// conversion_relay/src/policy.rs

//! The two retry policies, kept apart: the sender's immediate redo inside one
//! attempt, and the sweep's bounded re-attempts across time.

use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;
pub const DEFAULT_COOLDOWN_SECS: i64 = 5 * 60;
pub const DEFAULT_TRIES_PER_SEND: u32 = 2;

/// Bounds on logical attempts recorded in the attempt log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Once a row's counter reaches this, it is marked failed and never swept again.
  pub max_attempts: i32,
  /// Minimum time between a failed attempt and its retry.
  pub cooldown: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      cooldown: Duration::seconds(DEFAULT_COOLDOWN_SECS),
    }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: i32, cooldown: Duration) -> Self {
    Self { max_attempts, cooldown }
  }

  /// Rows whose last attempt is at or before this instant have cooled down.
  pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
    now - self.cooldown
  }

  pub fn is_exhausted(&self, attempts: i32) -> bool {
    attempts >= self.max_attempts
  }

  /// A row never attempted is always cooled down.
  pub fn is_cooled_down(&self, last_attempt_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last_attempt_at.map_or(true, |at| at <= self.cutoff(now))
  }
}

/// How many HTTP calls a single send may make before reporting failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPolicy {
  pub tries_per_send: u32,
}

impl Default for SendPolicy {
  fn default() -> Self {
    Self {
      tries_per_send: DEFAULT_TRIES_PER_SEND,
    }
  }
}
