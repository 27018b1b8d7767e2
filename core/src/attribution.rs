// conversion_relay/src/attribution.rs

//! Attribution token derivation and non-destructive backfill.

use crate::model::Attribution;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

const FBP_RANDOM_MODULUS: u128 = 10_000_000_000;

/// Builds the click-id cookie value from a raw `fbclid`.
pub fn derive_fbc(fbclid: &str, at: DateTime<Utc>) -> String {
  format!("fb.1.{}.{}", at.timestamp_millis(), fbclid)
}

/// Generates a browser-id cookie value for a visitor who arrived without one.
pub fn generate_fbp(at: DateTime<Utc>) -> String {
  let random = Uuid::new_v4().as_u128() % FBP_RANDOM_MODULUS;
  format!("fb.1.{}.{:010}", at.timestamp_millis(), random)
}

fn non_empty_str(payload: &JsonValue, key: &str) -> Option<String> {
  payload
    .get(key)
    .and_then(JsonValue::as_str)
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
}

impl Attribution {
  /// Reads `fbclid`, `fbp` and `fbc` string fields from a provider payload, if any.
  pub fn from_payload(payload: &JsonValue) -> Self {
    Self {
      fbclid: non_empty_str(payload, "fbclid"),
      fbp: non_empty_str(payload, "fbp"),
      fbc: non_empty_str(payload, "fbc"),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.fbclid.is_none() && self.fbp.is_none() && self.fbc.is_none()
  }

  /// Fields of `self` win; `fallback` only fills the gaps.
  pub fn coalesce(&self, fallback: &Attribution) -> Attribution {
    Attribution {
      fbclid: self.fbclid.clone().or_else(|| fallback.fbclid.clone()),
      fbp: self.fbp.clone().or_else(|| fallback.fbp.clone()),
      fbc: self.fbc.clone().or_else(|| fallback.fbc.clone()),
    }
  }

  /// Values to offer for the gaps in `current`.
  ///
  /// Only fields missing from `current` are set in the result, so applying it with
  /// COALESCE semantics can never overwrite a stored token. Payload tokens are
  /// preferred; otherwise `fbc` is derived from whichever `fbclid` is known and `fbp`
  /// is generated.
  pub fn backfill_candidates(current: &Attribution, payload: Option<&JsonValue>, at: DateTime<Utc>) -> Attribution {
    let from_payload = payload.map(Attribution::from_payload).unwrap_or_default();
    let fbclid = current.fbclid.clone().or(from_payload.fbclid);

    Attribution {
      fbclid: match current.fbclid {
        Some(_) => None,
        None => fbclid.clone(),
      },
      fbp: match current.fbp {
        Some(_) => None,
        None => from_payload.fbp.or_else(|| Some(generate_fbp(at))),
      },
      fbc: match current.fbc {
        Some(_) => None,
        None => from_payload.fbc.or_else(|| fbclid.as_deref().map(|id| derive_fbc(id, at))),
      },
    }
  }
}
