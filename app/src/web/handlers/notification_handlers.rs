// donation_app/src/web/handlers/notification_handlers.rs

use actix_web::{web, HttpResponse};
use conversion_relay::{ConversionOutcome, ProviderNotification};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{info, instrument, warn};

use crate::errors::AppError;
use crate::state::AppState;

const SUCCESS_STATUSES: [&str; 4] = ["succeeded", "success", "paid", "completed"];

/// Fields of the provider callback this service relies on. The raw body is kept as well.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderCallback {
  order_id: String,
  status: String,
  #[serde(default)]
  receipt_id: Option<String>,
  #[serde(default, alias = "donorName")]
  name: Option<String>,
  #[serde(default, alias = "donorEmail")]
  email: Option<String>,
}

pub fn is_success_status(status: &str) -> bool {
  let status = status.trim();
  SUCCESS_STATUSES.iter().any(|s| s.eq_ignore_ascii_case(status))
}

fn outcome_label(outcome: &ConversionOutcome) -> &'static str {
  match outcome {
    ConversionOutcome::AlreadySent => "already_sent",
    ConversionOutcome::Sent { .. } => "sent",
    ConversionOutcome::Failed { exhausted: false, .. } => "failed_will_retry",
    ConversionOutcome::Failed { exhausted: true, .. } => "failed_exhausted",
    ConversionOutcome::Exhausted => "exhausted",
    ConversionOutcome::NotDue => "not_due",
    ConversionOutcome::Errored(_) => "errored",
  }
}

/// Payment provider's asynchronous result callback.
///
/// Persists the payload and, for a successful payment, runs the first conversion
/// attempt. The provider always gets 200 once the payload is stored: conversion
/// failures are retried by the sweeper, not by the provider.
#[instrument(name = "handler::payment_notification", skip_all, fields(payload_size = body.len()))]
pub async fn payment_notification_handler(
  app_state: web::Data<AppState>,
  body: web::Bytes,
) -> Result<HttpResponse, AppError> {
  let payload: JsonValue =
    serde_json::from_slice(&body).map_err(|e| AppError::Validation(format!("Malformed notification body: {}", e)))?;
  let callback: ProviderCallback = serde_json::from_value(payload.clone())
    .map_err(|e| AppError::Validation(format!("Unexpected notification shape: {}", e)))?;

  let order_id = callback.order_id.clone();
  let record = app_state
    .store
    .record_provider_notification(
      &order_id,
      ProviderNotification {
        receipt_id: callback.receipt_id,
        donor_name: callback.name,
        donor_email: callback.email,
        payload: payload.clone(),
      },
    )
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Donation '{}'", order_id)))?;

  if !is_success_status(&callback.status) {
    info!(%order_id, status = %callback.status, "Payment not successful; no conversion to report.");
    return Ok(HttpResponse::Ok().json(json!({ "status": "received" })));
  }

  let outcome = app_state.orchestrator.record_and_send(&record, Some(payload)).await;
  match &outcome {
    ConversionOutcome::Errored(e) => warn!(%order_id, error = %e, "First conversion attempt errored."),
    other => info!(%order_id, outcome = outcome_label(other), "First conversion attempt finished."),
  }

  Ok(HttpResponse::Ok().json(json!({ "status": "received" })))
}
