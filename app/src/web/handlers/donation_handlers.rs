// donation_app/src/web/handlers/donation_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use conversion_relay::{Attribution, NewDonation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::state::AppState;

const DEFAULT_CURRENCY: &str = "EUR";

/// Sent by the donation page when the donor asks to pay.
#[derive(Debug, Deserialize)]
pub struct CreateDonationRequest {
  /// Minor currency units.
  pub amount: i64,
  #[serde(default)]
  pub currency: Option<String>,
  #[serde(default)]
  pub fbclid: Option<String>,
  #[serde(default)]
  pub fbp: Option<String>,
  #[serde(default)]
  pub fbc: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDonationResponse {
  pub order_id: String,
  pub amount: i64,
  pub currency: String,
}

fn non_blank(value: Option<String>) -> Option<String> {
  value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn normalize_currency(raw: Option<String>) -> Result<String, AppError> {
  let currency = non_blank(raw).unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
  if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
    return Err(AppError::Validation(format!("Invalid currency code '{}'", currency)));
  }
  Ok(currency.to_ascii_uppercase())
}

/// First hop of `X-Forwarded-For`, else the peer address.
pub fn client_ip(req: &HttpRequest) -> Option<String> {
  req
    .headers()
    .get("x-forwarded-for")
    .and_then(|h| h.to_str().ok())
    .and_then(|list| list.split(',').next())
    .map(str::trim)
    .filter(|ip| !ip.is_empty())
    .map(str::to_string)
    .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()))
}

#[instrument(name = "handler::create_donation", skip_all, fields(amount = body.amount))]
pub async fn create_donation_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  body: web::Json<CreateDonationRequest>,
) -> Result<HttpResponse, AppError> {
  let body = body.into_inner();
  if body.amount <= 0 {
    return Err(AppError::Validation("Amount must be greater than zero".to_string()));
  }
  let currency = normalize_currency(body.currency)?;

  let new_donation = NewDonation {
    order_id: Uuid::new_v4().to_string(),
    amount: body.amount,
    currency,
    attribution: Attribution {
      fbclid: non_blank(body.fbclid),
      fbp: non_blank(body.fbp),
      fbc: non_blank(body.fbc),
    },
    client_ip: client_ip(&req),
    user_agent: req
      .headers()
      .get("user-agent")
      .and_then(|h| h.to_str().ok())
      .map(str::to_string),
  };

  let record = app_state.store.insert_donation(new_donation).await?;
  info!(order_id = %record.order_id, "Donation record created.");

  Ok(HttpResponse::Created().json(CreateDonationResponse {
    order_id: record.order_id,
    amount: record.amount,
    currency: record.currency,
  }))
}

/// Conversion state of one donation and its attempt log.
#[instrument(name = "handler::conversion_status", skip(app_state))]
pub async fn conversion_status_handler(
  app_state: web::Data<AppState>,
  order_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
  let order_id = order_id.into_inner();
  let record = app_state
    .store
    .get_donation(&order_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Donation '{}'", order_id)))?;
  let attempts = app_state.store.list_attempts(&order_id).await?;

  Ok(HttpResponse::Ok().json(json!({
    "orderId": record.order_id,
    "conversionSent": record.conversion_sent,
    "attempts": attempts,
  })))
}
