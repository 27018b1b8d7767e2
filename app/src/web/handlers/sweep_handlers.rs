// donation_app/src/web/handlers/sweep_handlers.rs

use actix_web::{web, HttpResponse};
use conversion_relay::SweepOutcome;
use serde_json::json;
use tracing::instrument;

use crate::errors::AppError;
use crate::state::AppState;

/// Runs one retry sweep now. Answers 409 if the timer's sweep is already running.
#[instrument(name = "handler::trigger_sweep", skip_all)]
pub async fn trigger_sweep_handler(app_state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
  match app_state.sweeper.sweep().await? {
    SweepOutcome::Busy => Ok(HttpResponse::Conflict().json(json!({ "status": "busy" }))),
    SweepOutcome::Completed(stats) => Ok(HttpResponse::Ok().json(json!({ "status": "completed", "stats": stats }))),
  }
}

#[cfg(test)]
mod tests {
  use crate::web::handlers::test_support::test_state;
  use crate::web::routes::configure_app_routes;
  use actix_web::{http::StatusCode, test, web, App};
  use conversion_relay::{Attribution, ConversionStore, NewDonation, SendReport};
  use serde_json::Value as JsonValue;

  #[actix_web::test]
  async fn manual_sweep_retries_pending_rows() {
    let (state, store, sender) = test_state(SendReport::sent(1));
    store
      .insert_donation(NewDonation {
        order_id: "O1".into(),
        amount: 1000,
        currency: "EUR".into(),
        attribution: Attribution::default(),
        client_ip: None,
        user_agent: None,
      })
      .await
      .unwrap();
    // Never attempted, so due straight away.
    store.insert_attempt("O1", None).await.unwrap();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure_app_routes)).await;

    let req = test::TestRequest::post().uri("/api/v1/internal/conversions/sweep").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: JsonValue = test::read_body_json(resp).await;
    assert_eq!(body["stats"]["examined"], 1);
    assert_eq!(body["stats"]["sent"], 1);
    assert_eq!(sender.calls(), 1);
    assert!(store.get_donation("O1").await.unwrap().unwrap().conversion_sent);
  }
}
