// donation_app/src/web/handlers/health_handlers.rs

use actix_web::{web, HttpResponse};

use crate::state::AppState;

pub async fn health_check_handler(app_state: web::Data<AppState>) -> HttpResponse {
  HttpResponse::Ok().json(serde_json::json!({
    "status": "ok",
    "sweepInProgress": app_state.sweeper.is_sweeping(),
  }))
}
