// donation_app/src/web/routes.rs

use actix_web::web;

use crate::web::handlers::{donation_handlers, health_handlers, notification_handlers, sweep_handlers};

// Called in `main.rs` (and by handler tests) to configure services for the Actix App.
pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg.service(
    web::scope("/api/v1")
      .route("/health", web::get().to(health_handlers::health_check_handler))
      // Donation page: payment intent requested
      .service(
        web::scope("/donations")
          .route("", web::post().to(donation_handlers::create_donation_handler))
          .route(
            "/{order_id}/conversion",
            web::get().to(donation_handlers::conversion_status_handler),
          ),
      )
      // Payment provider callback
      .route(
        "/payments/notify",
        web::post().to(notification_handlers::payment_notification_handler),
      )
      // Operator trigger for the retry sweep
      .route(
        "/internal/conversions/sweep",
        web::post().to(sweep_handlers::trigger_sweep_handler),
      ),
  );
}
