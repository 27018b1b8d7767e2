// donation_app/src/services/conversion_api.rs

//! Reports conversions to the ad platform's HTTP endpoint.

use async_trait::async_trait;
use conversion_relay::{
  resolve_country, send_with_redo, ConversionPayload, ConversionSender, CountryLookup, DonationRecord, SendPolicy,
  SendReport,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct HttpConversionSender {
  client: reqwest::Client,
  endpoint: String,
  bearer_token: Option<String>,
  order_complete_url: String,
  lookup: Option<Arc<dyn CountryLookup>>,
  policy: SendPolicy,
}

impl HttpConversionSender {
  /// `client` should carry the request timeout; every call made here is bounded by it.
  pub fn new(
    client: reqwest::Client,
    endpoint: impl Into<String>,
    bearer_token: Option<String>,
    order_complete_url: impl Into<String>,
    lookup: Option<Arc<dyn CountryLookup>>,
  ) -> Self {
    Self {
      client,
      endpoint: endpoint.into(),
      bearer_token,
      order_complete_url: order_complete_url.into(),
      lookup,
      policy: SendPolicy::default(),
    }
  }

  pub fn with_policy(mut self, policy: SendPolicy) -> Self {
    self.policy = policy;
    self
  }

  fn order_complete_url_for(&self, order_id: &str) -> String {
    format!("{}?orderId={}", self.order_complete_url, order_id)
  }

  /// One POST. A 2xx must carry a JSON acknowledgement; anything else is an error string.
  async fn post_once(&self, payload: &ConversionPayload) -> Result<(), String> {
    let mut request = self.client.post(&self.endpoint).json(payload);
    if let Some(token) = self.bearer_token.as_deref() {
      request = request.bearer_auth(token);
    }

    match request.send().await {
      Ok(resp) if resp.status().is_success() => resp
        .json::<JsonValue>()
        .await
        .map(|ack| debug!(?ack, "Ad platform acknowledged conversion."))
        .map_err(|e| format!("invalid acknowledgement: {e}")),
      Ok(resp) => {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(format!("HTTP {}: {}", status.as_u16(), body))
      }
      Err(e) if e.is_timeout() => Err(format!("request timed out: {e}")),
      Err(e) => Err(format!("request failed: {e}")),
    }
  }
}

#[async_trait]
impl ConversionSender for HttpConversionSender {
  #[instrument(name = "HttpConversionSender::send", skip_all, fields(order_id = %record.order_id))]
  async fn send(&self, record: &DonationRecord) -> SendReport {
    let country = resolve_country(self.lookup.as_deref(), record).await;
    let payload = ConversionPayload::from_record(record, self.order_complete_url_for(&record.order_id), country);
    let payload = &payload;
    send_with_redo(&self.policy, move |_try_no| self.post_once(payload)).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
  use chrono::Utc;
  use conversion_relay::Attribution;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  #[derive(Debug, Clone)]
  struct Recorded {
    body: JsonValue,
    authorization: Option<String>,
  }

  /// What the fake ad platform answers on each call, by call index; the last entry repeats.
  struct FakePlatform {
    responses: Vec<(u16, &'static str)>,
    calls: AtomicUsize,
    received: Mutex<Vec<Recorded>>,
  }

  async fn events(req: HttpRequest, body: web::Json<JsonValue>, platform: web::Data<FakePlatform>) -> HttpResponse {
    let idx = platform.calls.fetch_add(1, Ordering::SeqCst);
    platform.received.lock().unwrap().push(Recorded {
      body: body.into_inner(),
      authorization: req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string),
    });
    let (status, body) = platform.responses[idx.min(platform.responses.len() - 1)];
    HttpResponse::build(actix_web::http::StatusCode::from_u16(status).unwrap())
      .content_type("application/json")
      .body(body)
  }

  async fn start(responses: Vec<(u16, &'static str)>) -> (String, web::Data<FakePlatform>) {
    let platform = web::Data::new(FakePlatform {
      responses,
      calls: AtomicUsize::new(0),
      received: Mutex::new(Vec::new()),
    });
    let data = platform.clone();
    let server = HttpServer::new(move || App::new().app_data(data.clone()).route("/events", web::post().to(events)))
      .workers(1)
      .bind(("127.0.0.1", 0))
      .unwrap();
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    (format!("http://{addr}/events"), platform)
  }

  fn record() -> DonationRecord {
    DonationRecord {
      order_id: "O1".into(),
      amount: 1000,
      currency: "EUR".into(),
      donor_name: Some("Ada".into()),
      donor_email: Some("ada@example.org".into()),
      receipt_id: Some("R-1".into()),
      attribution: Attribution {
        fbclid: Some("FC1".into()),
        fbp: Some("fb.1.1.1234567890".into()),
        fbc: Some("fb.1.1.FC1".into()),
      },
      client_ip: Some("81.2.69.142".into()),
      user_agent: Some("ua".into()),
      country: Some("DE".into()),
      conversion_sent: false,
      provider_payload: None,
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  fn sender(endpoint: String) -> HttpConversionSender {
    let client = reqwest::Client::builder()
      .timeout(std::time::Duration::from_secs(5))
      .build()
      .unwrap();
    HttpConversionSender::new(client, endpoint, Some("secret".into()), "https://donate.example/thank-you", None)
  }

  #[actix_web::test]
  async fn posts_payload_and_redoes_once_after_a_failure() {
    let (endpoint, platform) = start(vec![(503, r#"{"error":"busy"}"#), (200, r#"{"events_received":1}"#)]).await;

    let report = sender(endpoint).send(&record()).await;

    assert_eq!(report, SendReport::sent(2));
    let received = platform.received.lock().unwrap().clone();
    assert_eq!(received.len(), 2);
    let body = &received[1].body;
    assert_eq!(body["orderId"], "O1");
    assert_eq!(body["amount"], 10.0);
    assert_eq!(body["country"], "DE");
    assert_eq!(body["fbc"], "fb.1.1.FC1");
    assert_eq!(body["orderCompleteUrl"], "https://donate.example/thank-you?orderId=O1");
    assert_eq!(received[1].authorization.as_deref(), Some("Bearer secret"));
  }

  #[actix_web::test]
  async fn persistent_errors_report_the_last_status_and_body() {
    let (endpoint, platform) = start(vec![(500, "down")]).await;

    let report = sender(endpoint).send(&record()).await;

    assert_eq!(report, SendReport::failed(2, "HTTP 500: down"));
    assert_eq!(platform.calls.load(Ordering::SeqCst), 2);
  }

  #[actix_web::test]
  async fn success_status_without_json_acknowledgement_is_a_failure() {
    let (endpoint, _platform) = start(vec![(200, "ok")]).await;

    let report = sender(endpoint).send(&record()).await;

    assert!(!report.success);
    assert!(report.error.unwrap().starts_with("invalid acknowledgement"));
  }

  #[actix_web::test]
  async fn unreachable_endpoint_is_a_failure_not_a_panic() {
    let report = sender("http://127.0.0.1:1/events".into()).send(&record()).await;

    assert!(!report.success);
    assert_eq!(report.attempts, 2);
  }
}
