// donation_app/src/services/geolocation.rs

//! Best-effort IP to country lookup over a rotating set of public services.

use async_trait::async_trait;
use conversion_relay::{is_public_ip, CountryLookup};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, instrument};

/// One geolocation service: `url_template` contains `{ip}`; `country_field` names the
/// top-level JSON field holding the ISO country code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoProvider {
  pub name: String,
  pub url_template: String,
  pub country_field: String,
}

impl GeoProvider {
  pub fn new(name: impl Into<String>, url_template: impl Into<String>, country_field: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      url_template: url_template.into(),
      country_field: country_field.into(),
    }
  }

  pub fn defaults() -> Vec<Self> {
    vec![
      Self::new("ipapi.co", "https://ipapi.co/{ip}/json/", "country_code"),
      Self::new("ipwho.is", "https://ipwho.is/{ip}", "country_code"),
      Self::new("ip-api.com", "http://ip-api.com/json/{ip}", "countryCode"),
    ]
  }

  fn url_for(&self, ip: &str) -> String {
    self.url_template.replace("{ip}", ip)
  }
}

/// Tries providers in turn starting at a cursor that advances on every lookup, so
/// consecutive lookups spread across services.
pub struct RotatingCountryLookup {
  client: reqwest::Client,
  providers: Vec<GeoProvider>,
  cursor: AtomicUsize,
}

impl RotatingCountryLookup {
  pub fn new(client: reqwest::Client, providers: Vec<GeoProvider>) -> Self {
    Self {
      client,
      providers,
      cursor: AtomicUsize::new(0),
    }
  }

  async fn query(&self, provider: &GeoProvider, ip: &str) -> Option<String> {
    let resp = match self.client.get(provider.url_for(ip)).send().await {
      Ok(resp) if resp.status().is_success() => resp,
      Ok(resp) => {
        debug!(provider = %provider.name, status = resp.status().as_u16(), "Geolocation lookup rejected.");
        return None;
      }
      Err(e) => {
        debug!(provider = %provider.name, error = %e, "Geolocation lookup failed.");
        return None;
      }
    };
    let body = resp.json::<JsonValue>().await.ok()?;
    body
      .get(&provider.country_field)
      .and_then(JsonValue::as_str)
      .map(str::trim)
      .filter(|code| code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()))
      .map(str::to_ascii_uppercase)
  }
}

#[async_trait]
impl CountryLookup for RotatingCountryLookup {
  #[instrument(name = "RotatingCountryLookup::country_for", skip(self))]
  async fn country_for(&self, ip: &str) -> Option<String> {
    if self.providers.is_empty() || !is_public_ip(ip) {
      return None;
    }
    let ip = ip.trim();
    let count = self.providers.len();
    let start = self.cursor.fetch_add(1, Ordering::Relaxed) % count;

    for offset in 0..count {
      let provider = &self.providers[(start + offset) % count];
      if let Some(country) = self.query(provider, ip).await {
        debug!(provider = %provider.name, %country, "Country resolved.");
        return Some(country);
      }
    }
    None
  }
}
