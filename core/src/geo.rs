// conversion_relay/src/geo.rs

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Best-effort client-address to ISO country code resolution.
///
/// `None` means "unknown" and covers every failure; lookups never abort a send.
#[async_trait]
pub trait CountryLookup: Send + Sync {
  async fn country_for(&self, ip: &str) -> Option<String>;
}

/// Whether an address is worth sending to a public geolocation service.
pub fn is_public_ip(ip: &str) -> bool {
  match ip.trim().parse::<IpAddr>() {
    Ok(IpAddr::V4(v4)) => is_public_v4(&v4),
    Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
      Some(v4) => is_public_v4(&v4),
      None => is_public_v6(&v6),
    },
    Err(_) => false,
  }
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
  !(ip.is_private()
    || ip.is_loopback()
    || ip.is_link_local()
    || ip.is_unspecified()
    || ip.is_broadcast()
    || ip.is_documentation())
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
  let first = ip.segments()[0];
  let unique_local = (first & 0xfe00) == 0xfc00;
  let link_local = (first & 0xffc0) == 0xfe80;
  !(ip.is_loopback() || ip.is_unspecified() || unique_local || link_local)
}
