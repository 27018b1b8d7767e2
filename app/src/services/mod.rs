// donation_app/src/services/mod.rs

//! Outbound HTTP collaborators of the conversion relay.

pub mod conversion_api;
pub mod geolocation;

pub use conversion_api::HttpConversionSender;
pub use geolocation::{GeoProvider, RotatingCountryLookup};
