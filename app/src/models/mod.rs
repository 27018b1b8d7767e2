// donation_app/src/models/mod.rs

//! Row types as stored in SQLite, and their conversion into relay domain types.

pub mod attempt;
pub mod donation;

pub use attempt::AttemptRow;
pub use donation::DonationRow;
