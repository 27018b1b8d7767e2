// donation_app/src/web/handlers/mod.rs

pub mod donation_handlers;
pub mod health_handlers;
pub mod notification_handlers;
pub mod sweep_handlers;

#[cfg(test)]
pub(crate) mod test_support;
