//! HTTP request handlers for the Raccoon service.

pub mod chat;
pub mod health;
pub mod me;
pub mod metrics;

pub use chat::chat;
pub use health::{health_check, readiness_check};
pub use me::get_me;
pub use metrics::metrics_handler;
