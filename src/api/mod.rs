//! API layer
//!
//! HTTP handlers for:
//! - PubSubHubbub callbacks (hub verification, content delivery)
//! - Public feed views
//! - Admin API
//! - Health and metrics (Prometheus)

mod admin;
mod feeds;
mod ops;
mod subscriptions;

pub use admin::admin_router;
pub use feeds::feeds_router;
pub use ops::ops_router;
pub use subscriptions::subscriptions_router;
