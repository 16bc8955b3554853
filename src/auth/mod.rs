//! Admin authentication
//!
//! Handles:
//! - Bearer token check for /admin routes

mod middleware;

pub use middleware::{is_admin_token, require_admin};
