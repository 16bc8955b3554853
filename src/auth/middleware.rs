//! Authentication middleware
//!
//! Protects the admin routes with the configured bearer token.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use crate::AppState;
use crate::error::AppError;
use crate::federation::constant_time_eq;

/// Check a presented bearer token against the admin token
pub fn is_admin_token(presented: &str, expected: &str) -> bool {
    !expected.is_empty() && constant_time_eq(presented.as_bytes(), expected.as_bytes())
}

/// Middleware to require the admin bearer token
///
/// # Usage
/// ```ignore
/// let admin_routes = Router::new()
///     .route("/feeds", ...)
///     .route_layer(middleware::from_fn_with_state(state, require_admin));
/// ```
pub async fn require_admin(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(AppError::Unauthorized)?;

    if !is_admin_token(bearer.token(), &state.config.admin.token) {
        tracing::warn!(path = %request.uri().path(), "Rejected admin request with bad token");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}
