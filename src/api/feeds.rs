//! Public feed endpoints
//!
//! - GET /feeds/:feed_id - Feed metadata, people and entries as JSON

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::AppState;
use crate::error::AppError;
use crate::service::FeedView;

pub fn feeds_router() -> Router<AppState> {
    Router::new().route("/feeds/:feed_id", get(get_feed))
}

/// GET /feeds/:feed_id
///
/// Never includes the feed secret or verify token.
async fn get_feed(
    State(state): State<AppState>,
    Path(feed_id): Path<String>,
) -> Result<Json<FeedView>, AppError> {
    let view = state.feeds.get_feed_view(&feed_id).await?;
    Ok(Json(view))
}
