//! Admin API endpoints
//!
//! Feed registration, hub subscription requests and the follow graph.
//! All routes require the admin bearer token.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::auth::require_admin;
use crate::data::{Activity, Aggregate, Feed, NewActivity, NewFeed};
use crate::error::AppError;
use crate::service::{PublishReport, SubscriptionRequestReport};

/// Create admin router
///
/// Routes:
/// - POST /admin/feeds - Register a feed
/// - POST /admin/feeds/:feed_id/subscribe - Ask the feed's hubs to push to us
/// - POST /admin/aggregates - Create the aggregate owning a feed
/// - GET /admin/aggregates/:id - Show an aggregate
/// - POST /admin/aggregates/:id/activities - Post a new activity
/// - POST /admin/aggregates/:id/reposts - Repost an existing activity
/// - POST /admin/aggregates/:id/following - Follow another aggregate
/// - DELETE /admin/aggregates/:id/following/:other_id - Unfollow
/// - POST /admin/aggregates/:id/followers - Add a follower feed
/// - DELETE /admin/aggregates/:id/followers/:feed_id - Remove a follower feed
pub fn admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        // Feeds
        .route("/feeds", post(create_feed))
        .route("/feeds/:feed_id/subscribe", post(request_subscription))
        // Aggregates
        .route("/aggregates", post(create_aggregate))
        .route("/aggregates/:id", get(get_aggregate))
        .route("/aggregates/:id/activities", post(post_activity))
        .route("/aggregates/:id/reposts", post(repost_activity))
        // Follow graph
        .route("/aggregates/:id/following", post(follow))
        .route("/aggregates/:id/following/:other_id", delete(unfollow))
        .route("/aggregates/:id/followers", post(add_follower))
        .route("/aggregates/:id/followers/:feed_id", delete(remove_follower))
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}

// =============================================================================
// Feeds
// =============================================================================

/// POST /admin/feeds
async fn create_feed(
    State(state): State<AppState>,
    Json(req): Json<NewFeed>,
) -> Result<(StatusCode, Json<Feed>), AppError> {
    let feed = state.feeds.create_feed(req).await?;
    Ok((StatusCode::CREATED, Json(feed)))
}

/// POST /admin/feeds/:feed_id/subscribe
async fn request_subscription(
    State(state): State<AppState>,
    Path(feed_id): Path<String>,
) -> Result<(StatusCode, Json<SubscriptionRequestReport>), AppError> {
    let report = state.subscriptions.request_subscription(&feed_id).await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

// =============================================================================
// Aggregates
// =============================================================================

/// Create aggregate request
#[derive(Debug, Deserialize)]
struct CreateAggregateRequest {
    feed_id: String,
}

/// POST /admin/aggregates
async fn create_aggregate(
    State(state): State<AppState>,
    Json(req): Json<CreateAggregateRequest>,
) -> Result<(StatusCode, Json<Aggregate>), AppError> {
    let aggregate = state.publisher.create_aggregate(&req.feed_id).await?;
    Ok((StatusCode::CREATED, Json(aggregate)))
}

/// GET /admin/aggregates/:id
async fn get_aggregate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Aggregate>, AppError> {
    Ok(Json(state.publisher.get_aggregate(&id).await?))
}

/// Activity together with its fan-out result
#[derive(Debug, Serialize)]
struct PublishedActivity {
    activity: Activity,
    report: PublishReport,
}

/// POST /admin/aggregates/:id/activities
async fn post_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<NewActivity>,
) -> Result<(StatusCode, Json<PublishedActivity>), AppError> {
    if req.external_id.trim().is_empty() {
        return Err(AppError::Validation("external_id is required".to_string()));
    }

    let aggregate = state.publisher.get_aggregate(&id).await?;
    let (activity, report) = state.publisher.post(&aggregate, req).await?;
    Ok((StatusCode::CREATED, Json(PublishedActivity { activity, report })))
}

/// Repost request
#[derive(Debug, Deserialize)]
struct RepostRequest {
    activity_id: String,
}

/// POST /admin/aggregates/:id/reposts
async fn repost_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RepostRequest>,
) -> Result<Json<PublishedActivity>, AppError> {
    let aggregate = state.publisher.get_aggregate(&id).await?;
    let (activity, report) = state
        .publisher
        .repost(&aggregate, &req.activity_id)
        .await?;
    Ok(Json(PublishedActivity { activity, report }))
}

// =============================================================================
// Follow graph
// =============================================================================

/// Follow request
#[derive(Debug, Deserialize)]
struct FollowRequest {
    aggregate_id: String,
}

/// POST /admin/aggregates/:id/following
async fn follow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FollowRequest>,
) -> Result<StatusCode, AppError> {
    let aggregate = state.publisher.get_aggregate(&id).await?;
    let other = state.publisher.get_aggregate(&req.aggregate_id).await?;
    state.publisher.follow(&aggregate, &other).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /admin/aggregates/:id/following/:other_id
async fn unfollow(
    State(state): State<AppState>,
    Path((id, other_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let aggregate = state.publisher.get_aggregate(&id).await?;
    let other = state.publisher.get_aggregate(&other_id).await?;
    state.publisher.unfollow(&aggregate, &other).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Follower request
#[derive(Debug, Deserialize)]
struct FollowerRequest {
    feed_id: String,
}

/// POST /admin/aggregates/:id/followers
async fn add_follower(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FollowerRequest>,
) -> Result<StatusCode, AppError> {
    let aggregate = state.publisher.get_aggregate(&id).await?;
    state.publisher.followed_by(&aggregate, &req.feed_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /admin/aggregates/:id/followers/:feed_id
async fn remove_follower(
    State(state): State<AppState>,
    Path((id, feed_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let aggregate = state.publisher.get_aggregate(&id).await?;
    state.publisher.unfollowed_by(&aggregate, &feed_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
