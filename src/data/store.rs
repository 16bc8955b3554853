//! Store interfaces
//!
//! The merge engine and the fan-out publisher only talk to persistence
//! through these traits. `Database` implements all of them.

use async_trait::async_trait;

use super::models::*;
use crate::error::AppError;

/// Feed persistence
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Create a feed with freshly generated credentials
    async fn create_feed(&self, feed: &NewFeed) -> Result<Feed, AppError>;

    async fn find_feed(&self, id: &str) -> Result<Option<Feed>, AppError>;

    async fn find_feed_by_url(&self, url: &str) -> Result<Option<Feed>, AppError>;

    async fn set_subscription_state(
        &self,
        feed_id: &str,
        state: SubscriptionState,
    ) -> Result<(), AppError>;

    /// Append an activity reference to a feed's entry list.
    ///
    /// Returns `false` when the feed already references the activity.
    /// Fails with `NotFound` when the feed does not exist.
    async fn add_entry(&self, feed_id: &str, activity_id: &str) -> Result<bool, AppError>;

    /// Apply a merge plan in a single transaction
    async fn commit_merge(&self, plan: &MergePlan) -> Result<MergeCommit, AppError>;
}

/// Activity persistence
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn find_activity(&self, id: &str) -> Result<Option<Activity>, AppError>;

    async fn find_activity_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Activity>, AppError>;

    /// Idempotent upsert keyed on external id.
    ///
    /// Returns the stored activity and whether this call created it.
    async fn find_or_create_activity(
        &self,
        feed_id: &str,
        activity: &NewActivity,
    ) -> Result<(Activity, bool), AppError>;

    /// Activities referenced by a feed, in feed order
    async fn feed_activities(&self, feed_id: &str) -> Result<Vec<Activity>, AppError>;
}

/// Author persistence
#[async_trait]
pub trait AuthorStore: Send + Sync {
    async fn find_author(&self, id: &str) -> Result<Option<Author>, AppError>;

    async fn find_author_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Author>, AppError>;

    /// Idempotent upsert keyed on external id
    async fn find_or_create_author(&self, author: &NewAuthor) -> Result<Author, AppError>;
}

/// Aggregate persistence
#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn create_aggregate(&self, feed_id: &str) -> Result<Aggregate, AppError>;

    async fn find_aggregate(&self, id: &str) -> Result<Option<Aggregate>, AppError>;

    async fn find_aggregate_by_feed(&self, feed_id: &str) -> Result<Option<Aggregate>, AppError>;

    /// Returns `false` when the feed was already followed
    async fn add_following(&self, aggregate_id: &str, feed_id: &str) -> Result<bool, AppError>;

    async fn remove_following(&self, aggregate_id: &str, feed_id: &str)
    -> Result<bool, AppError>;

    /// Returns `false` when the feed was already a follower
    async fn add_follower(&self, aggregate_id: &str, feed_id: &str) -> Result<bool, AppError>;

    async fn remove_follower(&self, aggregate_id: &str, feed_id: &str) -> Result<bool, AppError>;
}

/// Everything the services need from persistence
pub trait Repository: FeedStore + ActivityStore + AuthorStore + AggregateStore {}

impl<T> Repository for T where T: FeedStore + ActivityStore + AuthorStore + AggregateStore {}
