//! Aggregate publisher
//!
//! Posts and reposts activities into an aggregate's feed and fans them out:
//! every follower feed gets a reference to the activity, then every hub the
//! feed advertises is pinged. Fan-out is best-effort; one broken follower or
//! hub never stops the others and never fails the originating write.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::data::{Activity, Aggregate, Feed, NewActivity, Repository};
use crate::error::AppError;
use crate::federation::HubNotifier;
use crate::metrics::{FANOUT_DURATION_SECONDS, FANOUT_REPOSTS_TOTAL, HUB_PINGS_TOTAL};

/// What a publish achieved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Follower feeds that now reference the activity
    pub reposted: usize,
    /// Follower reposts that failed or timed out
    pub failed: usize,
    /// Hubs that acknowledged the publish ping
    pub pings: usize,
}

/// Outcome of one isolated sub-task
enum TaskOutcome {
    Done,
    Failed(String),
    TimedOut,
}

impl TaskOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Done => "success",
            Self::Failed(_) => "failure",
            Self::TimedOut => "timeout",
        }
    }
}

/// Fan-out / aggregate publisher
pub struct AggregatePublisher {
    repo: Arc<dyn Repository>,
    notifier: Arc<dyn HubNotifier>,
    fanout_width: usize,
    task_timeout: Duration,
}

impl AggregatePublisher {
    /// Create new publisher
    ///
    /// # Arguments
    /// * `fanout_width` - Maximum concurrent reposts or pings per publish
    /// * `task_timeout` - Deadline for each repost or ping
    pub fn new(
        repo: Arc<dyn Repository>,
        notifier: Arc<dyn HubNotifier>,
        fanout_width: usize,
        task_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            notifier,
            fanout_width: fanout_width.max(1),
            task_timeout,
        }
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    /// Create the aggregate that owns `feed_id`
    pub async fn create_aggregate(&self, feed_id: &str) -> Result<Aggregate, AppError> {
        self.repo.find_feed(feed_id).await?.ok_or(AppError::NotFound)?;

        if self.repo.find_aggregate_by_feed(feed_id).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "Feed {} already has an aggregate",
                feed_id
            )));
        }

        let aggregate = self.repo.create_aggregate(feed_id).await?;
        tracing::info!(aggregate_id = %aggregate.id, feed_id = %feed_id, "Aggregate created");
        Ok(aggregate)
    }

    pub async fn get_aggregate(&self, aggregate_id: &str) -> Result<Aggregate, AppError> {
        self.repo
            .find_aggregate(aggregate_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    // =========================================================================
    // Posting
    // =========================================================================

    /// Create `activity` in the aggregate's own feed, then publish it.
    ///
    /// Posting an external id that already exists in this feed is a no-op
    /// that returns the stored activity with an empty report.
    pub async fn post(
        &self,
        aggregate: &Aggregate,
        activity: NewActivity,
    ) -> Result<(Activity, PublishReport), AppError> {
        let (stored, created) = self
            .repo
            .find_or_create_activity(&aggregate.feed_id, &activity)
            .await?;

        if !created && stored.feed_id != aggregate.feed_id {
            return Err(AppError::Conflict(format!(
                "Activity {} belongs to another feed",
                stored.external_id
            )));
        }

        let added = self.repo.add_entry(&aggregate.feed_id, &stored.id).await?;
        if !added {
            return Ok((stored, PublishReport::default()));
        }

        tracing::info!(
            aggregate_id = %aggregate.id,
            activity_id = %stored.id,
            kind = %stored.kind,
            "Activity posted"
        );

        let report = self.publish(aggregate, &stored).await;
        Ok((stored, report))
    }

    /// Reference an existing activity from the aggregate's feed, then publish.
    ///
    /// Ownership stays with the original feed. Reposting an activity the
    /// feed already references publishes nothing.
    pub async fn repost(
        &self,
        aggregate: &Aggregate,
        activity_id: &str,
    ) -> Result<(Activity, PublishReport), AppError> {
        let activity = self
            .repo
            .find_activity(activity_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let added = self.repo.add_entry(&aggregate.feed_id, &activity.id).await?;
        if !added {
            tracing::debug!(
                aggregate_id = %aggregate.id,
                activity_id = %activity.id,
                "Activity already in feed; not republishing"
            );
            return Ok((activity, PublishReport::default()));
        }

        let report = self.publish(aggregate, &activity).await;
        Ok((activity, report))
    }

    /// Repost `activity` into every follower feed, then ping the hubs of the
    /// aggregate's feed.
    ///
    /// Never fails: per-follower and per-hub errors are logged and counted.
    pub async fn publish(&self, aggregate: &Aggregate, activity: &Activity) -> PublishReport {
        self.publish_all(aggregate, std::slice::from_ref(activity))
            .await
    }

    /// Repost every activity into every follower feed, then ping the hubs
    /// once for the whole batch.
    ///
    /// `reposted` and `failed` count follower/activity pairs.
    pub async fn publish_all(&self, aggregate: &Aggregate, activities: &[Activity]) -> PublishReport {
        let mut report = PublishReport::default();
        if activities.is_empty() {
            return report;
        }

        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.fanout_width));
        let mut tasks = Vec::new();

        for activity in activities {
            for follower_id in &aggregate.followers {
                if follower_id == &aggregate.feed_id {
                    continue;
                }

                let semaphore = semaphore.clone();
                let repo = self.repo.clone();
                let follower_id = follower_id.clone();
                let activity_id = activity.id.clone();
                let task_timeout = self.task_timeout;

                let task = tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        let outcome = TaskOutcome::Failed("fan-out closed".to_string());
                        return (follower_id, activity_id, outcome);
                    };

                    let outcome = match tokio::time::timeout(
                        task_timeout,
                        repo.add_entry(&follower_id, &activity_id),
                    )
                    .await
                    {
                        Ok(Ok(_)) => TaskOutcome::Done,
                        Ok(Err(error)) => TaskOutcome::Failed(error.to_string()),
                        Err(_) => TaskOutcome::TimedOut,
                    };

                    (follower_id, activity_id, outcome)
                });

                tasks.push(task);
            }
        }

        for task in tasks {
            let (follower_id, activity_id, outcome) = match task.await {
                Ok(result) => result,
                Err(error) => {
                    tracing::warn!(%error, "Repost task panicked");
                    report.failed += 1;
                    FANOUT_REPOSTS_TOTAL.with_label_values(&["failure"]).inc();
                    continue;
                }
            };

            FANOUT_REPOSTS_TOTAL
                .with_label_values(&[outcome.label()])
                .inc();

            match outcome {
                TaskOutcome::Done => report.reposted += 1,
                TaskOutcome::Failed(error) => {
                    tracing::warn!(
                        follower_id = %follower_id,
                        activity_id = %activity_id,
                        %error,
                        "Repost to follower failed"
                    );
                    report.failed += 1;
                }
                TaskOutcome::TimedOut => {
                    tracing::warn!(
                        follower_id = %follower_id,
                        activity_id = %activity_id,
                        "Repost to follower timed out"
                    );
                    report.failed += 1;
                }
            }
        }

        FANOUT_DURATION_SECONDS
            .with_label_values(&["reposts"])
            .observe(started.elapsed().as_secs_f64());

        match self.repo.find_feed(&aggregate.feed_id).await {
            Ok(Some(feed)) => report.pings = self.ping(&feed).await,
            Ok(None) => {
                tracing::warn!(feed_id = %aggregate.feed_id, "Aggregate feed vanished; skipping hub pings");
            }
            Err(error) => {
                tracing::warn!(feed_id = %aggregate.feed_id, %error, "Failed to load feed for hub pings");
            }
        }

        tracing::info!(
            aggregate_id = %aggregate.id,
            activities = activities.len(),
            reposted = report.reposted,
            failed = report.failed,
            pings = report.pings,
            "Activities published"
        );

        report
    }

    /// Notify every hub of `feed`.
    ///
    /// Returns the number of hubs that accepted the ping. Failures are
    /// logged and never retried here.
    pub async fn ping(&self, feed: &Feed) -> usize {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.fanout_width));
        let mut tasks = Vec::new();

        for hub_url in &feed.metadata.hubs {
            let semaphore = semaphore.clone();
            let notifier = self.notifier.clone();
            let hub_url = hub_url.clone();
            let feed_url = feed.url.clone();
            let task_timeout = self.task_timeout;

            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (hub_url, TaskOutcome::Failed("fan-out closed".to_string()));
                };

                let outcome = match tokio::time::timeout(
                    task_timeout,
                    notifier.notify(&hub_url, &feed_url),
                )
                .await
                {
                    Ok(Ok(())) => TaskOutcome::Done,
                    Ok(Err(error)) => TaskOutcome::Failed(error.to_string()),
                    Err(_) => TaskOutcome::TimedOut,
                };

                (hub_url, outcome)
            }));
        }

        let mut acknowledged = 0;
        for task in tasks {
            let (hub_url, outcome) = match task.await {
                Ok(result) => result,
                Err(error) => {
                    tracing::warn!(%error, "Hub ping task panicked");
                    HUB_PINGS_TOTAL.with_label_values(&["failure"]).inc();
                    continue;
                }
            };

            HUB_PINGS_TOTAL.with_label_values(&[outcome.label()]).inc();

            match outcome {
                TaskOutcome::Done => acknowledged += 1,
                TaskOutcome::Failed(error) => {
                    tracing::warn!(hub = %hub_url, feed_id = %feed.id, %error, "Hub ping failed");
                }
                TaskOutcome::TimedOut => {
                    tracing::warn!(hub = %hub_url, feed_id = %feed.id, "Hub ping timed out");
                }
            }
        }

        FANOUT_DURATION_SECONDS
            .with_label_values(&["pings"])
            .observe(started.elapsed().as_secs_f64());

        acknowledged
    }

    // =========================================================================
    // Follow graph
    // =========================================================================

    /// `aggregate` starts following `other`.
    ///
    /// Adds `other`'s feed to `aggregate.following` and `aggregate`'s feed to
    /// `other.followers`.
    pub async fn follow(&self, aggregate: &Aggregate, other: &Aggregate) -> Result<(), AppError> {
        if aggregate.feed_id == other.feed_id {
            return Err(AppError::Validation(
                "An aggregate cannot follow its own feed".to_string(),
            ));
        }

        self.repo.add_following(&aggregate.id, &other.feed_id).await?;
        self.repo.add_follower(&other.id, &aggregate.feed_id).await?;

        tracing::info!(aggregate_id = %aggregate.id, following = %other.feed_id, "Followed");
        Ok(())
    }

    /// Reverse of `follow`
    pub async fn unfollow(&self, aggregate: &Aggregate, other: &Aggregate) -> Result<(), AppError> {
        self.repo
            .remove_following(&aggregate.id, &other.feed_id)
            .await?;
        self.repo.remove_follower(&other.id, &aggregate.feed_id).await?;

        tracing::info!(aggregate_id = %aggregate.id, unfollowed = %other.feed_id, "Unfollowed");
        Ok(())
    }

    /// Register `feed_id` (typically a remote feed) as a follower
    pub async fn followed_by(&self, aggregate: &Aggregate, feed_id: &str) -> Result<bool, AppError> {
        if aggregate.feed_id == feed_id {
            return Err(AppError::Validation(
                "An aggregate cannot follow its own feed".to_string(),
            ));
        }

        self.repo.find_feed(feed_id).await?.ok_or(AppError::NotFound)?;
        let added = self.repo.add_follower(&aggregate.id, feed_id).await?;

        tracing::info!(aggregate_id = %aggregate.id, follower = %feed_id, added, "Follower added");
        Ok(added)
    }

    /// Drop `feed_id` from the followers list
    pub async fn unfollowed_by(
        &self,
        aggregate: &Aggregate,
        feed_id: &str,
    ) -> Result<bool, AppError> {
        let removed = self.repo.remove_follower(&aggregate.id, feed_id).await?;

        tracing::info!(aggregate_id = %aggregate.id, follower = %feed_id, removed, "Follower removed");
        Ok(removed)
    }
}
