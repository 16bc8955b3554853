//! Feed merge service
//!
//! Reconciles a pushed feed into the stored one and reports which entries
//! are new. Merges of the same feed are serialized in-process by
//! `FeedLocks`; the store applies each plan in one IMMEDIATE transaction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::data::{Feed, MergeCommit, MergePlan, NewActivity, NewAuthor, Repository};
use crate::error::AppError;
use crate::federation::IncomingFeed;
use crate::metrics::MERGED_ENTRIES_TOTAL;

const DEFAULT_MAX_TRACKED_FEEDS: usize = 10_000;

/// Per-feed async mutexes
pub struct FeedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    max_tracked_feeds: usize,
}

impl Default for FeedLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedLocks {
    pub fn new() -> Self {
        Self::with_max_tracked_feeds(DEFAULT_MAX_TRACKED_FEEDS)
    }

    /// Create with an explicit cap on idle entries kept in memory
    pub fn with_max_tracked_feeds(max_tracked_feeds: usize) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            max_tracked_feeds: max_tracked_feeds.max(1),
        }
    }

    /// Wait for exclusive access to `feed_id`
    pub async fn lock(&self, feed_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;

            if !locks.contains_key(feed_id) && locks.len() >= self.max_tracked_feeds {
                // Only the map holds idle locks
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }

            locks
                .entry(feed_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        lock.lock_owned().await
    }

    /// Number of feeds with a tracked lock
    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

fn unique_people(people: Vec<NewAuthor>) -> Vec<NewAuthor> {
    let mut seen = HashSet::new();
    people
        .into_iter()
        .filter(|person| seen.insert(person.external_id.clone()))
        .collect()
}

/// Build the store instructions for merging `incoming` into `local`.
///
/// Entries and people are deduplicated by external id, keeping the first
/// occurrence. Entries without an external id cannot be deduplicated and are
/// dropped.
pub fn build_merge_plan(local: &Feed, incoming: IncomingFeed) -> MergePlan {
    let mut seen = HashSet::new();
    let mut entries: Vec<NewActivity> = Vec::with_capacity(incoming.entries.len());

    for entry in incoming.entries {
        if entry.external_id.trim().is_empty() {
            tracing::warn!(feed_id = %local.id, "Dropping incoming entry without an id");
            continue;
        }
        if !seen.insert(entry.external_id.clone()) {
            tracing::debug!(
                feed_id = %local.id,
                external_id = %entry.external_id,
                "Duplicate entry in incoming feed"
            );
            continue;
        }
        entries.push(entry);
    }

    MergePlan {
        feed_id: local.id.clone(),
        metadata: incoming.metadata,
        authors: unique_people(incoming.authors),
        contributors: unique_people(incoming.contributors),
        entries,
    }
}

/// Feed merge engine
pub struct FeedMergeService {
    repo: Arc<dyn Repository>,
    locks: FeedLocks,
}

impl FeedMergeService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            locks: FeedLocks::new(),
        }
    }

    /// Merge `incoming` into `local`.
    ///
    /// Returns the updated feed and the entries this merge created. Entries
    /// that were already known are never listed, so merging the same
    /// document twice yields no new entries the second time.
    pub async fn merge(&self, local: &Feed, incoming: IncomingFeed) -> Result<MergeCommit, AppError> {
        let plan = build_merge_plan(local, incoming);
        let incoming_count = plan.entries.len();

        let _guard = self.locks.lock(&local.id).await;
        let commit = self.repo.commit_merge(&plan).await?;

        let new_count = commit.new_entries.len();
        MERGED_ENTRIES_TOTAL
            .with_label_values(&["new"])
            .inc_by(new_count as u64);
        MERGED_ENTRIES_TOTAL
            .with_label_values(&["known"])
            .inc_by((incoming_count - new_count) as u64);

        tracing::info!(
            feed_id = %local.id,
            incoming = incoming_count,
            new = new_count,
            "Feed merged"
        );

        Ok(commit)
    }
}
