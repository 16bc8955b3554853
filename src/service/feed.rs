//! Feed registry
//!
//! Creates feeds and builds their public view.

use std::sync::Arc;

use serde::Serialize;

use crate::data::{Activity, Author, Feed, NewFeed, Repository};
use crate::error::AppError;
use crate::federation::validate_http_url;

/// Public representation of a feed with its people and entries resolved
#[derive(Debug, Clone, Serialize)]
pub struct FeedView {
    #[serde(flatten)]
    pub feed: Feed,
    pub authors: Vec<Author>,
    pub contributors: Vec<Author>,
    pub entries: Vec<Activity>,
}

/// Feed service
pub struct FeedService {
    repo: Arc<dyn Repository>,
}

impl FeedService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Register a feed.
    ///
    /// The URL and every hub must be absolute http(s) URLs, and the URL must
    /// not be registered yet. Credentials are generated by the store.
    pub async fn create_feed(&self, new_feed: NewFeed) -> Result<Feed, AppError> {
        validate_http_url(&new_feed.url)?;
        for hub in &new_feed.hubs {
            validate_http_url(hub)?;
        }

        if self.repo.find_feed_by_url(&new_feed.url).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "Feed {} is already registered",
                new_feed.url
            )));
        }

        let feed = self.repo.create_feed(&new_feed).await?;
        tracing::info!(feed_id = %feed.id, url = %feed.url, "Feed created");
        Ok(feed)
    }

    pub async fn get_feed(&self, feed_id: &str) -> Result<Feed, AppError> {
        self.repo.find_feed(feed_id).await?.ok_or(AppError::NotFound)
    }

    /// Feed with authors, contributors and entries in feed order
    pub async fn get_feed_view(&self, feed_id: &str) -> Result<FeedView, AppError> {
        let feed = self.get_feed(feed_id).await?;

        let authors = self.resolve_people(&feed.author_ids).await?;
        let contributors = self.resolve_people(&feed.contributor_ids).await?;
        let entries = self.repo.feed_activities(&feed.id).await?;

        Ok(FeedView {
            feed,
            authors,
            contributors,
            entries,
        })
    }

    async fn resolve_people(&self, ids: &[String]) -> Result<Vec<Author>, AppError> {
        let mut people = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(author) = self.repo.find_author(id).await? {
                people.push(author);
            }
        }
        Ok(people)
    }
}
