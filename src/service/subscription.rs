//! Subscription service
//!
//! Drives the PubSubHubbub callback: answers hub challenges, authenticates
//! content deliveries, merges them and hands new entries to the publisher.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::merge::FeedMergeService;
use super::publish::AggregatePublisher;
use crate::config::ServerConfig;
use crate::data::{Activity, Feed, Repository, SubscriptionState};
use crate::error::AppError;
use crate::federation::{
    ChallengeResponse, FeedDecoder, HubChallenge, HubNotifier, SubscribeRequest, Subscription,
};
use crate::metrics::{CONTENT_DELIVERIES_TOTAL, HUB_VERIFICATIONS_TOTAL};

/// Hubs asked in parallel by `request_subscription`
const SUBSCRIBE_CONCURRENCY: usize = 4;

/// Result of an accepted content delivery
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub feed_id: String,
    /// External ids of the entries this delivery introduced
    pub new_entries: Vec<String>,
    /// Whether the new entries are being published through an owning
    /// aggregate; the fan-out finishes after the delivery is answered
    pub fan_out: bool,
}

/// Result of asking the hubs of a feed to subscribe us
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequestReport {
    pub requested: usize,
    pub failed: usize,
}

/// Subscription service
pub struct SubscriptionService {
    repo: Arc<dyn Repository>,
    decoder: Arc<dyn FeedDecoder>,
    notifier: Arc<dyn HubNotifier>,
    merger: Arc<FeedMergeService>,
    publisher: Arc<AggregatePublisher>,
    server: ServerConfig,
}

impl SubscriptionService {
    pub fn new(
        repo: Arc<dyn Repository>,
        decoder: Arc<dyn FeedDecoder>,
        notifier: Arc<dyn HubNotifier>,
        merger: Arc<FeedMergeService>,
        publisher: Arc<AggregatePublisher>,
        server: ServerConfig,
    ) -> Self {
        Self {
            repo,
            decoder,
            notifier,
            merger,
            publisher,
            server,
        }
    }

    fn subscription_for(&self, feed: &Feed) -> Subscription {
        Subscription::for_feed(feed, self.server.callback_url(&feed.id))
    }

    async fn find_feed(&self, feed_id: &str) -> Result<Feed, AppError> {
        self.repo.find_feed(feed_id).await?.ok_or(AppError::NotFound)
    }

    async fn transition(
        &self,
        feed: &Feed,
        from: SubscriptionState,
        to: SubscriptionState,
    ) -> Result<(), AppError> {
        if from != to {
            self.repo.set_subscription_state(&feed.id, to).await?;
            tracing::debug!(
                feed_id = %feed.id,
                from = from.as_str(),
                to = to.as_str(),
                "Subscription state changed"
            );
        }
        Ok(())
    }

    /// Answer a hub verification request for `feed_id`.
    ///
    /// Fails with `NotFound` for unknown feeds. Otherwise the returned
    /// response echoes the challenge or signals not found, and the feed's
    /// subscription state follows the outcome.
    pub async fn verify_challenge(
        &self,
        feed_id: &str,
        challenge: &HubChallenge,
    ) -> Result<ChallengeResponse, AppError> {
        let feed = self.find_feed(feed_id).await?;
        let subscription = self.subscription_for(&feed);

        if challenge.challenge.is_none() {
            HUB_VERIFICATIONS_TOTAL.with_label_values(&["rejected"]).inc();
            return Ok(subscription.challenge_response(challenge));
        }

        let previous = feed.subscription_state;
        let pending = previous.on_challenge();
        self.transition(&feed, previous, pending).await?;

        let response = subscription.challenge_response(challenge);
        let verified = response.is_success();
        let next =
            SubscriptionState::on_verification(previous, verified, challenge.is_unsubscribe());
        self.transition(&feed, pending, next).await?;

        if let Some(lease_seconds) = challenge.lease_seconds {
            tracing::info!(feed_id = %feed.id, lease_seconds, "Hub requested lease");
        }

        if verified {
            HUB_VERIFICATIONS_TOTAL.with_label_values(&["verified"]).inc();
            tracing::info!(
                feed_id = %feed.id,
                mode = challenge.mode.as_deref().unwrap_or("subscribe"),
                state = next.as_str(),
                "Hub challenge verified"
            );
        } else {
            HUB_VERIFICATIONS_TOTAL.with_label_values(&["rejected"]).inc();
            tracing::warn!(feed_id = %feed.id, "Hub challenge rejected");
        }

        Ok(response)
    }

    /// Accept a content delivery for `feed_id`.
    ///
    /// # Errors
    /// - `NotFound` for unknown feeds
    /// - `InvalidSignature` when `X-Hub-Signature` is missing or wrong
    /// - `Validation` when the body cannot be decoded
    pub async fn deliver(
        &self,
        feed_id: &str,
        body: &[u8],
        content_type: Option<&str>,
        signature: Option<&str>,
    ) -> Result<DeliveryReport, AppError> {
        let feed = match self.find_feed(feed_id).await {
            Ok(feed) => feed,
            Err(error) => {
                CONTENT_DELIVERIES_TOTAL.with_label_values(&["unknown_feed"]).inc();
                return Err(error);
            }
        };

        if !self.subscription_for(&feed).verify_content(body, signature) {
            CONTENT_DELIVERIES_TOTAL.with_label_values(&["invalid_signature"]).inc();
            tracing::warn!(feed_id = %feed.id, "Rejected delivery with bad signature");
            return Err(AppError::InvalidSignature);
        }

        let incoming = match self.decoder.decode(body, content_type) {
            Ok(incoming) => incoming,
            Err(error) => {
                CONTENT_DELIVERIES_TOTAL.with_label_values(&["undecodable"]).inc();
                return Err(error);
            }
        };

        if feed.subscription_state != SubscriptionState::Subscribed {
            tracing::debug!(
                feed_id = %feed.id,
                state = feed.subscription_state.as_str(),
                "Signed delivery for a feed that is not subscribed"
            );
        }

        let commit = self.merger.merge(&feed, incoming).await?;
        CONTENT_DELIVERIES_TOTAL.with_label_values(&["accepted"]).inc();

        let new_entries = commit
            .new_entries
            .iter()
            .map(|entry| entry.external_id.clone())
            .collect();
        let fan_out = self.spawn_fan_out(&feed, commit.new_entries).await;

        Ok(DeliveryReport {
            feed_id: feed.id,
            new_entries,
            fan_out,
        })
    }

    /// Publish `entries` through the aggregate owning `feed` on a detached
    /// task. Returns `false` when there is nothing to publish.
    async fn spawn_fan_out(&self, feed: &Feed, entries: Vec<Activity>) -> bool {
        if entries.is_empty() {
            return false;
        }

        let aggregate = match self.repo.find_aggregate_by_feed(&feed.id).await {
            Ok(Some(aggregate)) => aggregate,
            Ok(None) => return false,
            Err(error) => {
                // The merge is durable; fan-out is best-effort
                tracing::warn!(feed_id = %feed.id, %error, "Failed to load aggregate for fan-out");
                return false;
            }
        };

        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            publisher.publish_all(&aggregate, &entries).await;
        });

        true
    }

    /// Ask every hub of `feed_id` to push the feed to our callback
    pub async fn request_subscription(
        &self,
        feed_id: &str,
    ) -> Result<SubscriptionRequestReport, AppError> {
        let feed = self.find_feed(feed_id).await?;

        if feed.metadata.hubs.is_empty() {
            return Err(AppError::Validation(format!(
                "Feed {} advertises no hubs",
                feed.id
            )));
        }

        let request = SubscribeRequest {
            callback_url: self.server.callback_url(&feed.id),
            topic_url: feed.url.clone(),
            verify_token: feed.credentials.verification_token().to_string(),
            secret: feed.credentials.secret().to_string(),
        };

        let results = stream::iter(feed.metadata.hubs.clone())
            .map(|hub_url| {
                let notifier = self.notifier.clone();
                let request = request.clone();
                async move {
                    let result = notifier.subscribe(&hub_url, &request).await;
                    (hub_url, result)
                }
            })
            .buffer_unordered(SUBSCRIBE_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        let mut report = SubscriptionRequestReport::default();
        for (hub_url, result) in results {
            match result {
                Ok(()) => report.requested += 1,
                Err(error) => {
                    tracing::warn!(hub = %hub_url, feed_id = %feed.id, %error, "Subscription request failed");
                    report.failed += 1;
                }
            }
        }

        if report.requested == 0 {
            return Err(AppError::Federation(format!(
                "No hub accepted the subscription request for {}",
                feed.url
            )));
        }

        Ok(report)
    }
}
