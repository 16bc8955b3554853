//! Data models
//!
//! Rust structs representing stored entities (feeds, authors, activities,
//! aggregates) and the write-side inputs used to create them.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Feed
// =============================================================================

/// Shared secret and verify token of a feed.
///
/// Generated once when the feed is created. Only signature computation and
/// handshake verification read them, so they are skipped by serialization
/// and redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct FeedCredentials {
    secret: String,
    verification_token: String,
}

impl FeedCredentials {
    const RANDOM_BYTES: usize = 20;

    /// Generate a fresh random secret and verify token (hex encoded)
    pub fn generate() -> Self {
        use rand::RngCore;

        let mut rng = rand::thread_rng();
        let mut secret = [0u8; Self::RANDOM_BYTES];
        let mut token = [0u8; Self::RANDOM_BYTES];
        rng.fill_bytes(&mut secret);
        rng.fill_bytes(&mut token);

        Self {
            secret: hex::encode(secret),
            verification_token: hex::encode(token),
        }
    }

    /// Restore credentials loaded from storage or fixed in tests
    pub fn from_parts(secret: impl Into<String>, verification_token: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            verification_token: verification_token.into(),
        }
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }

    pub(crate) fn verification_token(&self) -> &str {
        &self.verification_token
    }
}

impl fmt::Debug for FeedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedCredentials")
            .field("secret", &"[redacted]")
            .field("verification_token", &"[redacted]")
            .finish()
    }
}

/// PubSubHubbub subscription state of a feed
///
/// `Unsubscribed -> PendingVerification -> Subscribed`. Any failed
/// verification falls back to the last stable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    #[default]
    Unsubscribed,
    PendingVerification,
    Subscribed,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsubscribed => "unsubscribed",
            Self::PendingVerification => "pending_verification",
            Self::Subscribed => "subscribed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unsubscribed" => Some(Self::Unsubscribed),
            "pending_verification" => Some(Self::PendingVerification),
            "subscribed" => Some(Self::Subscribed),
            _ => None,
        }
    }

    /// State entered when a hub challenge arrives.
    ///
    /// An already subscribed feed stays subscribed while a renewal is being
    /// verified.
    pub fn on_challenge(self) -> Self {
        match self {
            Self::Subscribed => Self::Subscribed,
            _ => Self::PendingVerification,
        }
    }

    /// State after a challenge was answered.
    ///
    /// `previous` is the state held before the challenge arrived; a failed
    /// attempt never downgrades a subscribed feed.
    pub fn on_verification(previous: Self, verified: bool, unsubscribe: bool) -> Self {
        match (verified, unsubscribe) {
            (true, false) => Self::Subscribed,
            (true, true) => Self::Unsubscribed,
            (false, _) if previous == Self::Subscribed => Self::Subscribed,
            (false, _) => Self::Unsubscribed,
        }
    }
}

/// Title/subtitle text with its type hint ("text", "html", ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedText {
    pub content: String,
    #[serde(rename = "type", default = "default_text_type")]
    pub text_type: String,
}

fn default_text_type() -> String {
    "text".to_string()
}

impl TypedText {
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            text_type: default_text_type(),
        }
    }
}

/// Scalar feed metadata copied from an incoming representation on merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedMetadata {
    pub title: Option<TypedText>,
    pub subtitle: Option<TypedText>,
    pub rights: Option<String>,
    pub icon: Option<String>,
    pub logo: Option<String>,
    pub generator: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub hubs: Vec<String>,
}

/// A collection of activity entries owned by one identity
#[derive(Debug, Clone, Serialize)]
pub struct Feed {
    /// Immutable once assigned
    pub id: String,
    /// Canonical URL (the PuSH topic)
    pub url: String,
    #[serde(flatten)]
    pub metadata: FeedMetadata,
    /// Author ids, in feed order
    pub author_ids: Vec<String>,
    /// Contributor ids, in feed order
    pub contributor_ids: Vec<String>,
    /// Entry (activity) ids, oldest first, without duplicates
    pub entry_ids: Vec<String>,
    pub subscription_state: SubscriptionState,
    #[serde(skip)]
    pub credentials: FeedCredentials,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a feed
#[derive(Debug, Clone, Deserialize)]
pub struct NewFeed {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub hubs: Vec<String>,
}

// =============================================================================
// Author
// =============================================================================

/// A person referenced as feed author/contributor or activity actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Author {
    pub id: String,
    /// Stable external identifier (profile URI, mailto: address or name)
    pub external_id: String,
    pub name: String,
    pub uri: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Author attributes used by `find_or_create_author`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAuthor {
    pub external_id: String,
    pub name: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

// =============================================================================
// Activity
// =============================================================================

/// Kind of activity entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Note,
    Article,
    FollowNotice,
    FavoriteNotice,
    ShareNotice,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Article => "article",
            Self::FollowNotice => "follow_notice",
            Self::FavoriteNotice => "favorite_notice",
            Self::ShareNotice => "share_notice",
        }
    }

    /// ActivityStreams verb carried by this kind
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Note | Self::Article => "post",
            Self::FollowNotice => "follow",
            Self::FavoriteNotice => "favorite",
            Self::ShareNotice => "share",
        }
    }
}

/// Verb-specific part of an activity.
///
/// Each variant carries only the fields that make sense for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityPayload {
    Note {
        content: String,
        #[serde(default = "default_content_type")]
        content_type: String,
    },
    Article {
        title: String,
        content: String,
        #[serde(default = "default_content_type")]
        content_type: String,
    },
    FollowNotice {
        target: String,
    },
    FavoriteNotice {
        target: String,
    },
    ShareNotice {
        target: String,
    },
}

fn default_content_type() -> String {
    "html".to_string()
}

impl ActivityPayload {
    pub fn kind(&self) -> ActivityKind {
        match self {
            Self::Note { .. } => ActivityKind::Note,
            Self::Article { .. } => ActivityKind::Article,
            Self::FollowNotice { .. } => ActivityKind::FollowNotice,
            Self::FavoriteNotice { .. } => ActivityKind::FavoriteNotice,
            Self::ShareNotice { .. } => ActivityKind::ShareNotice,
        }
    }
}

/// A single content item.
///
/// Belongs to exactly one feed (`feed_id`) but may be referenced from others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Activity {
    pub id: String,
    /// Globally unique, stable across reposting
    pub external_id: String,
    /// Owning feed
    pub feed_id: String,
    pub kind: String,
    pub verb: String,
    pub actor_id: Option<String>,
    pub target: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub content_type: Option<String>,
    pub url: Option<String>,
    pub source: Option<String>,
    pub in_reply_to: Option<String>,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Activity attributes used by `find_or_create_activity`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewActivity {
    pub external_id: String,
    #[serde(flatten)]
    pub payload: ActivityPayload,
    /// External id of the actor (resolved to an `Author`)
    #[serde(default)]
    pub actor: Option<NewAuthor>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl NewActivity {
    /// Materialize the stored row for this activity, owned by `feed_id`
    pub fn into_activity(self, feed_id: &str, actor_id: Option<String>) -> Activity {
        let now = Utc::now();
        let kind = self.payload.kind();
        let (title, content, content_type, target) = match self.payload {
            ActivityPayload::Note {
                content,
                content_type,
            } => (None, Some(content), Some(content_type), None),
            ActivityPayload::Article {
                title,
                content,
                content_type,
            } => (Some(title), Some(content), Some(content_type), None),
            ActivityPayload::FollowNotice { target }
            | ActivityPayload::FavoriteNotice { target }
            | ActivityPayload::ShareNotice { target } => (None, None, None, Some(target)),
        };
        let published_at = self.published_at.or(self.updated_at).unwrap_or(now);

        Activity {
            id: EntityId::new().0,
            external_id: self.external_id,
            feed_id: feed_id.to_string(),
            kind: kind.as_str().to_string(),
            verb: kind.verb().to_string(),
            actor_id,
            target,
            title,
            content,
            content_type,
            url: self.url,
            source: self.source,
            in_reply_to: self.in_reply_to,
            published_at,
            updated_at: self.updated_at.unwrap_or(published_at),
        }
    }
}

// =============================================================================
// Aggregate
// =============================================================================

/// Following/followers view over one canonical feed; the fan-out unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Aggregate {
    pub id: String,
    /// Owned feed
    pub feed_id: String,
    /// Feeds this aggregate follows
    pub following: Vec<String>,
    /// Feeds that receive reposts of everything published here
    pub followers: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Merge
// =============================================================================

/// Fully resolved instructions for reconciling an incoming feed into a local one
///
/// Built by the merge engine, applied atomically by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub feed_id: String,
    pub metadata: FeedMetadata,
    pub authors: Vec<NewAuthor>,
    pub contributors: Vec<NewAuthor>,
    /// Entries to find-or-create, unique by external id, in incoming order
    pub entries: Vec<NewActivity>,
}

/// Result of applying a `MergePlan`
#[derive(Debug, Clone)]
pub struct MergeCommit {
    pub feed: Feed,
    /// Entries created by this merge; already known entries are not listed
    pub new_entries: Vec<Activity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_is_redacted() {
        let credentials = FeedCredentials::from_parts("s3cr3t", "tok123");
        let printed = format!("{:?}", credentials);
        assert!(!printed.contains("s3cr3t"));
        assert!(!printed.contains("tok123"));
    }

    #[test]
    fn generated_credentials_are_distinct_hex() {
        let credentials = FeedCredentials::generate();
        assert_eq!(credentials.secret().len(), 40);
        assert_ne!(credentials.secret(), credentials.verification_token());
        assert!(hex::decode(credentials.verification_token()).is_ok());
    }

    #[test]
    fn failed_verification_keeps_subscribed_feed_subscribed() {
        let state =
            SubscriptionState::on_verification(SubscriptionState::Subscribed, false, false);
        assert_eq!(state, SubscriptionState::Subscribed);
    }

    #[test]
    fn failed_verification_returns_pending_feed_to_unsubscribed() {
        let pending = SubscriptionState::Unsubscribed.on_challenge();
        assert_eq!(pending, SubscriptionState::PendingVerification);
        let state = SubscriptionState::on_verification(SubscriptionState::Unsubscribed, false, false);
        assert_eq!(state, SubscriptionState::Unsubscribed);
    }

    #[test]
    fn verified_unsubscribe_leaves_feed_unsubscribed() {
        let state = SubscriptionState::on_verification(SubscriptionState::Subscribed, true, true);
        assert_eq!(state, SubscriptionState::Unsubscribed);
    }

    #[test]
    fn activity_payload_is_tagged_by_type() {
        let activity: NewActivity = serde_json::from_value(serde_json::json!({
            "external_id": "tag:example.com,2024:1",
            "type": "follow_notice",
            "target": "https://remote.example/feeds/1"
        }))
        .unwrap();

        assert_eq!(activity.payload.kind(), ActivityKind::FollowNotice);

        let row = activity.into_activity("feed-1", None);
        assert_eq!(row.verb, "follow");
        assert_eq!(row.target.as_deref(), Some("https://remote.example/feeds/1"));
        assert!(row.content.is_none());
    }
}
