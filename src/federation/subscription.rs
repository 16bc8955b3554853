//! PubSubHubbub handshake
//!
//! `Subscription` is the verification context for one handshake or one
//! content delivery. It is built from a stored feed and thrown away after
//! the check; nothing here touches persistence.

use serde::Deserialize;

use super::signature::verify_content_signature;
use crate::data::Feed;

/// Query parameters a hub sends to the callback when verifying intent
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubChallenge {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.topic")]
    pub topic: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.lease_seconds")]
    pub lease_seconds: Option<u64>,
}

impl HubChallenge {
    /// Whether the hub is confirming an unsubscription
    pub fn is_unsubscribe(&self) -> bool {
        self.mode.as_deref() == Some("unsubscribe")
    }
}

/// Outcome of a handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    pub status: u16,
    pub body: String,
}

impl ChallengeResponse {
    fn echo(challenge: &str) -> Self {
        Self {
            status: 200,
            body: challenge.to_string(),
        }
    }

    fn not_found() -> Self {
        Self {
            status: 404,
            body: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Verification context for `(callback, topic, secret, token)`
pub struct Subscription {
    callback_url: String,
    topic_url: String,
    secret: String,
    token: String,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("callback_url", &self.callback_url)
            .field("topic_url", &self.topic_url)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn new(
        callback_url: impl Into<String>,
        topic_url: impl Into<String>,
        secret: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            callback_url: callback_url.into(),
            topic_url: topic_url.into(),
            secret: secret.into(),
            token: token.into(),
        }
    }

    /// Context for a stored feed answered at `callback_url`
    pub fn for_feed(feed: &Feed, callback_url: impl Into<String>) -> Self {
        Self::new(
            callback_url,
            feed.url.clone(),
            feed.credentials.secret(),
            feed.credentials.verification_token(),
        )
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    pub fn topic_url(&self) -> &str {
        &self.topic_url
    }

    /// Compare a candidate verify token with the feed's token.
    ///
    /// A missing candidate never matches.
    pub fn verify_subscription(&self, candidate: Option<&str>) -> bool {
        match candidate {
            Some(candidate) => constant_time_eq(candidate.as_bytes(), self.token.as_bytes()),
            None => false,
        }
    }

    /// Answer a hub challenge.
    ///
    /// Echoes `hub.challenge` only when the topic is this feed's URL and the
    /// verify token matches.
    pub fn challenge_response(&self, challenge: &HubChallenge) -> ChallengeResponse {
        let Some(echo) = challenge.challenge.as_deref() else {
            return ChallengeResponse::not_found();
        };

        if challenge.topic.as_deref() != Some(self.topic_url.as_str()) {
            return ChallengeResponse::not_found();
        }

        if !self.verify_subscription(challenge.verify_token.as_deref()) {
            return ChallengeResponse::not_found();
        }

        ChallengeResponse::echo(echo)
    }

    /// Check the `X-Hub-Signature` of a content delivery
    pub fn verify_content(&self, raw_body: &[u8], signature_header: Option<&str>) -> bool {
        verify_content_signature(&self.secret, raw_body, signature_header)
    }
}

/// Compare two byte strings without short-circuiting on the first mismatch
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::signature::{SignatureAlgorithm, sign_content};

    fn subscription() -> Subscription {
        Subscription::new(
            "https://pond.example.com/subscriptions/01FEED",
            "http://a/feed",
            "s3cr3t",
            "tok123",
        )
    }

    fn challenge(topic: &str, token: Option<&str>, echo: Option<&str>) -> HubChallenge {
        HubChallenge {
            mode: Some("subscribe".to_string()),
            topic: Some(topic.to_string()),
            challenge: echo.map(str::to_string),
            verify_token: token.map(str::to_string),
            lease_seconds: None,
        }
    }

    #[test]
    fn challenge_is_echoed_for_matching_topic_and_token() {
        let response = subscription()
            .challenge_response(&challenge("http://a/feed", Some("tok123"), Some("abc123")));

        assert!(response.is_success());
        assert_eq!(response.body, "abc123");
    }

    #[test]
    fn topic_mismatch_is_not_found_even_with_valid_token() {
        let response = subscription()
            .challenge_response(&challenge("http://b/feed", Some("tok123"), Some("abc123")));

        assert_eq!(response.status, 404);
        assert!(response.body.is_empty());
    }

    #[test]
    fn wrong_or_missing_token_is_not_found() {
        let sub = subscription();
        let wrong = sub.challenge_response(&challenge("http://a/feed", Some("tok124"), Some("c")));
        let missing = sub.challenge_response(&challenge("http://a/feed", None, Some("c")));

        assert_eq!(wrong.status, 404);
        assert_eq!(missing.status, 404);
    }

    #[test]
    fn missing_challenge_is_not_found() {
        let response =
            subscription().challenge_response(&challenge("http://a/feed", Some("tok123"), None));
        assert_eq!(response.status, 404);
    }

    #[test]
    fn verify_subscription_rejects_prefixes_and_empty_tokens() {
        let sub = subscription();
        assert!(sub.verify_subscription(Some("tok123")));
        assert!(!sub.verify_subscription(Some("tok12")));
        assert!(!sub.verify_subscription(Some("")));
        assert!(!sub.verify_subscription(None));
    }

    #[test]
    fn verify_content_checks_hub_signature() {
        let sub = subscription();
        let header = sign_content("s3cr3t", b"hello", SignatureAlgorithm::Sha1).unwrap();
        let zeros = format!("sha1={}", "0".repeat(40));

        assert!(sub.verify_content(b"hello", Some(&header)));
        assert!(!sub.verify_content(b"hello", Some(&zeros)));
        assert!(!sub.verify_content(b"hello", None));
    }

    #[test]
    fn debug_output_hides_secret_and_token() {
        let printed = format!("{:?}", subscription());
        assert!(printed.contains("http://a/feed"));
        assert!(!printed.contains("s3cr3t"));
        assert!(!printed.contains("tok123"));
    }

    #[test]
    fn unsubscribe_mode_is_detected() {
        let mut hub = challenge("http://a/feed", Some("tok123"), Some("c"));
        assert!(!hub.is_unsubscribe());
        hub.mode = Some("unsubscribe".to_string());
        assert!(hub.is_unsubscribe());
    }
}
