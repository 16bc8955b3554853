//! PubSubHubbub federation module
//!
//! Handles:
//! - Hub verification handshake (challenge/response)
//! - Content signatures (`X-Hub-Signature`)
//! - Decoding pushed Atom/RSS/JSON feeds
//! - Outbound hub requests (publish pings, subscribe)

mod decoder;
mod hub;
mod signature;
mod subscription;

pub use decoder::{FeedDecoder, IncomingFeed, WireDecoder};
#[cfg(test)]
pub use hub::MockHubNotifier;
pub use hub::{HttpHubNotifier, HubNotifier, SubscribeRequest, validate_http_url};
pub use signature::{
    HubSignature, SIGNATURE_HEADER, SignatureAlgorithm, parse_signature_header, sign_content,
    verify_content_signature,
};
pub use subscription::{ChallengeResponse, HubChallenge, Subscription};
pub(crate) use subscription::constant_time_eq;
