//! Service layer
//!
//! Contains business logic separated from HTTP handlers.
//! Services orchestrate the store, the merge engine and hub traffic.

mod feed;
mod merge;
mod publish;
mod subscription;

pub use feed::{FeedService, FeedView};
pub use merge::{FeedLocks, FeedMergeService, build_merge_plan};
pub use publish::{AggregatePublisher, PublishReport};
pub use subscription::{DeliveryReport, SubscriptionRequestReport, SubscriptionService};
