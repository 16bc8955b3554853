//! Data layer module
//!
//! Handles all data persistence:
//! - Entity models (feeds, authors, activities, aggregates)
//! - Store traits consumed by the services
//! - SQLite implementation of those traits

mod database;
mod models;
mod store;

pub use database::Database;
pub use models::*;
pub use store::{ActivityStore, AggregateStore, AuthorStore, FeedStore, Repository};
