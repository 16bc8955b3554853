//! RustPond - A PubSubHubbub subscription, feed-merge and fan-out service
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - PuSH callback (challenge, content delivery)              │
//! │  - Feed views                                               │
//! │  - Admin endpoints                                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Subscription handling                                    │
//! │  - Feed merge engine                                        │
//! │  - Aggregate publisher (fan-out, hub pings)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - Store traits                                             │
//! │  - SQLite (sqlx)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `service`: Business logic layer
//! - `federation`: Hub signatures, handshake, feed decoding, hub client
//! - `data`: Models, store traits and the SQLite store
//! - `auth`: Admin bearer token
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod service;

use std::sync::Arc;

use federation::{FeedDecoder, HttpHubNotifier, HubNotifier, WireDecoder};
use service::{AggregatePublisher, FeedMergeService, FeedService, SubscriptionService};

/// Application state shared across all handlers
///
/// Cloned for each request; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// SQLite store
    pub db: Arc<data::Database>,

    /// Feed registry
    pub feeds: Arc<FeedService>,

    /// PuSH callback handling
    pub subscriptions: Arc<SubscriptionService>,

    /// Fan-out and follow graph
    pub publisher: Arc<AggregatePublisher>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Build the hub client
    /// 3. Wire services
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        let notifier = HttpHubNotifier::from_settings(
            &config.federation.user_agent,
            config.federation.hub_timeout(),
        )?;

        Self::with_notifier(config, Arc::new(notifier)).await
    }

    /// Initialize application state with a custom hub transport
    pub async fn with_notifier(
        config: config::AppConfig,
        notifier: Arc<dyn HubNotifier>,
    ) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        tracing::info!("Database connected");

        let repo: Arc<dyn data::Repository> = db.clone();
        let decoder: Arc<dyn FeedDecoder> = Arc::new(WireDecoder::new());

        let merger = Arc::new(FeedMergeService::new(repo.clone()));
        let publisher = Arc::new(AggregatePublisher::new(
            repo.clone(),
            notifier.clone(),
            config.federation.fanout_width,
            config.federation.task_timeout(),
        ));
        let subscriptions = Arc::new(SubscriptionService::new(
            repo.clone(),
            decoder,
            notifier,
            merger,
            publisher.clone(),
            config.server.clone(),
        ));
        let feeds = Arc::new(FeedService::new(repo));

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            feeds,
            subscriptions,
            publisher,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use axum::extract::DefaultBodyLimit;
    use tower::ServiceBuilder;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .merge(api::subscriptions_router())
        .merge(api::feeds_router())
        .nest("/admin", api::admin_router(state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer)
                .layer(CompressionLayer::new())
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
        .merge(api::ops_router())
}

/// Upper bound for delivered feed documents and admin payloads
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.protocol.eq_ignore_ascii_case("https") {
        return CorsLayer::permissive();
    }

    let allowed_origin = server.base_url();
    match HeaderValue::from_str(&allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from server base URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}
