//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use rustpond::error::AppError;
use rustpond::federation::{HubNotifier, SubscribeRequest};
use rustpond::{AppState, config};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const ADMIN_TOKEN: &str = "test-admin-token-0123456789abcdef";
pub const HUB_URL: &str = "https://hub.example.com/";

static METRICS: Once = Once::new();

/// Hub traffic captured instead of sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubCall {
    Notify { hub_url: String, feed_url: String },
    Subscribe { hub_url: String, topic_url: String },
}

/// `HubNotifier` that records every call and always succeeds
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<HubCall>>,
    subscriptions: Mutex<Vec<SubscribeRequest>>,
}

impl RecordingNotifier {
    pub fn calls(&self) -> Vec<HubCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn notified_feeds(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HubCall::Notify { feed_url, .. } => Some(feed_url),
                HubCall::Subscribe { .. } => None,
            })
            .collect()
    }

    /// Last subscription request sent for `topic_url`
    pub fn subscription_for(&self, topic_url: &str) -> Option<SubscribeRequest> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|request| request.topic_url == topic_url)
            .cloned()
    }
}

#[async_trait]
impl HubNotifier for RecordingNotifier {
    async fn notify(&self, hub_url: &str, feed_url: &str) -> Result<(), AppError> {
        self.calls.lock().unwrap().push(HubCall::Notify {
            hub_url: hub_url.to_string(),
            feed_url: feed_url.to_string(),
        });
        Ok(())
    }

    async fn subscribe(&self, hub_url: &str, request: &SubscribeRequest) -> Result<(), AppError> {
        self.calls.lock().unwrap().push(HubCall::Subscribe {
            hub_url: hub_url.to_string(),
            topic_url: request.topic_url.clone(),
        });
        self.subscriptions.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub notifier: Arc<RecordingNotifier>,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

/// A registered feed together with the credentials its hub received
pub struct SubscribedFeed {
    pub id: String,
    pub url: String,
    pub secret: String,
    pub verify_token: String,
}

pub fn test_config(temp_dir: &TempDir) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
            domain: "localhost".to_string(),
            protocol: "http".to_string(),
        },
        database: config::DatabaseConfig {
            path: temp_dir.path().join("test.db"),
        },
        federation: config::FederationConfig {
            fanout_width: 4,
            task_timeout_seconds: 5,
            hub_timeout_seconds: 5,
            user_agent: "RustPond/test".to_string(),
        },
        admin: config::AdminConfig {
            token: ADMIN_TOKEN.to_string(),
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        METRICS.call_once(rustpond::metrics::init_metrics);

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);

        let notifier = Arc::new(RecordingNotifier::default());
        let state = AppState::with_notifier(config, notifier.clone())
            .await
            .unwrap();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = rustpond::build_router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            notifier,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// POST JSON to an admin route with the admin token
    pub async fn admin_post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/admin{}", path)))
            .bearer_auth(ADMIN_TOKEN)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn admin_get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/admin{}", path)))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .unwrap()
    }

    pub async fn admin_delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(self.url(&format!("/admin{}", path)))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .unwrap()
    }

    /// Register a feed through the admin API and return its JSON
    pub async fn create_feed(&self, url: &str) -> Value {
        let response = self
            .admin_post("/feeds", serde_json::json!({ "url": url, "hubs": [HUB_URL] }))
            .await;
        assert_eq!(response.status(), 201);
        response.json().await.unwrap()
    }

    /// Register a feed and ask its hub to subscribe, capturing the
    /// credentials the hub was given
    pub async fn subscribed_feed(&self, url: &str) -> SubscribedFeed {
        let feed = self.create_feed(url).await;
        let id = feed["id"].as_str().unwrap().to_string();

        let response = self
            .admin_post(&format!("/feeds/{}/subscribe", id), Value::Null)
            .await;
        assert_eq!(response.status(), 202);

        let request = self.notifier.subscription_for(url).unwrap();
        SubscribedFeed {
            id,
            url: url.to_string(),
            secret: request.secret,
            verify_token: request.verify_token,
        }
    }

    /// Create the aggregate owning `feed_id` and return its id
    pub async fn create_aggregate(&self, feed_id: &str) -> String {
        let response = self
            .admin_post("/aggregates", serde_json::json!({ "feed_id": feed_id }))
            .await;
        assert_eq!(response.status(), 201);
        let aggregate: Value = response.json().await.unwrap();
        aggregate["id"].as_str().unwrap().to_string()
    }

    pub async fn feed_view(&self, feed_id: &str) -> Value {
        let response = self
            .client
            .get(self.url(&format!("/feeds/{}", feed_id)))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        response.json().await.unwrap()
    }
}

/// Minimal Atom document with one entry per `(id, content)` pair
pub fn atom_feed(feed_url: &str, entries: &[(&str, &str)]) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>{feed_url}</id>
  <title>Test feed</title>
  <updated>2024-01-01T00:00:00Z</updated>
  <link rel="self" href="{feed_url}"/>
  <link rel="hub" href="{HUB_URL}"/>
  <author><name>Alice</name><uri>https://alice.example.com/</uri></author>
"#
    );
    for (id, content) in entries {
        xml.push_str(&format!(
            r#"  <entry>
    <id>{id}</id>
    <title>{content}</title>
    <updated>2024-01-01T00:00:00Z</updated>
    <content type="text">{content}</content>
  </entry>
"#
        ));
    }
    xml.push_str("</feed>\n");
    xml
}
