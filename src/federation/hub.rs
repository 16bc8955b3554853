//! Outbound hub requests
//!
//! Publish pings (`hub.mode=publish`) and subscription requests
//! (`hub.mode=subscribe`) sent to PubSubHubbub hubs as form POSTs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppError;

/// Subscription request sent to a hub on behalf of a local feed
#[derive(Clone)]
pub struct SubscribeRequest {
    pub callback_url: String,
    pub topic_url: String,
    pub verify_token: String,
    pub secret: String,
}

impl std::fmt::Debug for SubscribeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeRequest")
            .field("callback_url", &self.callback_url)
            .field("topic_url", &self.topic_url)
            .field("verify_token", &"[redacted]")
            .field("secret", &"[redacted]")
            .finish()
    }
}

/// Transport for hub traffic
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HubNotifier: Send + Sync {
    /// Tell `hub_url` that `feed_url` has new content
    async fn notify(&self, hub_url: &str, feed_url: &str) -> Result<(), AppError>;

    /// Ask `hub_url` to start pushing a topic to our callback
    async fn subscribe(&self, hub_url: &str, request: &SubscribeRequest) -> Result<(), AppError>;
}

/// Reject anything that is not an absolute http(s) URL
pub fn validate_http_url(value: &str) -> Result<url::Url, AppError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| AppError::Validation(format!("Invalid URL {}: {}", value, e)))?;

    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(AppError::Validation(format!(
            "URL must be absolute http(s): {}",
            value
        ))),
    }
}

/// `HubNotifier` over `reqwest`
#[derive(Clone)]
pub struct HttpHubNotifier {
    http_client: Arc<reqwest::Client>,
}

impl HttpHubNotifier {
    pub fn new(http_client: Arc<reqwest::Client>) -> Self {
        Self { http_client }
    }

    /// Build a notifier with its own client
    pub fn from_settings(user_agent: &str, timeout: Duration) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self::new(Arc::new(http_client)))
    }

    async fn post_form(&self, hub_url: &str, form: &[(&str, &str)]) -> Result<(), AppError> {
        validate_http_url(hub_url)?;

        let response = self
            .http_client
            .post(hub_url)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Federation(format!("Failed to reach hub {}: {}", hub_url, e)))?;

        if !response.status().is_success() {
            return Err(AppError::Federation(format!(
                "Hub {} rejected request: HTTP {}",
                hub_url,
                response.status()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl HubNotifier for HttpHubNotifier {
    async fn notify(&self, hub_url: &str, feed_url: &str) -> Result<(), AppError> {
        self.post_form(hub_url, &[("hub.mode", "publish"), ("hub.url", feed_url)])
            .await?;

        tracing::debug!(hub = %hub_url, feed = %feed_url, "Hub notified");
        Ok(())
    }

    async fn subscribe(&self, hub_url: &str, request: &SubscribeRequest) -> Result<(), AppError> {
        self.post_form(
            hub_url,
            &[
                ("hub.mode", "subscribe"),
                ("hub.callback", request.callback_url.as_str()),
                ("hub.topic", request.topic_url.as_str()),
                ("hub.verify", "async"),
                ("hub.verify_token", request.verify_token.as_str()),
                ("hub.secret", request.secret.as_str()),
            ],
        )
        .await?;

        tracing::info!(
            hub = %hub_url,
            topic = %request.topic_url,
            "Subscription requested"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Form, Router, extract::State, http::StatusCode, routing::post};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    type Forms = Arc<Mutex<Vec<HashMap<String, String>>>>;

    async fn record_form(
        State(forms): State<Forms>,
        Form(form): Form<HashMap<String, String>>,
    ) -> StatusCode {
        forms.lock().unwrap().push(form);
        StatusCode::ACCEPTED
    }

    /// Local hub accepting forms on `/hub` and failing on `/down`
    async fn spawn_hub() -> (String, Forms) {
        let forms = Forms::default();
        let app = Router::new()
            .route("/hub", post(record_form))
            .route("/down", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .with_state(forms.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), forms)
    }

    fn notifier() -> HttpHubNotifier {
        HttpHubNotifier::from_settings("RustPond/test", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn validate_http_url_accepts_http_and_https() {
        assert!(validate_http_url("http://a/feed").is_ok());
        assert!(validate_http_url("https://hub.example.com/").is_ok());
    }

    #[test]
    fn validate_http_url_rejects_other_schemes_and_relative_urls() {
        assert!(validate_http_url("ftp://hub.example.com/").is_err());
        assert!(validate_http_url("/relative/path").is_err());
        assert!(validate_http_url("mailto:hub@example.com").is_err());
    }

    #[test]
    fn subscribe_request_debug_is_redacted() {
        let request = SubscribeRequest {
            callback_url: "https://pond.example.com/subscriptions/1".to_string(),
            topic_url: "http://a/feed".to_string(),
            verify_token: "tok123".to_string(),
            secret: "s3cr3t".to_string(),
        };
        let printed = format!("{:?}", request);
        assert!(!printed.contains("tok123"));
        assert!(!printed.contains("s3cr3t"));
    }

    #[tokio::test]
    async fn notify_to_invalid_hub_url_fails_without_network() {
        let notifier =
            HttpHubNotifier::from_settings("RustPond/test", Duration::from_secs(1)).unwrap();
        let result = notifier.notify("not a url", "http://a/feed").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn notify_posts_publish_form() {
        let (base, forms) = spawn_hub().await;

        notifier()
            .notify(&format!("{}/hub", base), "http://a/feed")
            .await
            .unwrap();

        let forms = forms.lock().unwrap();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0]["hub.mode"], "publish");
        assert_eq!(forms[0]["hub.url"], "http://a/feed");
    }

    #[tokio::test]
    async fn subscribe_posts_callback_and_credentials() {
        let (base, forms) = spawn_hub().await;
        let request = SubscribeRequest {
            callback_url: "https://pond.example.com/subscriptions/1".to_string(),
            topic_url: "http://a/feed".to_string(),
            verify_token: "tok123".to_string(),
            secret: "s3cr3t".to_string(),
        };

        notifier()
            .subscribe(&format!("{}/hub", base), &request)
            .await
            .unwrap();

        let forms = forms.lock().unwrap();
        assert_eq!(forms.len(), 1);
        let form = &forms[0];
        assert_eq!(form["hub.mode"], "subscribe");
        assert_eq!(form["hub.callback"], "https://pond.example.com/subscriptions/1");
        assert_eq!(form["hub.topic"], "http://a/feed");
        assert_eq!(form["hub.verify"], "async");
        assert_eq!(form["hub.verify_token"], "tok123");
        assert_eq!(form["hub.secret"], "s3cr3t");
    }

    #[tokio::test]
    async fn non_success_status_is_a_federation_error() {
        let (base, _forms) = spawn_hub().await;
        let hub_url = format!("{}/down", base);

        let result = notifier().notify(&hub_url, "http://a/feed").await;
        assert!(matches!(result, Err(AppError::Federation(_))));

        let request = SubscribeRequest {
            callback_url: "https://pond.example.com/subscriptions/1".to_string(),
            topic_url: "http://a/feed".to_string(),
            verify_token: "tok123".to_string(),
            secret: "s3cr3t".to_string(),
        };
        let result = notifier().subscribe(&hub_url, &request).await;
        assert!(matches!(result, Err(AppError::Federation(_))));
    }
}
