//! E2E tests for health check and basic server functionality

mod common;

use common::TestServer;

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn test_metrics_exposition() {
    let server = TestServer::new().await;

    // Touch a counter so the family shows up in the exposition
    server
        .client
        .get(&server.url("/subscriptions/unknown?hub.challenge=x"))
        .send()
        .await
        .unwrap();

    let response = server
        .client
        .get(&server.url("/metrics"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("rustpond_http_requests_total"));
}

#[tokio::test]
async fn test_404_for_unknown_routes() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/unknown/route"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_unknown_feed_view_is_404() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/feeds/01UNKNOWN"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}
