//! PubSubHubbub callback endpoints
//!
//! - GET /subscriptions/:feed_id - Hub verification handshake
//! - POST /subscriptions/:feed_id.atom - Content delivery

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};

use crate::AppState;
use crate::error::AppError;
use crate::federation::{HubChallenge, SIGNATURE_HEADER};
use crate::metrics::HTTP_REQUESTS_TOTAL;

const ENDPOINT: &str = "/subscriptions/:feed_id";

/// Create subscription callback router
///
/// Both verbs share one route; the `.atom` suffix hubs append to the
/// delivery URL is stripped from the id.
pub fn subscriptions_router() -> Router<AppState> {
    Router::new().route(ENDPOINT, get(verify).post(deliver))
}

fn feed_id_from_path(raw: &str) -> &str {
    raw.strip_suffix(".atom").unwrap_or(raw)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn record(method: &str, status: StatusCode) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, ENDPOINT, status.as_str()])
        .inc();
}

/// GET /subscriptions/:feed_id
///
/// Echoes `hub.challenge` as `text/plain` when the topic and verify token
/// match the feed; 404 otherwise.
async fn verify(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    query: Option<Query<HubChallenge>>,
) -> Result<Response, AppError> {
    let Some(Query(challenge)) = query else {
        record("GET", StatusCode::NOT_FOUND);
        return Err(AppError::NotFound);
    };

    let response = match state
        .subscriptions
        .verify_challenge(feed_id_from_path(&raw_id), &challenge)
        .await
    {
        Ok(response) => response,
        Err(error) => {
            record("GET", error.status_code());
            return Err(error);
        }
    };

    if !response.is_success() {
        record("GET", StatusCode::NOT_FOUND);
        return Err(AppError::NotFound);
    }

    record("GET", StatusCode::OK);
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        response.body,
    )
        .into_response())
}

/// POST /subscriptions/:feed_id.atom
///
/// Authenticates the body with `X-Hub-Signature`, merges it and fans out
/// new entries. Unknown feeds and bad signatures both answer 404.
async fn deliver(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let result = state
        .subscriptions
        .deliver(
            feed_id_from_path(&raw_id),
            &body,
            header_str(&headers, header::CONTENT_TYPE.as_str()),
            header_str(&headers, SIGNATURE_HEADER),
        )
        .await;

    match result {
        Ok(report) => {
            tracing::debug!(
                feed_id = %report.feed_id,
                new_entries = report.new_entries.len(),
                "Delivery accepted"
            );
            record("POST", StatusCode::OK);
            Ok(StatusCode::OK)
        }
        Err(error) => {
            record("POST", error.status_code());
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atom_suffix_is_stripped() {
        assert_eq!(feed_id_from_path("01FEED.atom"), "01FEED");
        assert_eq!(feed_id_from_path("01FEED"), "01FEED");
    }
}
