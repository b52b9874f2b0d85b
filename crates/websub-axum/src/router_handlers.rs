//! Ingress request handlers

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;
use tracing::instrument;
use websub::hub::ingest::{
    PublishOutcome, Rejection, RequestOutcome, SubscriptionAction, SubscriptionRequest,
};

use crate::HubState;

/// A parsed request body: repeated names are kept, order preserved
struct Params(Vec<(String, String)>);

impl Params {
    fn first(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

fn parse_params(headers: &HeaderMap, body: &[u8]) -> Result<Params, String> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/x-www-form-urlencoded");

    if content_type.starts_with("application/json") {
        let object: serde_json::Map<String, Value> = serde_json::from_slice(body)
            .map_err(|err| format!("request body is not a JSON object: {err}"))?;

        let mut pairs = Vec::new();
        for (name, value) in object {
            match value {
                Value::Array(values) => {
                    for value in values {
                        pairs.push((name.clone(), json_scalar(value)?));
                    }
                }
                other => pairs.push((name, json_scalar(other)?)),
            }
        }

        return Ok(Params(pairs));
    }

    Ok(Params(
        url::form_urlencoded::parse(body)
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect(),
    ))
}

fn json_scalar(value: Value) -> Result<String, String> {
    match value {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(format!("unsupported JSON value: {other}")),
    }
}

fn bad_request(rejection: &Rejection) -> Response {
    let mut lines = Vec::with_capacity(rejection.errors.len() + rejection.warnings.len());
    lines.extend(rejection.errors.iter().map(|e| format!("error: {e}")));
    lines.extend(rejection.warnings.iter().map(|w| format!("warning: {w}")));

    (StatusCode::BAD_REQUEST, lines.join("\n")).into_response()
}

fn single_error(message: String) -> Response {
    bad_request(&Rejection {
        errors: vec![message],
        warnings: Vec::new(),
    })
}

/// The WebSub endpoint: publish announcements and subscription intents
#[instrument(skip_all)]
pub(crate) async fn post_root(
    State(state): State<HubState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let params = match parse_params(&headers, &body) {
        Ok(params) => params,
        Err(message) => return single_error(message),
    };

    let request_id = headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    match params.first("hub.mode") {
        Some("publish") => handle_publish(&state, &params).await,
        Some("subscribe") => {
            handle_subscription(&state, &params, SubscriptionAction::Subscribe, request_id).await
        }
        Some("unsubscribe") => {
            handle_subscription(&state, &params, SubscriptionAction::Unsubscribe, request_id).await
        }
        Some(other) => single_error(format!(
            "hub.mode must be publish, subscribe or unsubscribe, not {other}"
        )),
        None => single_error("hub.mode is required".to_owned()),
    }
}

async fn handle_publish(state: &HubState, params: &Params) -> Response {
    // hub.url is the publish alias; accept both and dedupe
    let mut topics: Vec<String> = Vec::new();
    for topic in params.all("hub.url").chain(params.all("hub.topic")) {
        if !topics.iter().any(|known| known == topic) {
            topics.push(topic.to_owned());
        }
    }

    if topics.is_empty() {
        return single_error("publish needs at least one hub.url or hub.topic".to_owned());
    }

    let single = topics.len() == 1;
    let outcomes = match state.hub.publish_request(topics).await {
        Ok(outcomes) => outcomes,
        Err(err) => {
            tracing::error!("Publish request failed: {}", err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if single {
        return match &outcomes[0].result {
            Ok(_) => StatusCode::ACCEPTED.into_response(),
            Err(message) => single_error(message.clone()),
        };
    }

    let statuses: Vec<Value> = outcomes.iter().map(publish_status).collect();
    (StatusCode::MULTI_STATUS, Json(statuses)).into_response()
}

fn publish_status(outcome: &PublishOutcome) -> Value {
    match &outcome.result {
        Ok(_) => serde_json::json!({
            "topic": outcome.topic_url,
            "status": StatusCode::ACCEPTED.as_u16(),
        }),
        Err(message) => serde_json::json!({
            "topic": outcome.topic_url,
            "status": StatusCode::BAD_REQUEST.as_u16(),
            "message": message,
        }),
    }
}

async fn handle_subscription(
    state: &HubState,
    params: &Params,
    action: SubscriptionAction,
    request_id: Option<String>,
) -> Response {
    let mut errors = Vec::new();
    let callback = params.first("hub.callback").unwrap_or_else(|| {
        errors.push("hub.callback is required".to_owned());
        ""
    });
    let topic = params.first("hub.topic").unwrap_or_else(|| {
        errors.push("hub.topic is required".to_owned());
        ""
    });

    if !errors.is_empty() {
        return bad_request(&Rejection {
            errors,
            warnings: Vec::new(),
        });
    }

    let request = SubscriptionRequest {
        action,
        callback: callback.to_owned(),
        topic: topic.to_owned(),
        lease_seconds: params.first("hub.lease_seconds").map(str::to_owned),
        secret: params.first("hub.secret").map(str::to_owned),
        request_id,
    };

    match state.hub.subscription_request(request).await {
        Ok(RequestOutcome::Accepted(accepted)) => {
            let body = accepted
                .warnings
                .iter()
                .map(|w| format!("warning: {w}"))
                .collect::<Vec<_>>()
                .join("\n");
            (StatusCode::ACCEPTED, body).into_response()
        }
        Ok(RequestOutcome::Rejected(rejection)) => bad_request(&rejection),
        Err(err) => {
            tracing::error!("Subscription request failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Liveness: answers once the repository does
pub(crate) async fn get_healthz(State(state): State<HubState>) -> Response {
    match state.hub.db().ping().await {
        Ok(()) => Json(serde_json::json!({ "status": "ok" })).into_response(),
        Err(err) => {
            tracing::error!("Health check failed against the repository: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;
    use websub::{Hub, HubConfig};

    use super::*;
    use crate::create_hub_router;

    async fn test_router() -> axum::Router {
        let db = websub_sqlite::hub::memory::empty().await.expect("memory db");
        let config = HubConfig {
            // Handlers should not fan out to the network in these tests
            immediate_processing: false,
            ..HubConfig::default()
        };
        let hub = Arc::new(Hub::new(config, Arc::new(db)).expect("hub"));
        create_hub_router(hub)
    }

    fn form_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header(
                header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(Body::from(body.to_owned()))
            .expect("request")
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[tokio::test]
    async fn subscribe_is_accepted() {
        let router = test_router().await;
        let response = router
            .oneshot(form_request(
                "hub.mode=subscribe\
                 &hub.topic=https%3A%2F%2Fexample.com%2Fblog%2F\
                 &hub.callback=https%3A%2F%2Fsub.example.net%2Fcb%3Fid%3D1\
                 &hub.lease_seconds=864000",
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn invalid_callback_is_a_400_with_error_lines() {
        let router = test_router().await;
        let response = router
            .oneshot(form_request(
                "hub.mode=subscribe&hub.topic=https%3A%2F%2Fexample.com%2F&hub.callback=not-a-url",
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        assert!(body.contains("error: "), "got: {body}");
    }

    #[tokio::test]
    async fn unknown_mode_is_rejected() {
        let router = test_router().await;
        let response = router
            .oneshot(form_request("hub.mode=frobnicate"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn single_publish_is_a_202() {
        let router = test_router().await;
        let response = router
            .oneshot(form_request(
                "hub.mode=publish&hub.topic=https%3A%2F%2Fexample.com%2Fblog%2F",
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn multi_topic_publish_is_a_207_with_statuses() {
        let router = test_router().await;
        let response = router
            .oneshot(form_request(
                "hub.mode=publish\
                 &hub.url=https%3A%2F%2Fexample.com%2Fa\
                 &hub.url=https%3A%2F%2Fexample.com%2Fb\
                 &hub.topic=ftp%3A%2F%2Fbad.example.com%2F",
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::MULTI_STATUS);
        let body = body_string(response).await;
        let statuses: Vec<serde_json::Value> =
            serde_json::from_str(&body).expect("json statuses");
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[0]["status"], 202);
        assert_eq!(statuses[1]["status"], 202);
        assert_eq!(statuses[2]["status"], 400);
    }

    #[tokio::test]
    async fn json_bodies_are_accepted() {
        let router = test_router().await;
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::json!({
                    "hub.mode": "subscribe",
                    "hub.topic": "https://example.com/blog/",
                    "hub.callback": "https://sub.example.net/cb",
                    "hub.lease_seconds": 864000,
                })
                .to_string(),
            ))
            .expect("request");

        let response = router.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let router = test_router().await;
        let request = Request::builder()
            .method("GET")
            .uri("/healthz")
            .body(Body::empty())
            .expect("request");

        let response = router.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
