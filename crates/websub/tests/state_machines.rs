//! End-to-end checks of the fetch, verify and deliver state machines
//! against live (mock) HTTP endpoints and a real (in-memory) store.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;
use websub::hub::ingest::{RequestOutcome, SubscriptionAction, SubscriptionRequest};
use websub::{Hub, HubConfig, Scheduler};
use websub_common::crypto::HashAlg;
use websub_common::database::HubDatabase;
use websub_common::topic::TopicCreate;
use websub_common::util::unix_time;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const HUB_PUBLIC_URL: &str = "https://hub.example.com/";

async fn hub_with<F>(tweak: F) -> Arc<Hub>
where
    F: FnOnce(&mut HubConfig),
{
    let db = websub_sqlite::hub::memory::empty().await.expect("memory db");

    let mut config = HubConfig {
        public_url: HUB_PUBLIC_URL.to_owned(),
        immediate_processing: true,
        fetch_retry_delays: vec![0],
        verify_retry_delays: vec![0],
        delivery_retry_delays: vec![0],
        ..HubConfig::default()
    };
    tweak(&mut config);

    Arc::new(Hub::new(config, Arc::new(db)).expect("hub"))
}

/// Callback endpoint that echoes `hub.challenge` back, as a well-behaved
/// subscriber does. Denial notices carry no challenge and get an empty 200.
fn challenge_echo() -> impl Fn(&Request) -> ResponseTemplate + Send + Sync + 'static {
    |request: &Request| {
        let challenge = request
            .url
            .query_pairs()
            .find(|(name, _)| name == "hub.challenge")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();

        ResponseTemplate::new(200).set_body_string(challenge)
    }
}

async fn subscribe(hub: &Hub, topic_url: &str, callback: &str, lease: &str) -> RequestOutcome<websub::hub::ingest::SubscriptionAccepted> {
    hub.subscription_request(SubscriptionRequest {
        action: SubscriptionAction::Subscribe,
        callback: callback.to_owned(),
        topic: topic_url.to_owned(),
        lease_seconds: Some(lease.to_owned()),
        secret: None,
        request_id: None,
    })
    .await
    .expect("subscription request")
}

#[tokio::test]
async fn happy_path_subscription() {
    let server = MockServer::start().await;
    let hub = hub_with(|_| {}).await;

    Mock::given(method("GET"))
        .and(path("/blog/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<feed>v1</feed>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cb"))
        .respond_with(challenge_echo())
        .mount(&server)
        .await;

    let topic_url = format!("{}/blog/", server.uri());
    let callback = format!("{}/cb?id=1", server.uri());

    // Publish activates the topic through an inline fetch
    let outcomes = hub
        .publish_request(vec![topic_url.clone()])
        .await
        .expect("publish");
    let topic_id = *outcomes[0].result.as_ref().expect("topic accepted");

    let before = unix_time();
    let outcome = subscribe(&hub, &topic_url, &callback, "864000").await;
    let accepted = match outcome {
        RequestOutcome::Accepted(accepted) => accepted,
        RequestOutcome::Rejected(rejection) => panic!("rejected: {rejection:?}"),
    };

    let subscription = hub
        .db()
        .get_subscription_by_callback(&topic_id, &callback)
        .await
        .expect("load subscription")
        .expect("subscription row created");
    assert_eq!(
        subscription.expires_at,
        subscription.verified_at + 864000,
        "expiry is verified_at + lease"
    );
    assert!(subscription.verified_at >= before);

    // The settled verification family is scrubbed
    assert!(hub
        .db()
        .get_verification(&accepted.verification_id)
        .await
        .expect("load verification")
        .is_none());

    // Re-running claim-and-process on the settled id is a quiet no-op
    assert!(!hub
        .verification_claim_and_process(&accepted.verification_id)
        .await
        .expect("claim and process"));
}

#[tokio::test]
async fn challenge_mismatch_rejects_without_retry() {
    let server = MockServer::start().await;
    let hub = hub_with(|_| {}).await;

    Mock::given(method("GET"))
        .and(path("/blog/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<feed>v1</feed>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cb"))
        .respond_with(ResponseTemplate::new(200).set_body_string("nope"))
        .mount(&server)
        .await;

    let topic_url = format!("{}/blog/", server.uri());
    let callback = format!("{}/cb?id=2", server.uri());

    let outcomes = hub
        .publish_request(vec![topic_url.clone()])
        .await
        .expect("publish");
    let topic_id = *outcomes[0].result.as_ref().expect("topic accepted");

    let outcome = subscribe(&hub, &topic_url, &callback, "864000").await;
    let accepted = match outcome {
        RequestOutcome::Accepted(accepted) => accepted,
        RequestOutcome::Rejected(rejection) => panic!("rejected: {rejection:?}"),
    };

    // No subscription, and the verification is scrubbed rather than retried
    assert!(hub
        .db()
        .get_subscription_by_callback(&topic_id, &callback)
        .await
        .expect("load subscription")
        .is_none());
    assert!(hub
        .db()
        .get_verification(&accepted.verification_id)
        .await
        .expect("load verification")
        .is_none());
}

#[tokio::test]
async fn transient_delivery_failure_retries_then_succeeds() {
    let server = MockServer::start().await;
    let hub = hub_with(|_| {}).await;

    Mock::given(method("GET"))
        .and(path("/blog/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<feed>v1</feed>"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blog/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<feed>v2</feed>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cb"))
        .respond_with(challenge_echo())
        .mount(&server)
        .await;

    // First delivery attempt fails with 503, later attempts succeed
    Mock::given(method("POST"))
        .and(path("/cb"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cb"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let topic_url = format!("{}/blog/", server.uri());
    let callback = format!("{}/cb?id=3", server.uri());

    let outcomes = hub
        .publish_request(vec![topic_url.clone()])
        .await
        .expect("publish");
    let topic_id = *outcomes[0].result.as_ref().expect("topic accepted");

    match subscribe(&hub, &topic_url, &callback, "864000").await {
        RequestOutcome::Accepted(_) => {}
        RequestOutcome::Rejected(rejection) => panic!("rejected: {rejection:?}"),
    }

    // Content changes from v1 to v2
    hub.publish_request(vec![topic_url.clone()])
        .await
        .expect("second publish");

    let content_updated = hub
        .db()
        .get_topic(&topic_id)
        .await
        .expect("load topic")
        .expect("topic")
        .content_updated
        .expect("content present");

    let subscription_id = hub
        .db()
        .get_subscription_by_callback(&topic_id, &callback)
        .await
        .expect("load subscription")
        .expect("subscription")
        .id;

    // First attempt: 503, so attempts go up and nothing is recorded as
    // delivered
    assert!(hub
        .subscription_delivery_claim_and_process(&subscription_id)
        .await
        .expect("first delivery attempt"));

    let subscription = hub
        .db()
        .get_subscription(&subscription_id)
        .await
        .expect("load subscription")
        .expect("subscription");
    assert_eq!(subscription.delivery_attempts_since_success, 1);
    assert_eq!(subscription.latest_content_delivered, None);
    assert!(subscription.delivery_next_attempt.is_some());

    // Second attempt (retry table is all-zero here): 200
    assert!(hub
        .subscription_delivery_claim_and_process(&subscription_id)
        .await
        .expect("second delivery attempt"));

    let subscription = hub
        .db()
        .get_subscription(&subscription_id)
        .await
        .expect("load subscription")
        .expect("subscription");
    assert_eq!(subscription.latest_content_delivered, Some(content_updated));
    assert_eq!(subscription.delivery_attempts_since_success, 0);
}

#[tokio::test]
async fn publisher_validation_denial_notifies_and_scrubs() {
    let server = MockServer::start().await;
    let hub = hub_with(|_| {}).await;

    Mock::given(method("GET"))
        .and(path("/blog/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<feed>v1</feed>"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/validate"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;
    // The callback hears about the denial, not a challenge
    Mock::given(method("GET"))
        .and(path("/cb"))
        .and(query_param("hub.mode", "denied"))
        .and(query_param("hub.reason", "publisher rejected request"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let topic_url = format!("{}/blog/", server.uri());
    let callback = format!("{}/cb?id=4", server.uri());

    // Topic pre-registered with a publisher validation endpoint
    let topic_id = {
        let mut tx = hub.db().begin().await.expect("begin");
        let topic_id = tx
            .add_topic(TopicCreate {
                url: topic_url.clone(),
                lease_seconds_preferred: 864000,
                lease_seconds_min: 86400,
                lease_seconds_max: 8640000,
                publisher_validation_url: Some(format!("{}/validate", server.uri())),
                content_hash_algorithm: HashAlg::default(),
            })
            .await
            .expect("add topic");
        tx.commit().await.expect("commit");
        topic_id
    };

    hub.publish_request(vec![topic_url.clone()])
        .await
        .expect("publish");

    let outcome = subscribe(&hub, &topic_url, &callback, "864000").await;
    let accepted = match outcome {
        RequestOutcome::Accepted(accepted) => accepted,
        RequestOutcome::Rejected(rejection) => panic!("rejected: {rejection:?}"),
    };

    assert!(hub
        .db()
        .get_subscription_by_callback(&topic_id, &callback)
        .await
        .expect("load subscription")
        .is_none());
    assert!(hub
        .db()
        .get_verification(&accepted.verification_id)
        .await
        .expect("load verification")
        .is_none());

    server.verify().await;
}

#[tokio::test]
async fn unchanged_content_short_circuits_on_304() {
    let server = MockServer::start().await;
    let hub = hub_with(|_| {}).await;

    // Conditional requests answer 304; the mock is mounted first so it wins
    // whenever the header is present
    Mock::given(method("GET"))
        .and(path("/blog/"))
        .and(header("if-none-match", "\"abc\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blog/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"abc\"")
                .set_body_string("<feed>v1</feed>"),
        )
        .mount(&server)
        .await;

    let topic_url = format!("{}/blog/", server.uri());

    let outcomes = hub
        .publish_request(vec![topic_url.clone()])
        .await
        .expect("publish");
    let topic_id = *outcomes[0].result.as_ref().expect("topic accepted");

    let topic = hub
        .db()
        .get_topic(&topic_id)
        .await
        .expect("load topic")
        .expect("topic");
    let first_version = topic.content_updated.expect("content stored");
    assert_eq!(topic.http_etag.as_deref(), Some("\"abc\""));

    // A second publish triggers a conditional fetch answered with 304
    hub.publish_request(vec![topic_url.clone()])
        .await
        .expect("second publish");

    let topic = hub
        .db()
        .get_topic(&topic_id)
        .await
        .expect("load topic")
        .expect("topic");
    assert_eq!(
        topic.content_updated,
        Some(first_version),
        "304 must not count as a content change"
    );
    assert_eq!(topic.content_fetch_attempts_since_success, 0);
}

#[tokio::test]
async fn delisted_topic_notifies_subscribers_then_disappears() {
    let server = MockServer::start().await;
    let hub = hub_with(|config| {
        config.strict_topic_hub_link = true;
        config.poll_interval = Duration::from_millis(100);
    })
    .await;

    // Initially the topic advertises this hub via a Link header
    let listed = Mock::given(method("GET"))
        .and(path("/blog/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "link",
                    format!(r#"<{HUB_PUBLIC_URL}>; rel="hub""#).as_str(),
                )
                .set_body_string("<feed>v1</feed>"),
        )
        .mount_as_scoped(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/cb"))
        .respond_with(challenge_echo())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cb"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let topic_url = format!("{}/blog/", server.uri());
    let callback = format!("{}/cb?id=5", server.uri());

    let outcomes = hub
        .publish_request(vec![topic_url.clone()])
        .await
        .expect("publish");
    let topic_id = *outcomes[0].result.as_ref().expect("topic accepted");

    match subscribe(&hub, &topic_url, &callback, "864000").await {
        RequestOutcome::Accepted(_) => {}
        RequestOutcome::Rejected(rejection) => panic!("rejected: {rejection:?}"),
    }

    // Drain the initial pending delivery
    let subscription_id = hub
        .db()
        .get_subscription_by_callback(&topic_id, &callback)
        .await
        .expect("load subscription")
        .expect("subscription")
        .id;
    hub.subscription_delivery_claim_and_process(&subscription_id)
        .await
        .expect("initial delivery");

    // The topic stops advertising this hub
    drop(listed);
    Mock::given(method("GET"))
        .and(path("/blog/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<feed>v2, no hub</feed>"))
        .mount(&server)
        .await;

    hub.publish_request(vec![topic_url.clone()])
        .await
        .expect("delisting publish");

    let topic = hub
        .db()
        .get_topic(&topic_id)
        .await
        .expect("load topic")
        .expect("topic still present while subscribed");
    assert!(topic.is_deleted);

    // The scheduler converts the pending delivery into a denial notice,
    // notifies the callback, removes the subscription and finally the topic
    let scheduler = Scheduler::new(Arc::clone(&hub));
    let shutdown = scheduler.shutdown_token();
    let runner = tokio::spawn(scheduler.run());

    let mut topic_gone = false;
    for _ in 0..100 {
        if hub
            .db()
            .get_topic(&topic_id)
            .await
            .expect("load topic")
            .is_none()
        {
            topic_gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    shutdown.cancel();
    runner.await.expect("scheduler task");

    assert!(topic_gone, "topic should be physically deleted once empty");
    assert!(hub
        .db()
        .get_subscription(&subscription_id)
        .await
        .expect("load subscription")
        .is_none());
}

#[tokio::test]
async fn secret_over_plain_http_warns_but_subscribes() {
    let server = MockServer::start().await;
    let hub = hub_with(|_| {}).await;

    Mock::given(method("GET"))
        .and(path("/blog/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<feed>v1</feed>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cb"))
        .respond_with(challenge_echo())
        .mount(&server)
        .await;

    let topic_url = format!("{}/blog/", server.uri());
    // wiremock serves plain http, which is exactly the warning case
    let callback = format!("{}/cb?id=6", server.uri());

    let outcomes = hub
        .publish_request(vec![topic_url.clone()])
        .await
        .expect("publish");
    let topic_id = *outcomes[0].result.as_ref().expect("topic accepted");

    let outcome = hub
        .subscription_request(SubscriptionRequest {
            action: SubscriptionAction::Subscribe,
            callback: callback.clone(),
            topic: topic_url.clone(),
            lease_seconds: Some("864000".to_owned()),
            secret: Some("shared-secret".to_owned()),
            request_id: None,
        })
        .await
        .expect("subscription request");

    let accepted = match outcome {
        RequestOutcome::Accepted(accepted) => accepted,
        RequestOutcome::Rejected(rejection) => panic!("rejected: {rejection:?}"),
    };
    assert!(
        !accepted.warnings.is_empty(),
        "plaintext callback with a secret warrants a warning"
    );

    let subscription = hub
        .db()
        .get_subscription_by_callback(&topic_id, &callback)
        .await
        .expect("load subscription")
        .expect("subscription");
    assert_eq!(
        subscription.secret.as_deref(),
        Some(b"shared-secret".as_slice())
    );
}

#[tokio::test]
async fn strict_secrets_rejects_plain_http_callback() {
    let hub = hub_with(|config| config.strict_secrets = true).await;

    let outcome = hub
        .subscription_request(SubscriptionRequest {
            action: SubscriptionAction::Subscribe,
            callback: "http://sub.example.net/cb".to_owned(),
            topic: "https://example.com/blog/".to_owned(),
            lease_seconds: None,
            secret: Some("shared-secret".to_owned()),
            request_id: None,
        })
        .await
        .expect("subscription request");

    match outcome {
        RequestOutcome::Rejected(rejection) => {
            assert!(!rejection.errors.is_empty());
        }
        RequestOutcome::Accepted(_) => panic!("strict mode must reject"),
    }
}

#[tokio::test]
async fn oversized_secret_is_rejected() {
    let hub = hub_with(|_| {}).await;

    let outcome = hub
        .subscription_request(SubscriptionRequest {
            action: SubscriptionAction::Subscribe,
            callback: "https://sub.example.net/cb".to_owned(),
            topic: "https://example.com/blog/".to_owned(),
            lease_seconds: None,
            secret: Some("x".repeat(200)),
            request_id: None,
        })
        .await
        .expect("subscription request");

    assert!(matches!(outcome, RequestOutcome::Rejected(_)));
}

#[tokio::test]
async fn lease_outside_bounds_is_clamped_with_warning() {
    let server = MockServer::start().await;
    let hub = hub_with(|_| {}).await;

    Mock::given(method("GET"))
        .and(path("/blog/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<feed>v1</feed>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cb"))
        .respond_with(challenge_echo())
        .mount(&server)
        .await;

    let topic_url = format!("{}/blog/", server.uri());
    let callback = format!("{}/cb?id=7", server.uri());

    let outcomes = hub
        .publish_request(vec![topic_url.clone()])
        .await
        .expect("publish");
    let topic_id = *outcomes[0].result.as_ref().expect("topic accepted");

    // Far above the topic's maximum
    let outcome = subscribe(&hub, &topic_url, &callback, "999999999").await;
    let accepted = match outcome {
        RequestOutcome::Accepted(accepted) => accepted,
        RequestOutcome::Rejected(rejection) => panic!("rejected: {rejection:?}"),
    };
    assert!(accepted
        .warnings
        .iter()
        .any(|warning| warning.contains("clamped")));

    let topic = hub
        .db()
        .get_topic(&topic_id)
        .await
        .expect("load topic")
        .expect("topic");
    let subscription = hub
        .db()
        .get_subscription_by_callback(&topic_id, &callback)
        .await
        .expect("load subscription")
        .expect("subscription");
    assert_eq!(
        subscription.expires_at - subscription.verified_at,
        u64::from(topic.lease_seconds_max)
    );
}

#[tokio::test]
async fn unknown_topic_rejected_on_private_hub() {
    let hub = hub_with(|config| config.public_hub = false).await;

    let outcome = hub
        .subscription_request(SubscriptionRequest {
            action: SubscriptionAction::Subscribe,
            callback: "https://sub.example.net/cb".to_owned(),
            topic: "https://example.com/unknown".to_owned(),
            lease_seconds: None,
            secret: None,
            request_id: None,
        })
        .await
        .expect("subscription request");

    assert!(matches!(outcome, RequestOutcome::Rejected(_)));

    let publishes = hub
        .publish_request(vec!["https://example.com/unknown".to_owned()])
        .await
        .expect("publish");
    assert!(publishes[0].result.is_err());
}

#[tokio::test]
async fn delivery_uses_subscription_signature() {
    let server = MockServer::start().await;
    let hub = hub_with(|_| {}).await;

    Mock::given(method("GET"))
        .and(path("/blog/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<feed>v1</feed>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cb"))
        .respond_with(challenge_echo())
        .mount(&server)
        .await;

    let expected_signature = websub_common::crypto::signature_header(
        HashAlg::Sha512,
        b"shared-secret",
        b"<feed>v1</feed>",
    )
    .expect("signature");
    Mock::given(method("POST"))
        .and(path("/cb"))
        .and(header("x-hub-signature", expected_signature.as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let topic_url = format!("{}/blog/", server.uri());
    let callback = format!("{}/cb?id=8", server.uri());

    let outcomes = hub
        .publish_request(vec![topic_url.clone()])
        .await
        .expect("publish");
    let topic_id = *outcomes[0].result.as_ref().expect("topic accepted");

    let outcome = hub
        .subscription_request(SubscriptionRequest {
            action: SubscriptionAction::Subscribe,
            callback: callback.clone(),
            topic: topic_url.clone(),
            lease_seconds: Some("864000".to_owned()),
            secret: Some("shared-secret".to_owned()),
            request_id: None,
        })
        .await
        .expect("subscription request");
    match outcome {
        RequestOutcome::Accepted(_) => {}
        RequestOutcome::Rejected(rejection) => panic!("rejected: {rejection:?}"),
    }

    let subscription_id = hub
        .db()
        .get_subscription_by_callback(&topic_id, &callback)
        .await
        .expect("load subscription")
        .expect("subscription")
        .id;

    assert!(hub
        .subscription_delivery_claim_and_process(&subscription_id)
        .await
        .expect("delivery"));

    server.verify().await;
}

#[tokio::test]
async fn delivery_410_deletes_subscription_without_new_verification() {
    let server = MockServer::start().await;
    let hub = hub_with(|_| {}).await;

    Mock::given(method("GET"))
        .and(path("/blog/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<feed>v1</feed>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cb"))
        .respond_with(challenge_echo())
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cb"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let topic_url = format!("{}/blog/", server.uri());
    let callback = format!("{}/cb?id=9", server.uri());

    let outcomes = hub
        .publish_request(vec![topic_url.clone()])
        .await
        .expect("publish");
    let topic_id = *outcomes[0].result.as_ref().expect("topic accepted");

    match subscribe(&hub, &topic_url, &callback, "864000").await {
        RequestOutcome::Accepted(_) => {}
        RequestOutcome::Rejected(rejection) => panic!("rejected: {rejection:?}"),
    }

    let subscription_id = hub
        .db()
        .get_subscription_by_callback(&topic_id, &callback)
        .await
        .expect("load subscription")
        .expect("subscription")
        .id;

    assert!(hub
        .subscription_delivery_claim_and_process(&subscription_id)
        .await
        .expect("delivery"));

    // Subscription removed immediately; a 410 is not an unsubscribe intent,
    // so no verification round-trip is queued
    assert!(hub
        .db()
        .get_subscription(&subscription_id)
        .await
        .expect("load subscription")
        .is_none());

    let claimant = Uuid::new_v4();
    assert!(hub
        .db()
        .verification_claim(10, 300, &claimant)
        .await
        .expect("claim verifications")
        .is_empty());
}
