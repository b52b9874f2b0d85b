//! Generic storage test suite
//!
//! Every backend must pass the same behavioural checks; the [`hub_db_test!`]
//! macro instantiates one `#[tokio::test]` per function here against a
//! backend-provided constructor.
#![allow(clippy::unwrap_used)]

use uuid::Uuid;

use super::HubDatabase;
use crate::crypto::HashAlg;
use crate::subscription::SubscriptionUpsert;
use crate::topic::{TopicContentUpdate, TopicCreate};
use crate::util::unix_time;
use crate::verification::{VerificationCreate, VerificationMode};

fn topic_create(url: &str) -> TopicCreate {
    TopicCreate {
        url: url.to_owned(),
        lease_seconds_preferred: 864000,
        lease_seconds_min: 86400,
        lease_seconds_max: 8640000,
        publisher_validation_url: None,
        content_hash_algorithm: HashAlg::default(),
    }
}

async fn add_topic<DB: HubDatabase>(db: &DB, url: &str) -> Uuid {
    let mut tx = db.begin().await.unwrap();
    let id = tx.add_topic(topic_create(url)).await.unwrap();
    tx.commit().await.unwrap();
    id
}

async fn publish<DB: HubDatabase>(db: &DB, topic_id: &Uuid) {
    let mut tx = db.begin().await.unwrap();
    tx.topic_publish_received(topic_id, unix_time())
        .await
        .unwrap();
    tx.commit().await.unwrap();
}

/// Claim the topic, store content and thereby activate it.
async fn activate_topic<DB: HubDatabase>(db: &DB, topic_id: &Uuid, body: &[u8]) {
    publish(db, topic_id).await;
    let claimant = Uuid::new_v4();
    assert!(db
        .topic_fetch_claim_by_id(topic_id, 300, &claimant)
        .await
        .unwrap());

    let mut tx = db.begin().await.unwrap();
    tx.topic_content_update(
        topic_id,
        &claimant,
        TopicContentUpdate {
            content: body.to_vec(),
            content_type: Some("application/atom+xml".to_owned()),
            content_hash: crate::crypto::content_hash(HashAlg::Sha512, body),
            http_etag: None,
            http_last_modified: None,
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
}

async fn subscribe<DB: HubDatabase>(db: &DB, topic_id: &Uuid, callback: &str, lease: u32) {
    let mut tx = db.begin().await.unwrap();
    tx.upsert_subscription(SubscriptionUpsert {
        topic_id: *topic_id,
        callback: callback.to_owned(),
        verified_at: unix_time(),
        lease_seconds: lease,
        secret: None,
        signature_algorithm: HashAlg::default(),
    })
    .await
    .unwrap();
    tx.commit().await.unwrap();
}

/// Topics round-trip through the store and duplicate URLs resolve to the
/// same row.
pub async fn topic_round_trip<DB: HubDatabase>(db: DB) {
    let id = add_topic(&db, "https://example.com/blog/").await;

    let topic = db.get_topic(&id).await.unwrap().unwrap();
    assert_eq!(topic.id, id);
    assert_eq!(topic.url, "https://example.com/blog/");
    assert_eq!(topic.lease_seconds_preferred, 864000);
    assert_eq!(topic.content_hash_algorithm, HashAlg::Sha512);
    assert!(!topic.is_active);
    assert!(!topic.is_deleted);
    assert_eq!(topic.content_hash, None);
    assert_eq!(topic.content_fetch_attempts_since_success, 0);

    let by_url = db
        .get_topic_by_url("https://example.com/blog/")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_url, topic);

    // Same URL resolves to the same row
    let again = add_topic(&db, "https://example.com/blog/").await;
    assert_eq!(again, id);

    assert_eq!(db.get_topic(&Uuid::new_v4()).await.unwrap(), None);
}

/// Invalid lease ordering is rejected at the storage boundary.
pub async fn topic_lease_bounds_validated<DB: HubDatabase>(db: DB) {
    let mut tx = db.begin().await.unwrap();
    let result = tx
        .add_topic(TopicCreate {
            url: "https://example.com/bad".to_owned(),
            lease_seconds_preferred: 10,
            lease_seconds_min: 100,
            lease_seconds_max: 1000,
            publisher_validation_url: None,
            content_hash_algorithm: HashAlg::default(),
        })
        .await;
    assert!(result.is_err());
}

/// Publish makes a topic fetchable; claims are exclusive; completion makes
/// it quiescent until the next publish.
pub async fn topic_fetch_claim_lifecycle<DB: HubDatabase>(db: DB) {
    let id = add_topic(&db, "https://example.com/feed").await;
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    // Nothing published yet
    assert!(db.topic_fetch_claim(10, 300, &a).await.unwrap().is_empty());

    publish(&db, &id).await;
    assert_eq!(db.topic_fetch_claim(10, 300, &a).await.unwrap(), vec![id]);

    // Exclusive while the lease lives
    assert!(db.topic_fetch_claim(10, 300, &b).await.unwrap().is_empty());
    assert!(!db.topic_fetch_claim_by_id(&id, 300, &b).await.unwrap());

    let mut tx = db.begin().await.unwrap();
    tx.topic_fetch_complete(&id, &a).await.unwrap();
    tx.commit().await.unwrap();

    // Quiescent after completion
    assert!(db.topic_fetch_claim(10, 300, &b).await.unwrap().is_empty());

    // A fresh publish re-arms it
    publish(&db, &id).await;
    assert_eq!(db.topic_fetch_claim(10, 300, &b).await.unwrap(), vec![id]);
}

/// Expired leases are reclaimable by any node.
pub async fn topic_fetch_claim_lease_expires<DB: HubDatabase>(db: DB) {
    let id = add_topic(&db, "https://example.com/feed").await;
    publish(&db, &id).await;

    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    // Zero-second lease expires immediately
    assert!(db.topic_fetch_claim_by_id(&id, 0, &a).await.unwrap());
    assert_eq!(db.topic_fetch_claim(10, 300, &b).await.unwrap(), vec![id]);
}

/// Failed fetches increment the attempt counter and respect the retry table.
pub async fn topic_fetch_incomplete_backoff<DB: HubDatabase>(db: DB) {
    let id = add_topic(&db, "https://example.com/feed").await;
    publish(&db, &id).await;

    let claimant = Uuid::new_v4();
    assert!(db.topic_fetch_claim_by_id(&id, 300, &claimant).await.unwrap());

    // Zero retry delay: immediately claimable again, counter grows
    let mut tx = db.begin().await.unwrap();
    tx.topic_fetch_incomplete(&id, &claimant, &[0]).await.unwrap();
    tx.commit().await.unwrap();

    let topic = db.get_topic(&id).await.unwrap().unwrap();
    assert_eq!(topic.content_fetch_attempts_since_success, 1);
    assert!(db.topic_fetch_claim_by_id(&id, 300, &claimant).await.unwrap());

    // Long retry delay: the backoff gates further claims
    let mut tx = db.begin().await.unwrap();
    tx.topic_fetch_incomplete(&id, &claimant, &[100_000])
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let topic = db.get_topic(&id).await.unwrap().unwrap();
    assert_eq!(topic.content_fetch_attempts_since_success, 2);
    assert!(topic.content_fetch_next_attempt.unwrap() > unix_time());
    assert!(db
        .topic_fetch_claim(10, 300, &claimant)
        .await
        .unwrap()
        .is_empty());

    // A fresh publish overrides the backoff
    publish(&db, &id).await;
    assert_eq!(
        db.topic_fetch_claim(10, 300, &claimant).await.unwrap(),
        vec![id]
    );
}

/// Storing content activates the topic, records history, resets counters
/// and clears the claim.
pub async fn topic_content_update_flow<DB: HubDatabase>(db: DB) {
    let id = add_topic(&db, "https://example.com/feed").await;
    activate_topic(&db, &id, b"<feed>one</feed>").await;

    let topic = db.get_topic(&id).await.unwrap().unwrap();
    assert!(topic.is_active);
    assert!(topic.content_updated.is_some());
    assert_eq!(topic.content_fetch_attempts_since_success, 0);
    assert_eq!(
        topic.content_hash.as_deref(),
        Some(crate::crypto::content_hash(HashAlg::Sha512, b"<feed>one</feed>").as_str())
    );

    let content = db.get_topic_content(&id).await.unwrap().unwrap();
    assert_eq!(content.content, b"<feed>one</feed>".to_vec());
    assert_eq!(content.content_type.as_deref(), Some("application/atom+xml"));
    assert_eq!(content.content_updated, topic.content_updated);

    let history = db.get_topic_content_history(&id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content_size, b"<feed>one</feed>".len() as u64);

    // Second update appends history
    activate_topic(&db, &id, b"<feed>two</feed>").await;
    let history = db.get_topic_content_history(&id).await.unwrap();
    assert_eq!(history.len(), 2);
}

/// Upserts create, renewals update in place, and expiry reaping works.
pub async fn subscription_upsert_and_expiry<DB: HubDatabase>(db: DB) {
    let topic_id = add_topic(&db, "https://example.com/feed").await;
    let now = unix_time();

    let mut tx = db.begin().await.unwrap();
    tx.upsert_subscription(SubscriptionUpsert {
        topic_id,
        callback: "https://sub.example.net/cb?id=1".to_owned(),
        verified_at: now,
        lease_seconds: 864000,
        secret: Some(b"s3cr3t".to_vec()),
        signature_algorithm: HashAlg::Sha256,
    })
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let sub = db
        .get_subscription_by_callback(&topic_id, "https://sub.example.net/cb?id=1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.expires_at, now + 864000);
    assert_eq!(sub.verified_at, now);
    assert_eq!(sub.secret.as_deref(), Some(b"s3cr3t".as_slice()));
    assert_eq!(sub.signature_algorithm, HashAlg::Sha256);
    assert_eq!(db.subscription_count(&topic_id).await.unwrap(), 1);

    // Renewal keeps the row, moves the lease
    let mut tx = db.begin().await.unwrap();
    tx.upsert_subscription(SubscriptionUpsert {
        topic_id,
        callback: "https://sub.example.net/cb?id=1".to_owned(),
        verified_at: now + 10,
        lease_seconds: 100,
        secret: None,
        signature_algorithm: HashAlg::default(),
    })
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let renewed = db
        .get_subscription_by_callback(&topic_id, "https://sub.example.net/cb?id=1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renewed.id, sub.id);
    assert_eq!(renewed.expires_at, now + 110);
    assert_eq!(renewed.secret, None);
    assert_eq!(db.subscription_count(&topic_id).await.unwrap(), 1);

    // Reap expired rows
    let mut tx = db.begin().await.unwrap();
    let reaped = tx
        .delete_expired_subscriptions(&topic_id, now + 200)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(reaped, 1);
    assert_eq!(db.subscription_count(&topic_id).await.unwrap(), 0);
}

/// Oversized secrets are rejected.
pub async fn subscription_secret_length_guard<DB: HubDatabase>(db: DB) {
    let topic_id = add_topic(&db, "https://example.com/feed").await;

    let mut tx = db.begin().await.unwrap();
    let result = tx
        .upsert_subscription(SubscriptionUpsert {
            topic_id,
            callback: "https://sub.example.net/cb".to_owned(),
            verified_at: unix_time(),
            lease_seconds: 1000,
            secret: Some(vec![0u8; 200]),
            signature_algorithm: HashAlg::default(),
        })
        .await;
    assert!(result.is_err());
}

/// Deliveries are claimable only when content is newer than what the
/// subscriber last received; completion records the delivered version.
pub async fn subscription_delivery_claim_lifecycle<DB: HubDatabase>(db: DB) {
    let topic_id = add_topic(&db, "https://example.com/feed").await;
    subscribe(&db, &topic_id, "https://sub.example.net/cb", 864000).await;

    let claimant = Uuid::new_v4();

    // Nothing to deliver before the first fetch
    assert!(db
        .subscription_delivery_claim(10, 300, &claimant)
        .await
        .unwrap()
        .is_empty());

    activate_topic(&db, &topic_id, b"v1").await;
    let claimed = db
        .subscription_delivery_claim(10, 300, &claimant)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    let sub_id = claimed[0];

    // Exclusive while claimed
    assert!(db
        .subscription_delivery_claim(10, 300, &Uuid::new_v4())
        .await
        .unwrap()
        .is_empty());

    let version = db
        .get_topic(&topic_id)
        .await
        .unwrap()
        .unwrap()
        .content_updated
        .unwrap();
    let mut tx = db.begin().await.unwrap();
    tx.subscription_delivery_complete(&sub_id, &claimant, version)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let sub = db.get_subscription(&sub_id).await.unwrap().unwrap();
    assert_eq!(sub.latest_content_delivered, Some(version));
    assert_eq!(sub.delivery_attempts_since_success, 0);

    // Delivered version is never re-dispatched
    assert!(db
        .subscription_delivery_claim(10, 300, &claimant)
        .await
        .unwrap()
        .is_empty());
}

/// Failed deliveries back off without touching the delivered version.
pub async fn subscription_delivery_incomplete_backoff<DB: HubDatabase>(db: DB) {
    let topic_id = add_topic(&db, "https://example.com/feed").await;
    subscribe(&db, &topic_id, "https://sub.example.net/cb", 864000).await;
    activate_topic(&db, &topic_id, b"v1").await;

    let claimant = Uuid::new_v4();
    let sub_id = db
        .subscription_delivery_claim(1, 300, &claimant)
        .await
        .unwrap()[0];

    let mut tx = db.begin().await.unwrap();
    tx.subscription_delivery_incomplete(&sub_id, &claimant, &[100_000])
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let sub = db.get_subscription(&sub_id).await.unwrap().unwrap();
    assert_eq!(sub.delivery_attempts_since_success, 1);
    assert_eq!(sub.latest_content_delivered, None);
    assert!(sub.delivery_next_attempt.unwrap() > unix_time());
    assert!(db
        .subscription_delivery_claim(10, 300, &claimant)
        .await
        .unwrap()
        .is_empty());
}

/// A 410 from the callback removes the subscription outright.
pub async fn subscription_delivery_gone_deletes<DB: HubDatabase>(db: DB) {
    let topic_id = add_topic(&db, "https://example.com/feed").await;
    subscribe(&db, &topic_id, "https://sub.example.net/cb", 864000).await;
    activate_topic(&db, &topic_id, b"v1").await;

    let claimant = Uuid::new_v4();
    let sub_id = db
        .subscription_delivery_claim(1, 300, &claimant)
        .await
        .unwrap()[0];

    let mut tx = db.begin().await.unwrap();
    tx.subscription_delivery_gone(&sub_id).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(db.get_subscription(&sub_id).await.unwrap(), None);
    assert_eq!(db.subscription_count(&topic_id).await.unwrap(), 0);
}

/// Verifications wait for the topic to go active, then claim exclusively.
pub async fn verification_claim_requires_active_topic<DB: HubDatabase>(db: DB) {
    let topic_id = add_topic(&db, "https://example.com/feed").await;

    let mut tx = db.begin().await.unwrap();
    let v_id = tx
        .add_verification(VerificationCreate {
            topic_id,
            callback: "https://sub.example.net/cb".to_owned(),
            mode: VerificationMode::Subscribe,
            lease_seconds: 864000,
            secret: None,
            signature_algorithm: HashAlg::default(),
            is_publisher_validated: true,
            reason: None,
            request_id: Some("req-1".to_owned()),
        })
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let claimant = Uuid::new_v4();
    assert!(db
        .verification_claim(10, 300, &claimant)
        .await
        .unwrap()
        .is_empty());

    activate_topic(&db, &topic_id, b"v1").await;
    assert_eq!(
        db.verification_claim(10, 300, &claimant).await.unwrap(),
        vec![v_id]
    );
    assert!(db
        .verification_claim(10, 300, &Uuid::new_v4())
        .await
        .unwrap()
        .is_empty());

    let verification = db.get_verification(&v_id).await.unwrap().unwrap();
    assert_eq!(verification.mode, VerificationMode::Subscribe);
    assert_eq!(verification.request_id.as_deref(), Some("req-1"));
}

/// Completion scrubs every pending verification for the same pair.
pub async fn verification_complete_scrubs_siblings<DB: HubDatabase>(db: DB) {
    let topic_id = add_topic(&db, "https://example.com/feed").await;
    activate_topic(&db, &topic_id, b"v1").await;

    let create = |mode| VerificationCreate {
        topic_id,
        callback: "https://sub.example.net/cb".to_owned(),
        mode,
        lease_seconds: 864000,
        secret: None,
        signature_algorithm: HashAlg::default(),
        is_publisher_validated: true,
        reason: None,
        request_id: None,
    };

    let mut tx = db.begin().await.unwrap();
    let first = tx
        .add_verification(create(VerificationMode::Unsubscribe))
        .await
        .unwrap();
    let second = tx
        .add_verification(create(VerificationMode::Subscribe))
        .await
        .unwrap();
    // A different callback survives the scrub
    let other = tx
        .add_verification(VerificationCreate {
            callback: "https://other.example.net/cb".to_owned(),
            ..create(VerificationMode::Subscribe)
        })
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = db.begin().await.unwrap();
    tx.verification_complete(&topic_id, "https://sub.example.net/cb")
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(db.get_verification(&first).await.unwrap(), None);
    assert_eq!(db.get_verification(&second).await.unwrap(), None);
    assert!(db.get_verification(&other).await.unwrap().is_some());
}

/// The publisher-denial rewrite shows up on re-load.
pub async fn verification_update_denial<DB: HubDatabase>(db: DB) {
    let topic_id = add_topic(&db, "https://example.com/feed").await;

    let mut tx = db.begin().await.unwrap();
    let v_id = tx
        .add_verification(VerificationCreate {
            topic_id,
            callback: "https://sub.example.net/cb".to_owned(),
            mode: VerificationMode::Subscribe,
            lease_seconds: 864000,
            secret: None,
            signature_algorithm: HashAlg::default(),
            is_publisher_validated: false,
            reason: None,
            request_id: None,
        })
        .await
        .unwrap();
    tx.verification_update(
        &v_id,
        VerificationMode::Denied,
        Some("publisher rejected request".to_owned()),
        true,
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let verification = db.get_verification(&v_id).await.unwrap().unwrap();
    assert_eq!(verification.mode, VerificationMode::Denied);
    assert_eq!(
        verification.reason.as_deref(),
        Some("publisher rejected request")
    );
    assert!(verification.is_publisher_validated);
}

/// Failed verifications back off and their claim clears.
pub async fn verification_incomplete_backoff<DB: HubDatabase>(db: DB) {
    let topic_id = add_topic(&db, "https://example.com/feed").await;
    activate_topic(&db, &topic_id, b"v1").await;

    let mut tx = db.begin().await.unwrap();
    let v_id = tx
        .add_verification(VerificationCreate {
            topic_id,
            callback: "https://sub.example.net/cb".to_owned(),
            mode: VerificationMode::Subscribe,
            lease_seconds: 864000,
            secret: None,
            signature_algorithm: HashAlg::default(),
            is_publisher_validated: true,
            reason: None,
            request_id: None,
        })
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let claimant = Uuid::new_v4();
    assert!(db
        .verification_claim_by_id(&v_id, 300, &claimant)
        .await
        .unwrap());

    let mut tx = db.begin().await.unwrap();
    tx.verification_incomplete(&v_id, &claimant, &[100_000])
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let verification = db.get_verification(&v_id).await.unwrap().unwrap();
    assert_eq!(verification.attempts, 1);
    assert!(verification.next_attempt > unix_time());
    assert!(db
        .verification_claim(10, 300, &claimant)
        .await
        .unwrap()
        .is_empty());
}

/// Soft-deleted topics linger while subscriptions remain, then disappear.
pub async fn topic_two_phase_delete<DB: HubDatabase>(db: DB) {
    let topic_id = add_topic(&db, "https://example.com/feed").await;
    subscribe(&db, &topic_id, "https://sub.example.net/cb", 864000).await;

    let mut tx = db.begin().await.unwrap();
    tx.set_topic_deleted(&topic_id).await.unwrap();
    let gone = tx.topic_pending_delete(&topic_id).await.unwrap();
    tx.commit().await.unwrap();
    assert!(!gone, "topic with subscriptions must survive");

    let topic = db.get_topic(&topic_id).await.unwrap().unwrap();
    assert!(topic.is_deleted);

    let mut tx = db.begin().await.unwrap();
    tx.delete_subscription(&topic_id, "https://sub.example.net/cb")
        .await
        .unwrap();
    let gone = tx.topic_pending_delete(&topic_id).await.unwrap();
    tx.commit().await.unwrap();
    assert!(gone);
    assert_eq!(db.get_topic(&topic_id).await.unwrap(), None);
}

/// Soft-deleted topics stop being fetchable.
pub async fn deleted_topic_not_fetchable<DB: HubDatabase>(db: DB) {
    let topic_id = add_topic(&db, "https://example.com/feed").await;
    publish(&db, &topic_id).await;

    let mut tx = db.begin().await.unwrap();
    tx.set_topic_deleted(&topic_id).await.unwrap();
    tx.commit().await.unwrap();

    assert!(db
        .topic_fetch_claim(10, 300, &Uuid::new_v4())
        .await
        .unwrap()
        .is_empty());
}

/// The delist path bumps `content_updated` so subscribers get one last
/// notification slot.
pub async fn topic_delisted_forces_notification<DB: HubDatabase>(db: DB) {
    let topic_id = add_topic(&db, "https://example.com/feed").await;
    subscribe(&db, &topic_id, "https://sub.example.net/cb", 864000).await;
    activate_topic(&db, &topic_id, b"v1").await;

    // Drain the pending delivery
    let claimant = Uuid::new_v4();
    let sub_id = db
        .subscription_delivery_claim(1, 300, &claimant)
        .await
        .unwrap()[0];
    let version = db
        .get_topic(&topic_id)
        .await
        .unwrap()
        .unwrap()
        .content_updated
        .unwrap();
    let mut tx = db.begin().await.unwrap();
    tx.subscription_delivery_complete(&sub_id, &claimant, version)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    // Delist mid-fetch
    publish(&db, &topic_id).await;
    let fetcher = Uuid::new_v4();
    assert!(db
        .topic_fetch_claim_by_id(&topic_id, 300, &fetcher)
        .await
        .unwrap());
    let mut tx = db.begin().await.unwrap();
    tx.topic_delisted(&topic_id, &fetcher).await.unwrap();
    tx.commit().await.unwrap();

    let topic = db.get_topic(&topic_id).await.unwrap().unwrap();
    assert!(topic.is_deleted);
    assert!(topic.content_updated.unwrap() > version);

    // The subscription becomes deliverable again for the final notice
    assert_eq!(
        db.subscription_delivery_claim(10, 300, &claimant)
            .await
            .unwrap(),
        vec![sub_id]
    );
}

/// A lapsed claim turns completion writes into `ClaimLost`.
pub async fn stale_claimant_write_rejected<DB: HubDatabase>(db: DB) {
    let topic_id = add_topic(&db, "https://example.com/feed").await;
    publish(&db, &topic_id).await;

    let stale = Uuid::new_v4();
    let fresh = Uuid::new_v4();

    // Claim lapses instantly, another node takes over
    assert!(db.topic_fetch_claim_by_id(&topic_id, 0, &stale).await.unwrap());
    assert!(db
        .topic_fetch_claim_by_id(&topic_id, 300, &fresh)
        .await
        .unwrap());

    let mut tx = db.begin().await.unwrap();
    let result = tx.topic_fetch_complete(&topic_id, &stale).await;
    assert!(matches!(
        result,
        Err(crate::database::Error::ClaimLost)
    ));
    tx.rollback().await.unwrap();
}

/// Rolled-back transactions leave nothing behind.
pub async fn transaction_rollback<DB: HubDatabase>(db: DB) {
    let mut tx = db.begin().await.unwrap();
    tx.add_topic(topic_create("https://example.com/feed"))
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(
        db.get_topic_by_url("https://example.com/feed").await.unwrap(),
        None
    );
}

/// Health ping answers.
pub async fn ping_answers<DB: HubDatabase>(db: DB) {
    db.ping().await.unwrap();
}

/// Unit tests every storage backend is expected to pass
#[macro_export]
macro_rules! hub_db_test {
    ($make_db_fn:ident) => {
        hub_db_test!(
            $make_db_fn,
            topic_round_trip,
            topic_lease_bounds_validated,
            topic_fetch_claim_lifecycle,
            topic_fetch_claim_lease_expires,
            topic_fetch_incomplete_backoff,
            topic_content_update_flow,
            subscription_upsert_and_expiry,
            subscription_secret_length_guard,
            subscription_delivery_claim_lifecycle,
            subscription_delivery_incomplete_backoff,
            subscription_delivery_gone_deletes,
            verification_claim_requires_active_topic,
            verification_complete_scrubs_siblings,
            verification_update_denial,
            verification_incomplete_backoff,
            topic_two_phase_delete,
            deleted_topic_not_fetchable,
            topic_delisted_forces_notification,
            stale_claimant_write_rejected,
            transaction_rollback,
            ping_answers,
        );
    };
    ($make_db_fn:ident, $($name:ident),+ $(,)?) => {
        $(
            #[tokio::test]
            async fn $name() {
                use std::time::{SystemTime, UNIX_EPOCH};
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .expect("Time went backwards");

                websub_common::database::test::$name(
                    $make_db_fn(format!("test_{}_{}", now.as_nanos(), stringify!($name))).await,
                )
                .await;
            }
        )+
    };
}
