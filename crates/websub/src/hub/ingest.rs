//! Ingress operations
//!
//! The HTTP router parses requests into the types here; validation outcomes
//! are values, not exceptions, and the router maps rejections to a 400 with
//! the collected error and warning lines.

use url::Url;
use uuid::Uuid;
use websub_common::subscription::MAX_SECRET_BYTES;
use websub_common::topic::TopicCreate;
use websub_common::util::unix_time;
use websub_common::verification::{VerificationCreate, VerificationMode};

use super::Hub;
use crate::error::Error;

/// What a subscriber asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    /// `hub.mode=subscribe`
    Subscribe,
    /// `hub.mode=unsubscribe`
    Unsubscribe,
}

/// A parsed subscribe/unsubscribe request
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    /// Requested action
    pub action: SubscriptionAction,
    /// Subscriber callback URL
    pub callback: String,
    /// Topic URL
    pub topic: String,
    /// Raw `hub.lease_seconds` value, if supplied
    pub lease_seconds: Option<String>,
    /// Delivery secret, if supplied
    pub secret: Option<String>,
    /// Ingress request id for correlation
    pub request_id: Option<String>,
}

/// Validation rejection: at least one error, plus any warnings gathered
/// along the way
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rejection {
    /// What made the request unacceptable
    pub errors: Vec<String>,
    /// Non-fatal notes
    pub warnings: Vec<String>,
}

/// An accepted subscription request
#[derive(Debug, Clone)]
pub struct SubscriptionAccepted {
    /// The verification row driving the intent
    pub verification_id: Uuid,
    /// Non-fatal notes for the response
    pub warnings: Vec<String>,
}

/// Validation outcome
#[derive(Debug, Clone)]
pub enum RequestOutcome<T> {
    /// Request accepted and persisted
    Accepted(T),
    /// Request rejected; nothing persisted
    Rejected(Rejection),
}

/// Per-topic outcome of a publish request
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    /// The topic URL as submitted
    pub topic_url: String,
    /// Topic id when accepted, rejection message otherwise
    pub result: Result<Uuid, String>,
}

fn parse_http_url(field: &str, value: &str, errors: &mut Vec<String>) -> Option<Url> {
    match Url::parse(value) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Some(url),
        Ok(url) => {
            errors.push(format!(
                "{field} must be an http or https URL, not {}",
                url.scheme()
            ));
            None
        }
        Err(err) => {
            errors.push(format!("{field} is not a valid absolute URL: {err}"));
            None
        }
    }
}

impl Hub {
    /// Accepts or rejects a subscribe/unsubscribe request; on accept the
    /// verification row exists when this returns, and has already been
    /// processed inline when immediate processing is on.
    pub async fn subscription_request(
        &self,
        request: SubscriptionRequest,
    ) -> Result<RequestOutcome<SubscriptionAccepted>, Error> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let callback = parse_http_url("hub.callback", &request.callback, &mut errors);
        parse_http_url("hub.topic", &request.topic, &mut errors);

        let requested_lease = match request.lease_seconds.as_deref() {
            None => None,
            Some(raw) => match raw.parse::<u32>() {
                Ok(lease) => Some(lease),
                Err(_) => {
                    warnings.push(format!(
                        "hub.lease_seconds is not a number ({raw}), using the topic default"
                    ));
                    None
                }
            },
        };

        if let Some(secret) = request.secret.as_deref() {
            if secret.len() > MAX_SECRET_BYTES {
                errors.push(format!("hub.secret must be at most {MAX_SECRET_BYTES} bytes"));
            }

            if callback
                .as_ref()
                .map(|cb| cb.scheme() != "https")
                .unwrap_or(false)
            {
                let message =
                    "hub.secret over a plaintext callback can be observed in transit".to_owned();
                if self.config.strict_secrets {
                    errors.push(message);
                } else {
                    warnings.push(message);
                }
            }
        }

        if !errors.is_empty() {
            return Ok(RequestOutcome::Rejected(Rejection { errors, warnings }));
        }

        let topic = match self.db.get_topic_by_url(&request.topic).await? {
            Some(topic) => topic,
            None if self.config.public_hub => {
                let mut tx = self.db.begin().await?;
                let topic_id = tx
                    .add_topic(TopicCreate {
                        url: request.topic.clone(),
                        lease_seconds_preferred: self.config.lease_seconds_preferred,
                        lease_seconds_min: self.config.lease_seconds_min,
                        lease_seconds_max: self.config.lease_seconds_max,
                        publisher_validation_url: None,
                        content_hash_algorithm: Default::default(),
                    })
                    .await?;

                // Brand-new topics need a first fetch before any
                // verification can run against them
                tx.topic_publish_received(&topic_id, unix_time()).await?;
                tx.commit().await?;

                self.db
                    .get_topic(&topic_id)
                    .await?
                    .ok_or(Error::MissingRow("topic", topic_id))?
            }
            None => {
                return Ok(RequestOutcome::Rejected(Rejection {
                    errors: vec![format!("unknown topic {}", request.topic)],
                    warnings,
                }));
            }
        };

        let lease_seconds = topic.clamp_lease(requested_lease);
        if let Some(requested) = requested_lease {
            if requested != lease_seconds {
                warnings.push(format!(
                    "hub.lease_seconds clamped from {requested} to {lease_seconds}"
                ));
            }
        }

        let mode = match request.action {
            SubscriptionAction::Subscribe => VerificationMode::Subscribe,
            SubscriptionAction::Unsubscribe => VerificationMode::Unsubscribe,
        };

        // Publisher validation only gates subscribe intents
        let is_publisher_validated = match request.action {
            SubscriptionAction::Subscribe => topic.publisher_validation_url.is_none(),
            SubscriptionAction::Unsubscribe => true,
        };

        let mut tx = self.db.begin().await?;
        let verification_id = tx
            .add_verification(VerificationCreate {
                topic_id: topic.id,
                callback: request.callback.clone(),
                mode,
                lease_seconds,
                secret: request.secret.map(String::into_bytes),
                signature_algorithm: Default::default(),
                is_publisher_validated,
                reason: None,
                request_id: request.request_id,
            })
            .await?;
        tx.commit().await?;

        if self.config.immediate_processing {
            if let Err(err) = self.verification_claim_and_process(&verification_id).await {
                tracing::warn!(
                    "Inline processing of verification {} failed: {}",
                    verification_id,
                    err
                );
            }
        }

        Ok(RequestOutcome::Accepted(SubscriptionAccepted {
            verification_id,
            warnings,
        }))
    }

    /// Handles a publish announcement for a deduplicated set of topic URLs.
    /// Valid topics are marked publish-received (created first when this is
    /// a public hub) and optionally fetched inline.
    pub async fn publish_request(&self, topic_urls: Vec<String>) -> Result<Vec<PublishOutcome>, Error> {
        let mut outcomes = Vec::with_capacity(topic_urls.len());
        let now = unix_time();

        for topic_url in topic_urls {
            let mut errors = Vec::new();
            if parse_http_url("topic", &topic_url, &mut errors).is_none() {
                outcomes.push(PublishOutcome {
                    topic_url,
                    result: Err(errors.remove(0)),
                });
                continue;
            }

            let existing = self.db.get_topic_by_url(&topic_url).await?;
            let topic_id = match existing {
                Some(topic) if topic.is_deleted => {
                    outcomes.push(PublishOutcome {
                        topic_url,
                        result: Err("topic has been removed from this hub".to_owned()),
                    });
                    continue;
                }
                Some(topic) => topic.id,
                None if self.config.public_hub => {
                    let mut tx = self.db.begin().await?;
                    let topic_id = tx
                        .add_topic(TopicCreate {
                            url: topic_url.clone(),
                            lease_seconds_preferred: self.config.lease_seconds_preferred,
                            lease_seconds_min: self.config.lease_seconds_min,
                            lease_seconds_max: self.config.lease_seconds_max,
                            publisher_validation_url: None,
                            content_hash_algorithm: Default::default(),
                        })
                        .await?;
                    tx.commit().await?;
                    topic_id
                }
                None => {
                    outcomes.push(PublishOutcome {
                        topic_url,
                        result: Err("unknown topic".to_owned()),
                    });
                    continue;
                }
            };

            let mut tx = self.db.begin().await?;
            tx.topic_publish_received(&topic_id, now).await?;
            tx.commit().await?;

            outcomes.push(PublishOutcome {
                topic_url,
                result: Ok(topic_id),
            });
        }

        if self.config.immediate_processing {
            for outcome in &outcomes {
                if let Ok(topic_id) = outcome.result {
                    if let Err(err) = self.topic_fetch_claim_and_process(&topic_id).await {
                        tracing::warn!(
                            "Inline fetch of topic {} failed: {}",
                            outcome.topic_url,
                            err
                        );
                    }
                }
            }
        }

        Ok(outcomes)
    }
}
