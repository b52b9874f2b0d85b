//! Verification state machine
//!
//! Drives a claimed verification to a settled state: optional publisher
//! validation, then the challenge round-trip against the subscriber
//! callback. Completion scrubs the whole `(callback, topic)` family so a
//! settled intent obsoletes anything stale behind it.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use tracing::instrument;
use url::Url;
use uuid::Uuid;
use websub_common::subscription::SubscriptionUpsert;
use websub_common::util::unix_time;
use websub_common::verification::{Verification, VerificationMode};

use super::{Hub, REASON_TOPIC_GONE};
use crate::error::Error;

/// `hub.challenge` entropy before base64
const CHALLENGE_BYTES: usize = 30;

fn generate_challenge() -> String {
    let mut bytes = [0u8; CHALLENGE_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// How the callback round-trip settled
enum CallbackOutcome {
    /// 2xx and (for subscribe/unsubscribe) the body echoed the challenge
    Accepted,
    /// Terminal refusal: wrong challenge or a definitive non-2xx
    Rejected,
    /// Transient failure, retry later
    Retry,
}

impl Hub {
    /// One processing attempt for a claimed verification
    #[instrument(skip(self))]
    pub(crate) async fn process_verification(&self, verification_id: Uuid) -> Result<(), Error> {
        let Some(mut verification) = self.db.get_verification(&verification_id).await? else {
            // A sibling completion scrubbed the row after we claimed it
            tracing::debug!("Verification {} is already settled", verification_id);
            return Ok(());
        };

        let Some(topic) = self.db.get_topic(&verification.topic_id).await? else {
            tracing::debug!(
                "Topic {} behind verification {} is gone",
                verification.topic_id,
                verification_id
            );
            return Ok(());
        };

        // Subscribing to a disowned topic turns into a denial notice
        if topic.is_deleted && verification.mode == VerificationMode::Subscribe {
            verification.mode = VerificationMode::Denied;
            verification.reason = Some(REASON_TOPIC_GONE.to_owned());

            let mut tx = self.db.begin().await?;
            tx.verification_update(
                &verification_id,
                verification.mode,
                verification.reason.clone(),
                verification.is_publisher_validated,
            )
            .await?;
            tx.commit().await?;
        }

        if !verification.is_publisher_validated
            && verification.mode == VerificationMode::Subscribe
        {
            if let Some(validation_url) = topic.publisher_validation_url.as_deref() {
                match self
                    .publisher_validate(&verification, &topic.url, validation_url)
                    .await
                {
                    Some(true) => {
                        verification.is_publisher_validated = true;
                    }
                    Some(false) => {
                        verification.mode = VerificationMode::Denied;
                        verification.reason = Some("publisher rejected request".to_owned());
                        verification.is_publisher_validated = true;
                    }
                    None => {
                        return self.verification_incomplete(&verification_id).await;
                    }
                }

                let mut tx = self.db.begin().await?;
                tx.verification_update(
                    &verification_id,
                    verification.mode,
                    verification.reason.clone(),
                    true,
                )
                .await?;
                tx.commit().await?;
            }
        }

        let challenge = match verification.mode {
            VerificationMode::Denied => None,
            _ => Some(generate_challenge()),
        };

        match self
            .callback_round_trip(&verification, &topic.url, challenge.as_deref())
            .await
        {
            CallbackOutcome::Retry => self.verification_incomplete(&verification_id).await,
            CallbackOutcome::Accepted => {
                self.settle_verification(&verification, &topic.url, topic.is_deleted, true)
                    .await
            }
            CallbackOutcome::Rejected => {
                self.settle_verification(&verification, &topic.url, topic.is_deleted, false)
                    .await
            }
        }
    }

    /// POSTs the intent to the publisher's validation endpoint.
    ///
    /// `Some(true)` means validated, `Some(false)` means denied, `None`
    /// means try again later.
    async fn publisher_validate(
        &self,
        verification: &Verification,
        topic_url: &str,
        validation_url: &str,
    ) -> Option<bool> {
        let body = serde_json::json!({
            "callback": verification.callback,
            "topic": topic_url,
        });

        let request = match self
            .http
            .callbacks()
            .post(validation_url)
            .json(&body)
            .build()
        {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!("Cannot build validation request to {}: {}", validation_url, err);
                return None;
            }
        };

        let response = match self
            .http
            .execute_with_retry(self.http.callbacks(), request)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::info!("Publisher validation at {} failed in transit: {}", validation_url, err);
                return None;
            }
        };

        let status = response.status();
        if status.is_success() {
            Some(true)
        } else if status.is_client_error() {
            tracing::info!(
                "Publisher at {} rejected subscription from {} ({})",
                validation_url,
                verification.callback,
                status
            );
            Some(false)
        } else {
            tracing::info!("Publisher validation at {} returned {}", validation_url, status);
            None
        }
    }

    /// GETs the callback with the `hub.*` parameters and classifies the
    /// answer.
    async fn callback_round_trip(
        &self,
        verification: &Verification,
        topic_url: &str,
        challenge: Option<&str>,
    ) -> CallbackOutcome {
        let mut callback = match Url::parse(&verification.callback) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!("Stored callback {} is unparseable: {}", verification.callback, err);
                return CallbackOutcome::Rejected;
            }
        };

        {
            let mut pairs = callback.query_pairs_mut();
            pairs.append_pair("hub.topic", topic_url);
            pairs.append_pair("hub.mode", verification.mode.as_str());

            match challenge {
                Some(challenge) => {
                    pairs.append_pair("hub.challenge", challenge);
                    pairs.append_pair(
                        "hub.lease_seconds",
                        &verification.lease_seconds.to_string(),
                    );
                }
                None => {
                    if let Some(reason) = verification.reason.as_deref() {
                        pairs.append_pair("hub.reason", reason);
                    }
                }
            }
        }

        let request = match self.http.callbacks().get(callback.clone()).build() {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!("Cannot build callback request to {}: {}", callback, err);
                return CallbackOutcome::Retry;
            }
        };

        let response = match self
            .http
            .execute_with_retry(self.http.callbacks(), request)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::info!("Callback {} unreachable: {}", verification.callback, err);
                return CallbackOutcome::Retry;
            }
        };

        let status = response.status();
        if status.is_server_error() {
            tracing::info!("Callback {} answered {}", verification.callback, status);
            return CallbackOutcome::Retry;
        }

        if !status.is_success() {
            tracing::info!(
                "Callback {} refused {} ({})",
                verification.callback,
                verification.mode,
                status
            );
            return CallbackOutcome::Rejected;
        }

        match challenge {
            // Denial notices just need acknowledgement
            None => CallbackOutcome::Accepted,
            Some(challenge) => match response.bytes().await {
                Ok(body) if body.as_ref() == challenge.as_bytes() => CallbackOutcome::Accepted,
                Ok(_) => {
                    tracing::info!(
                        "Callback {} did not echo the challenge",
                        verification.callback
                    );
                    CallbackOutcome::Rejected
                }
                Err(err) => {
                    tracing::info!(
                        "Reading challenge response from {} failed: {}",
                        verification.callback,
                        err
                    );
                    CallbackOutcome::Retry
                }
            },
        }
    }

    /// Applies the settled outcome and scrubs the verification family in
    /// one transaction.
    async fn settle_verification(
        &self,
        verification: &Verification,
        topic_url: &str,
        topic_is_deleted: bool,
        accepted: bool,
    ) -> Result<(), Error> {
        let mut tx = self.db.begin().await?;

        if accepted {
            match verification.mode {
                VerificationMode::Subscribe => {
                    tx.upsert_subscription(SubscriptionUpsert {
                        topic_id: verification.topic_id,
                        callback: verification.callback.clone(),
                        verified_at: unix_time(),
                        lease_seconds: verification.lease_seconds,
                        secret: verification.secret.clone(),
                        signature_algorithm: verification.signature_algorithm,
                    })
                    .await?;
                    tracing::info!(
                        "Subscription of {} to {} verified for {} seconds",
                        verification.callback,
                        topic_url,
                        verification.lease_seconds
                    );
                }
                VerificationMode::Unsubscribe | VerificationMode::Denied => {
                    let removed = tx
                        .delete_subscription(&verification.topic_id, &verification.callback)
                        .await?;
                    if removed {
                        tracing::info!(
                            "Subscription of {} to {} removed ({})",
                            verification.callback,
                            topic_url,
                            verification.mode
                        );
                    }

                    if topic_is_deleted {
                        tx.topic_pending_delete(&verification.topic_id).await?;
                    }
                }
            }
        } else {
            tracing::info!(
                "Verification of {} for {} rejected",
                verification.mode,
                verification.callback
            );
        }

        tx.verification_complete(&verification.topic_id, &verification.callback)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn verification_incomplete(&self, verification_id: &Uuid) -> Result<(), Error> {
        let mut tx = self.db.begin().await?;
        tx.verification_incomplete(
            verification_id,
            &self.node_id,
            &self.config.verify_retry_delays,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
