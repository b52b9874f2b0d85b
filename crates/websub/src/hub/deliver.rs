//! Content delivery state machine
//!
//! One claimed delivery attempt: POST the topic's current content to the
//! subscriber callback, signed when the subscription carries a secret. A
//! delivery slot against a disowned topic turns into an unsubscription
//! notice instead.

use reqwest::header::{HeaderValue, CONTENT_TYPE, LINK};
use reqwest::StatusCode;
use tracing::instrument;
use uuid::Uuid;
use websub_common::crypto::signature_header;
use websub_common::subscription::Subscription;
use websub_common::topic::TopicContent;
use websub_common::util::unix_time;
use websub_common::verification::{VerificationCreate, VerificationMode};

use super::{Hub, REASON_TOPIC_GONE};
use crate::error::Error;

/// Signature header on signed deliveries
const X_HUB_SIGNATURE: &str = "X-Hub-Signature";

impl Hub {
    /// One delivery attempt for a claimed subscription
    #[instrument(skip(self))]
    pub(crate) async fn process_delivery(&self, subscription_id: Uuid) -> Result<(), Error> {
        let Some(subscription) = self.db.get_subscription(&subscription_id).await? else {
            // Deleted (410 or unsubscribe) after we claimed it
            tracing::debug!("Subscription {} is gone", subscription_id);
            return Ok(());
        };

        let Some(topic) = self.db.get_topic(&subscription.topic_id).await? else {
            tracing::debug!(
                "Topic {} behind subscription {} is gone",
                subscription.topic_id,
                subscription_id
            );
            return Ok(());
        };

        // A disowned topic converts the delivery slot into a denial notice;
        // the verifier will notify the callback and drop the subscription.
        if topic.is_deleted {
            let mut tx = self.db.begin().await?;
            tx.add_verification(VerificationCreate {
                topic_id: topic.id,
                callback: subscription.callback.clone(),
                mode: VerificationMode::Denied,
                lease_seconds: 0,
                secret: None,
                signature_algorithm: Default::default(),
                is_publisher_validated: true,
                reason: Some(REASON_TOPIC_GONE.to_owned()),
                request_id: None,
            })
            .await?;
            tx.subscription_delivery_complete(
                &subscription_id,
                &self.node_id,
                topic.content_updated.unwrap_or_else(unix_time),
            )
            .await?;
            tx.commit().await?;

            tracing::info!(
                "Topic {} is gone; queued a denial notice for {}",
                topic.url,
                subscription.callback
            );
            return Ok(());
        }

        let Some(content) = self.db.get_topic_content(&subscription.topic_id).await? else {
            return Err(Error::MissingRow("topic content", subscription.topic_id));
        };

        let request = match self.build_delivery_request(&subscription, &topic.url, &content) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(
                    "Cannot build delivery request to {}: {}",
                    subscription.callback,
                    err
                );
                return self.delivery_incomplete(&subscription_id).await;
            }
        };

        let response = match self
            .http
            .execute_with_retry(self.http.callbacks(), request)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::info!(
                    "Delivery to {} failed in transit: {}",
                    subscription.callback,
                    err
                );
                return self.delivery_incomplete(&subscription_id).await;
            }
        };

        let status = response.status();

        if status.is_success() {
            let delivered_version = content.content_updated.unwrap_or_else(unix_time);
            let mut tx = self.db.begin().await?;
            tx.subscription_delivery_complete(&subscription_id, &self.node_id, delivered_version)
                .await?;
            tx.commit().await?;

            tracing::info!(
                "Delivered {} to {} ({} bytes)",
                topic.url,
                subscription.callback,
                content.content.len()
            );
            return Ok(());
        }

        if status == StatusCode::GONE {
            // The subscriber is telling us to stop for good
            let mut tx = self.db.begin().await?;
            tx.subscription_delivery_gone(&subscription_id).await?;
            tx.commit().await?;

            tracing::info!(
                "Callback {} answered 410, subscription removed",
                subscription.callback
            );
            return Ok(());
        }

        tracing::info!(
            "Delivery to {} returned {}",
            subscription.callback,
            status
        );
        self.delivery_incomplete(&subscription_id).await
    }

    fn build_delivery_request(
        &self,
        subscription: &Subscription,
        topic_url: &str,
        content: &TopicContent,
    ) -> Result<reqwest::Request, Error> {
        let content_type = content
            .content_type
            .as_deref()
            .and_then(|value| HeaderValue::from_str(value).ok())
            .unwrap_or(HeaderValue::from_static("text/plain"));

        let link = format!(
            r#"<{}>; rel="self", <{}>; rel="hub""#,
            topic_url, self.config.public_url
        );

        let mut builder = self
            .http
            .callbacks()
            .post(subscription.callback.as_str())
            .header(CONTENT_TYPE, content_type)
            .header(LINK, link)
            .body(content.content.clone());

        if let Some(secret) = subscription.secret.as_deref() {
            if !secret.is_empty() {
                let signature =
                    signature_header(subscription.signature_algorithm, secret, &content.content)?;
                builder = builder.header(X_HUB_SIGNATURE, signature);
            }
        }

        builder.build().map_err(Error::HttpSetup)
    }

    async fn delivery_incomplete(&self, subscription_id: &Uuid) -> Result<(), Error> {
        let mut tx = self.db.begin().await?;
        tx.subscription_delivery_incomplete(
            subscription_id,
            &self.node_id,
            &self.config.delivery_retry_delays,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
