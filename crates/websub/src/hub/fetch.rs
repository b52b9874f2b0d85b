//! Topic fetch state machine
//!
//! One claimed fetch attempt: conditional GET against the topic URL, change
//! detection by content hash, and under the strict hub-link policy a check
//! that the content still advertises this hub. Remote failures land in row
//! state and come back through the retry schedule.

use reqwest::header::{ACCEPT, CONTENT_TYPE, IF_MODIFIED_SINCE, IF_NONE_MATCH, LINK};
use reqwest::StatusCode;
use tracing::instrument;
use uuid::Uuid;
use websub_common::crypto::content_hash;
use websub_common::topic::{Topic, TopicContentUpdate};
use websub_common::util::unix_time;

use super::Hub;
use crate::discovery;
use crate::error::Error;

impl Hub {
    /// One fetch attempt for a claimed topic
    #[instrument(skip(self))]
    pub(crate) async fn process_topic_fetch(&self, topic_id: Uuid) -> Result<(), Error> {
        let Some(topic) = self.db.get_topic(&topic_id).await? else {
            return Err(Error::MissingRow("topic", topic_id));
        };

        if topic.is_deleted {
            // Nothing to fetch anymore; just settle the claim
            return self.fetch_complete(&topic_id).await;
        }

        // Reap lapsed subscriptions before producing new delivery work
        let mut tx = self.db.begin().await?;
        let reaped = tx
            .delete_expired_subscriptions(&topic_id, unix_time())
            .await?;
        tx.commit().await?;
        if reaped > 0 {
            tracing::info!("Removed {} expired subscriptions from {}", reaped, topic.url);
        }

        let request = match self.build_fetch_request(&topic) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!("Cannot build fetch request for {}: {}", topic.url, err);
                return self.fetch_incomplete(&topic_id).await;
            }
        };

        let response = match self
            .http
            .execute_with_retry(self.http.topics(), request)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::info!("Fetch of {} failed in transit: {}", topic.url, err);
                return self.fetch_incomplete(&topic_id).await;
            }
        };

        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!("{} is unchanged (304)", topic.url);
            return self.fetch_complete(&topic_id).await;
        }

        if !status.is_success() {
            tracing::info!("Fetch of {} returned {}", topic.url, status);
            return self.fetch_incomplete(&topic_id).await;
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let http_etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let http_last_modified = response
            .headers()
            .get("last-modified")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let link_headers: Vec<String> = response
            .headers()
            .get_all(LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_owned)
            .collect();

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => {
                tracing::info!("Reading body of {} failed: {}", topic.url, err);
                return self.fetch_incomplete(&topic_id).await;
            }
        };

        let hash = content_hash(topic.content_hash_algorithm, &body);
        if topic.content_hash.as_deref() == Some(hash.as_str()) {
            tracing::debug!("{} content hash is unchanged", topic.url);
            return self.fetch_complete(&topic_id).await;
        }

        if self.config.strict_topic_hub_link
            && !discovery::hub_listed(
                &self.config.public_url,
                &topic.url,
                &link_headers,
                content_type.as_deref(),
                &body,
            )
        {
            tracing::info!(
                "{} no longer advertises this hub, removing the topic",
                topic.url
            );

            // One last content_updated bump gives every subscriber a final
            // (denial) notification before the row can go away
            let mut tx = self.db.begin().await?;
            tx.topic_delisted(&topic_id, &self.node_id).await?;
            tx.topic_pending_delete(&topic_id).await?;
            tx.commit().await?;
            return Ok(());
        }

        let mut tx = self.db.begin().await?;
        tx.topic_content_update(
            &topic_id,
            &self.node_id,
            TopicContentUpdate {
                content: body.to_vec(),
                content_type,
                content_hash: hash,
                http_etag,
                http_last_modified,
            },
        )
        .await?;
        tx.commit().await?;

        tracing::info!("Updated content for {} ({} bytes)", topic.url, body.len());
        Ok(())
    }

    fn build_fetch_request(&self, topic: &Topic) -> Result<reqwest::Request, reqwest::Error> {
        let accept = match topic.content_type.as_deref() {
            Some(content_type) => format!("{content_type}, */*;q=0.9"),
            None => "*/*".to_owned(),
        };

        let mut builder = self
            .http
            .topics()
            .get(topic.url.as_str())
            .header(ACCEPT, accept);

        if let Some(etag) = topic.http_etag.as_deref() {
            builder = builder.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = topic.http_last_modified.as_deref() {
            builder = builder.header(IF_MODIFIED_SINCE, last_modified);
        }

        builder.build()
    }

    pub(crate) async fn fetch_complete(&self, topic_id: &Uuid) -> Result<(), Error> {
        let mut tx = self.db.begin().await?;
        tx.topic_fetch_complete(topic_id, &self.node_id).await?;
        tx.commit().await?;
        Ok(())
    }

    pub(crate) async fn fetch_incomplete(&self, topic_id: &Uuid) -> Result<(), Error> {
        let mut tx = self.db.begin().await?;
        tx.topic_fetch_incomplete(topic_id, &self.node_id, &self.config.fetch_retry_delays)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
