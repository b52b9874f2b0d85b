//! SQL implementation of the hub storage interface
//!
//! Written once against standard ANSI SQL; any driver that can run these
//! statement shapes (named placeholders, `ON CONFLICT` upserts,
//! `UPDATE … RETURNING`) plugs in through [`DatabaseConnector`].
//!
//! Work claiming is a single conditional `UPDATE … RETURNING`: the row's
//! eligibility predicate and the no-live-lease check are re-evaluated by the
//! update itself, so concurrent claimants cannot win the same row and a
//! crashed node's claims lapse back into the pool when their lease expires.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;
use uuid::Uuid;
use websub_common::backoff::{attempt_retry_seconds, DEFAULT_JITTER};
use websub_common::crypto::HashAlg;
use websub_common::database::{Error, HubDatabase, HubTransaction};
use websub_common::subscription::{Subscription, SubscriptionUpsert, MAX_SECRET_BYTES};
use websub_common::topic::{
    Topic, TopicContent, TopicContentHistory, TopicContentUpdate, TopicCreate,
};
use websub_common::util::unix_time;
use websub_common::verification::{Verification, VerificationCreate, VerificationMode};

use crate::cache::ContentCache;
use crate::common::migrate;
use crate::database::{DatabaseConnector, DatabaseExecutor, DatabaseTransaction};
use crate::stmt::{query, Column};
use crate::{
    column_as_bool, column_as_nullable_binary, column_as_nullable_number,
    column_as_nullable_string, column_as_number, column_as_string, unpack_into,
};

pub mod migrations;

/// Hub SQL database
#[derive(Debug)]
pub struct SQLHubDatabase<C>
where
    C: DatabaseConnector,
{
    db: C,
    cache: Option<Arc<ContentCache>>,
}

/// Hub SQL transaction
#[derive(Debug)]
pub struct SQLHubTransaction<T>
where
    T: DatabaseTransaction,
{
    inner: T,
}

impl<C> SQLHubDatabase<C>
where
    C: DatabaseConnector,
{
    /// Creates a new instance, applying pending schema migrations
    pub async fn new<X>(conn: X) -> Result<Self, Error>
    where
        X: Into<C>,
    {
        let db = conn.into();

        let tx = db.begin().await?;
        migrate(&tx, C::name(), migrations::MIGRATIONS).await?;
        tx.commit().await?;

        Ok(Self { db, cache: None })
    }

    /// Attach a content cache.
    ///
    /// Only meaningful when an invalidation listener keeps the cache honest;
    /// the cache stays disabled (and therefore inert) until that listener
    /// enables it.
    pub fn with_content_cache(mut self, cache: Arc<ContentCache>) -> Self {
        self.cache = Some(cache);
        self
    }
}

const TOPIC_COLUMNS: &str = r#"
    id, url, lease_seconds_preferred, lease_seconds_min, lease_seconds_max,
    publisher_validation_url, content_hash_algorithm, is_active, is_deleted,
    content_type, content_hash, http_etag, http_last_modified,
    content_updated, last_publish, content_fetch_last_complete,
    content_fetch_next_attempt, content_fetch_attempts_since_success
"#;

fn topic_from_row(row: Vec<Column>) -> Result<Topic, Error> {
    unpack_into!(
        let (
            id, url, lease_seconds_preferred, lease_seconds_min, lease_seconds_max,
            publisher_validation_url, content_hash_algorithm, is_active, is_deleted,
            content_type, content_hash, http_etag, http_last_modified,
            content_updated, last_publish, content_fetch_last_complete,
            content_fetch_next_attempt, content_fetch_attempts_since_success
        ) = row
    );

    Ok(Topic {
        id: column_as_string!(id, Uuid::parse_str),
        url: column_as_string!(url),
        lease_seconds_preferred: column_as_number!(lease_seconds_preferred),
        lease_seconds_min: column_as_number!(lease_seconds_min),
        lease_seconds_max: column_as_number!(lease_seconds_max),
        publisher_validation_url: column_as_nullable_string!(publisher_validation_url),
        content_hash_algorithm: column_as_string!(content_hash_algorithm, HashAlg::from_str),
        is_active: column_as_bool!(is_active),
        is_deleted: column_as_bool!(is_deleted),
        content_type: column_as_nullable_string!(content_type),
        content_hash: column_as_nullable_string!(content_hash),
        http_etag: column_as_nullable_string!(http_etag),
        http_last_modified: column_as_nullable_string!(http_last_modified),
        content_updated: column_as_nullable_number!(content_updated),
        last_publish: column_as_nullable_number!(last_publish),
        content_fetch_last_complete: column_as_nullable_number!(content_fetch_last_complete),
        content_fetch_next_attempt: column_as_nullable_number!(content_fetch_next_attempt),
        content_fetch_attempts_since_success: column_as_number!(
            content_fetch_attempts_since_success
        ),
    })
}

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, topic_id, callback, verified_at, expires_at, secret,
    signature_algorithm, latest_content_delivered,
    delivery_attempts_since_success, delivery_next_attempt
"#;

fn subscription_from_row(row: Vec<Column>) -> Result<Subscription, Error> {
    unpack_into!(
        let (
            id, topic_id, callback, verified_at, expires_at, secret,
            signature_algorithm, latest_content_delivered,
            delivery_attempts_since_success, delivery_next_attempt
        ) = row
    );

    Ok(Subscription {
        id: column_as_string!(id, Uuid::parse_str),
        topic_id: column_as_string!(topic_id, Uuid::parse_str),
        callback: column_as_string!(callback),
        verified_at: column_as_number!(verified_at),
        expires_at: column_as_number!(expires_at),
        secret: column_as_nullable_binary!(secret),
        signature_algorithm: column_as_string!(signature_algorithm, HashAlg::from_str),
        latest_content_delivered: column_as_nullable_number!(latest_content_delivered),
        delivery_attempts_since_success: column_as_number!(delivery_attempts_since_success),
        delivery_next_attempt: column_as_nullable_number!(delivery_next_attempt),
    })
}

const VERIFICATION_COLUMNS: &str = r#"
    id, topic_id, callback, mode, lease_seconds, secret, signature_algorithm,
    is_publisher_validated, reason, attempts, next_attempt, request_id
"#;

fn verification_from_row(row: Vec<Column>) -> Result<Verification, Error> {
    unpack_into!(
        let (
            id, topic_id, callback, mode, lease_seconds, secret, signature_algorithm,
            is_publisher_validated, reason, attempts, next_attempt, request_id
        ) = row
    );

    Ok(Verification {
        id: column_as_string!(id, Uuid::parse_str),
        topic_id: column_as_string!(topic_id, Uuid::parse_str),
        callback: column_as_string!(callback),
        mode: column_as_string!(mode, VerificationMode::from_str),
        lease_seconds: column_as_number!(lease_seconds),
        secret: column_as_nullable_binary!(secret),
        signature_algorithm: column_as_string!(signature_algorithm, HashAlg::from_str),
        is_publisher_validated: column_as_bool!(is_publisher_validated),
        reason: column_as_nullable_string!(reason),
        attempts: column_as_number!(attempts),
        next_attempt: column_as_number!(next_attempt),
        request_id: column_as_nullable_string!(request_id),
    })
}

fn ids_from_rows(rows: Vec<Vec<Column>>) -> Result<Vec<Uuid>, Error> {
    rows.into_iter()
        .map(|row| {
            unpack_into!(let (id) = row);
            Ok(column_as_string!(id, Uuid::parse_str))
        })
        .collect()
}

#[async_trait]
impl<C> HubDatabase for SQLHubDatabase<C>
where
    C: DatabaseConnector,
{
    async fn begin(&self) -> Result<Box<dyn HubTransaction + Send + Sync>, Error> {
        Ok(Box::new(SQLHubTransaction {
            inner: self.db.begin().await?,
        }))
    }

    async fn ping(&self) -> Result<(), Error> {
        query(r#"SELECT 1"#)?.pluck(&self.db).await?;
        Ok(())
    }

    async fn get_topic(&self, topic_id: &Uuid) -> Result<Option<Topic>, Error> {
        query(&format!(
            r#"SELECT {TOPIC_COLUMNS} FROM topic WHERE id = :id"#
        ))?
        .bind("id", topic_id.to_string())
        .fetch_one(&self.db)
        .await?
        .map(topic_from_row)
        .transpose()
    }

    async fn get_topic_by_url(&self, url: &str) -> Result<Option<Topic>, Error> {
        query(&format!(
            r#"SELECT {TOPIC_COLUMNS} FROM topic WHERE url = :url"#
        ))?
        .bind("url", url)
        .fetch_one(&self.db)
        .await?
        .map(topic_from_row)
        .transpose()
    }

    async fn get_topic_content(&self, topic_id: &Uuid) -> Result<Option<TopicContent>, Error> {
        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(topic_id)) {
            return Ok(Some(cached));
        }

        let row = query(
            r#"
            SELECT id, content, content_type, content_hash, content_updated
            FROM topic
            WHERE id = :id
            "#,
        )?
        .bind("id", topic_id.to_string())
        .fetch_one(&self.db)
        .await?;

        let content = row
            .map(|row| {
                unpack_into!(let (id, content, content_type, content_hash, content_updated) = row);
                Ok::<_, Error>(TopicContent {
                    topic_id: column_as_string!(id, Uuid::parse_str),
                    content: column_as_nullable_binary!(content).unwrap_or_default(),
                    content_type: column_as_nullable_string!(content_type),
                    content_hash: column_as_nullable_string!(content_hash),
                    content_updated: column_as_nullable_number!(content_updated),
                })
            })
            .transpose()?;

        if let (Some(cache), Some(content)) = (self.cache.as_ref(), content.as_ref()) {
            cache.insert(*topic_id, content.clone());
        }

        Ok(content)
    }

    async fn get_topic_content_history(
        &self,
        topic_id: &Uuid,
    ) -> Result<Vec<TopicContentHistory>, Error> {
        query(
            r#"
            SELECT topic_id, content_updated, content_size, content_hash
            FROM topic_content_history
            WHERE topic_id = :topic_id
            ORDER BY content_updated DESC
            "#,
        )?
        .bind("topic_id", topic_id.to_string())
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .map(|row| {
            unpack_into!(let (topic_id, content_updated, content_size, content_hash) = row);
            Ok(TopicContentHistory {
                topic_id: column_as_string!(topic_id, Uuid::parse_str),
                content_updated: column_as_number!(content_updated),
                content_size: column_as_number!(content_size),
                content_hash: column_as_string!(content_hash),
            })
        })
        .collect()
    }

    async fn get_subscription(
        &self,
        subscription_id: &Uuid,
    ) -> Result<Option<Subscription>, Error> {
        query(&format!(
            r#"SELECT {SUBSCRIPTION_COLUMNS} FROM subscription WHERE id = :id"#
        ))?
        .bind("id", subscription_id.to_string())
        .fetch_one(&self.db)
        .await?
        .map(subscription_from_row)
        .transpose()
    }

    async fn get_subscription_by_callback(
        &self,
        topic_id: &Uuid,
        callback: &str,
    ) -> Result<Option<Subscription>, Error> {
        query(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS} FROM subscription
            WHERE topic_id = :topic_id AND callback = :callback
            "#
        ))?
        .bind("topic_id", topic_id.to_string())
        .bind("callback", callback)
        .fetch_one(&self.db)
        .await?
        .map(subscription_from_row)
        .transpose()
    }

    async fn subscription_count(&self, topic_id: &Uuid) -> Result<u64, Error> {
        let count = query(r#"SELECT COUNT(*) FROM subscription WHERE topic_id = :topic_id"#)?
            .bind("topic_id", topic_id.to_string())
            .pluck(&self.db)
            .await?
            .ok_or(Error::InvalidDbResponse)?;

        Ok(column_as_number!(count))
    }

    async fn get_verification(
        &self,
        verification_id: &Uuid,
    ) -> Result<Option<Verification>, Error> {
        query(&format!(
            r#"SELECT {VERIFICATION_COLUMNS} FROM verification WHERE id = :id"#
        ))?
        .bind("id", verification_id.to_string())
        .fetch_one(&self.db)
        .await?
        .map(verification_from_row)
        .transpose()
    }

    #[instrument(skip(self))]
    async fn topic_fetch_claim(
        &self,
        wanted: usize,
        lease_seconds: u64,
        claimant: &Uuid,
    ) -> Result<Vec<Uuid>, Error> {
        let now = unix_time();
        let rows = query(
            r#"
            UPDATE topic
            SET claimant = :claimant, claim_expires = :claim_expires
            WHERE id IN (
                SELECT id FROM topic
                WHERE is_deleted = FALSE
                  AND (claimant IS NULL OR claim_expires <= :now)
                  AND (
                    (last_publish IS NOT NULL
                     AND content_fetch_attempts_since_success = 0
                     AND (content_fetch_last_complete IS NULL
                          OR last_publish > content_fetch_last_complete))
                    OR (content_fetch_next_attempt IS NOT NULL
                        AND content_fetch_next_attempt <= :now)
                  )
                ORDER BY content_fetch_next_attempt
                LIMIT :wanted
            )
            AND (claimant IS NULL OR claim_expires <= :now)
            RETURNING id
            "#,
        )?
        .bind("claimant", claimant.to_string())
        .bind("claim_expires", now + lease_seconds)
        .bind("now", now)
        .bind("wanted", wanted)
        .fetch_all(&self.db)
        .await?;

        ids_from_rows(rows)
    }

    async fn topic_fetch_claim_by_id(
        &self,
        topic_id: &Uuid,
        lease_seconds: u64,
        claimant: &Uuid,
    ) -> Result<bool, Error> {
        let now = unix_time();
        let rows = query(
            r#"
            UPDATE topic
            SET claimant = :claimant, claim_expires = :claim_expires
            WHERE id = :id
              AND is_deleted = FALSE
              AND (claimant IS NULL OR claim_expires <= :now)
              AND (
                (last_publish IS NOT NULL
                 AND content_fetch_attempts_since_success = 0
                 AND (content_fetch_last_complete IS NULL
                      OR last_publish > content_fetch_last_complete))
                OR (content_fetch_next_attempt IS NOT NULL
                    AND content_fetch_next_attempt <= :now)
              )
            RETURNING id
            "#,
        )?
        .bind("id", topic_id.to_string())
        .bind("claimant", claimant.to_string())
        .bind("claim_expires", now + lease_seconds)
        .bind("now", now)
        .fetch_all(&self.db)
        .await?;

        Ok(!rows.is_empty())
    }

    #[instrument(skip(self))]
    async fn verification_claim(
        &self,
        wanted: usize,
        lease_seconds: u64,
        claimant: &Uuid,
    ) -> Result<Vec<Uuid>, Error> {
        let now = unix_time();
        let rows = query(
            r#"
            UPDATE verification
            SET claimant = :claimant, claim_expires = :claim_expires
            WHERE id IN (
                SELECT v.id FROM verification v
                JOIN topic t ON t.id = v.topic_id
                WHERE t.is_active = TRUE
                  AND v.next_attempt <= :now
                  AND (v.claimant IS NULL OR v.claim_expires <= :now)
                  AND v.id = (
                    SELECT v2.id FROM verification v2
                    WHERE v2.topic_id = v.topic_id AND v2.callback = v.callback
                      AND (v2.claimant IS NULL OR v2.claim_expires <= :now)
                    ORDER BY v2.next_attempt, v2.id
                    LIMIT 1
                  )
                  AND NOT EXISTS (
                    SELECT 1 FROM verification v3
                    WHERE v3.topic_id = v.topic_id AND v3.callback = v.callback
                      AND v3.id <> v.id
                      AND v3.claimant IS NOT NULL AND v3.claim_expires > :now
                  )
                ORDER BY v.next_attempt
                LIMIT :wanted
            )
            AND (claimant IS NULL OR claim_expires <= :now)
            RETURNING id
            "#,
        )?
        .bind("claimant", claimant.to_string())
        .bind("claim_expires", now + lease_seconds)
        .bind("now", now)
        .bind("wanted", wanted)
        .fetch_all(&self.db)
        .await?;

        ids_from_rows(rows)
    }

    async fn verification_claim_by_id(
        &self,
        verification_id: &Uuid,
        lease_seconds: u64,
        claimant: &Uuid,
    ) -> Result<bool, Error> {
        let now = unix_time();
        let rows = query(
            r#"
            UPDATE verification
            SET claimant = :claimant, claim_expires = :claim_expires
            WHERE id = :id
              AND next_attempt <= :now
              AND (claimant IS NULL OR claim_expires <= :now)
              AND EXISTS (
                SELECT 1 FROM topic t
                WHERE t.id = verification.topic_id AND t.is_active = TRUE
              )
              AND NOT EXISTS (
                SELECT 1 FROM verification v3
                WHERE v3.topic_id = verification.topic_id
                  AND v3.callback = verification.callback
                  AND v3.id <> verification.id
                  AND v3.claimant IS NOT NULL AND v3.claim_expires > :now
              )
            RETURNING id
            "#,
        )?
        .bind("id", verification_id.to_string())
        .bind("claimant", claimant.to_string())
        .bind("claim_expires", now + lease_seconds)
        .bind("now", now)
        .fetch_all(&self.db)
        .await?;

        Ok(!rows.is_empty())
    }

    #[instrument(skip(self))]
    async fn subscription_delivery_claim(
        &self,
        wanted: usize,
        lease_seconds: u64,
        claimant: &Uuid,
    ) -> Result<Vec<Uuid>, Error> {
        let now = unix_time();
        let rows = query(
            r#"
            UPDATE subscription
            SET claimant = :claimant, claim_expires = :claim_expires
            WHERE id IN (
                SELECT s.id FROM subscription s
                JOIN topic t ON t.id = s.topic_id
                WHERE s.expires_at > :now
                  AND t.content_updated IS NOT NULL
                  AND (s.latest_content_delivered IS NULL
                       OR s.latest_content_delivered < t.content_updated)
                  AND (s.delivery_next_attempt IS NULL OR s.delivery_next_attempt <= :now)
                  AND (s.claimant IS NULL OR s.claim_expires <= :now)
                ORDER BY s.delivery_next_attempt
                LIMIT :wanted
            )
            AND (claimant IS NULL OR claim_expires <= :now)
            RETURNING id
            "#,
        )?
        .bind("claimant", claimant.to_string())
        .bind("claim_expires", now + lease_seconds)
        .bind("now", now)
        .bind("wanted", wanted)
        .fetch_all(&self.db)
        .await?;

        ids_from_rows(rows)
    }

    async fn subscription_delivery_claim_by_id(
        &self,
        subscription_id: &Uuid,
        lease_seconds: u64,
        claimant: &Uuid,
    ) -> Result<bool, Error> {
        let now = unix_time();
        let rows = query(
            r#"
            UPDATE subscription
            SET claimant = :claimant, claim_expires = :claim_expires
            WHERE id = :id
              AND expires_at > :now
              AND (delivery_next_attempt IS NULL OR delivery_next_attempt <= :now)
              AND (claimant IS NULL OR claim_expires <= :now)
              AND EXISTS (
                SELECT 1 FROM topic t
                WHERE t.id = subscription.topic_id
                  AND t.content_updated IS NOT NULL
                  AND (subscription.latest_content_delivered IS NULL
                       OR subscription.latest_content_delivered < t.content_updated)
              )
            RETURNING id
            "#,
        )?
        .bind("id", subscription_id.to_string())
        .bind("claimant", claimant.to_string())
        .bind("claim_expires", now + lease_seconds)
        .bind("now", now)
        .fetch_all(&self.db)
        .await?;

        Ok(!rows.is_empty())
    }
}

impl<T> SQLHubTransaction<T>
where
    T: DatabaseTransaction,
{
    /// Read a claim-guarded attempt counter, or fail with `ClaimLost`
    async fn claimed_attempts(
        &self,
        sql: &str,
        row_id: &Uuid,
        claimant: &Uuid,
    ) -> Result<u32, Error> {
        let row = query(sql)?
            .bind("id", row_id.to_string())
            .bind("claimant", claimant.to_string())
            .fetch_one(&self.inner)
            .await?
            .ok_or(Error::ClaimLost)?;

        unpack_into!(let (attempts) = row);
        Ok(column_as_number!(attempts))
    }

    /// Bumped `content_updated` for a topic: strictly monotonic even when
    /// several changes land within one second, so delivered-version
    /// comparisons never miss an update.
    async fn next_content_updated(
        &self,
        topic_id: &Uuid,
        claimant: &Uuid,
        now: u64,
    ) -> Result<u64, Error> {
        let row = query(
            r#"SELECT content_updated FROM topic WHERE id = :id AND claimant = :claimant"#,
        )?
        .bind("id", topic_id.to_string())
        .bind("claimant", claimant.to_string())
        .fetch_one(&self.inner)
        .await?
        .ok_or(Error::ClaimLost)?;

        unpack_into!(let (content_updated) = row);
        let previous: Option<u64> = column_as_nullable_number!(content_updated);
        Ok(previous.map_or(now, |p| now.max(p + 1)))
    }

    async fn notify_topic_changed(&self, topic_id: &Uuid) -> Result<(), Error> {
        // NOTIFY is a postgres concept; it fires on commit, which is exactly
        // when cache entries for this topic become stale.
        if T::name() == "postgres" {
            query(r#"SELECT pg_notify('topic_changed', :payload)"#)?
                .bind("payload", topic_id.to_string())
                .pluck(&self.inner)
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl<T> HubTransaction for SQLHubTransaction<T>
where
    T: DatabaseTransaction,
{
    async fn add_topic(&mut self, topic: TopicCreate) -> Result<Uuid, Error> {
        if !(topic.lease_seconds_min <= topic.lease_seconds_preferred
            && topic.lease_seconds_preferred <= topic.lease_seconds_max)
        {
            return Err(Error::Invalid(format!(
                "Lease bounds out of order: {} <= {} <= {} does not hold",
                topic.lease_seconds_min, topic.lease_seconds_preferred, topic.lease_seconds_max
            )));
        }

        query(
            r#"
            INSERT INTO topic (
                id, url, lease_seconds_preferred, lease_seconds_min,
                lease_seconds_max, publisher_validation_url,
                content_hash_algorithm, is_active, is_deleted,
                content_fetch_attempts_since_success
            )
            VALUES (
                :id, :url, :lease_seconds_preferred, :lease_seconds_min,
                :lease_seconds_max, :publisher_validation_url,
                :content_hash_algorithm, FALSE, FALSE, 0
            )
            ON CONFLICT (url) DO NOTHING
            "#,
        )?
        .bind("id", Uuid::new_v4().to_string())
        .bind("url", topic.url.as_str())
        .bind("lease_seconds_preferred", topic.lease_seconds_preferred)
        .bind("lease_seconds_min", topic.lease_seconds_min)
        .bind("lease_seconds_max", topic.lease_seconds_max)
        .bind("publisher_validation_url", topic.publisher_validation_url)
        .bind(
            "content_hash_algorithm",
            topic.content_hash_algorithm.to_string(),
        )
        .execute(&self.inner)
        .await?;

        let id = query(r#"SELECT id FROM topic WHERE url = :url"#)?
            .bind("url", topic.url.as_str())
            .pluck(&self.inner)
            .await?
            .ok_or(Error::InvalidDbResponse)?;

        Ok(column_as_string!(id, Uuid::parse_str))
    }

    async fn topic_publish_received(&mut self, topic_id: &Uuid, now: u64) -> Result<(), Error> {
        // The next-attempt stamp makes the publish visible to claim scans
        // even when it lands in the same second a fetch just completed in.
        let affected = query(
            r#"
            UPDATE topic
            SET last_publish = :now, content_fetch_next_attempt = :now
            WHERE id = :id
            "#,
        )?
        .bind("id", topic_id.to_string())
        .bind("now", now)
        .execute(&self.inner)
        .await?;

        if affected == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }

    async fn set_topic_deleted(&mut self, topic_id: &Uuid) -> Result<(), Error> {
        let affected = query(r#"UPDATE topic SET is_deleted = TRUE WHERE id = :id"#)?
            .bind("id", topic_id.to_string())
            .execute(&self.inner)
            .await?;

        if affected == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }

    async fn topic_pending_delete(&mut self, topic_id: &Uuid) -> Result<bool, Error> {
        let affected = query(
            r#"
            DELETE FROM topic
            WHERE id = :id
              AND is_deleted = TRUE
              AND NOT EXISTS (
                SELECT 1 FROM subscription WHERE topic_id = :id
              )
            "#,
        )?
        .bind("id", topic_id.to_string())
        .execute(&self.inner)
        .await?;

        Ok(affected > 0)
    }

    async fn topic_content_update(
        &mut self,
        topic_id: &Uuid,
        claimant: &Uuid,
        update: TopicContentUpdate,
    ) -> Result<(), Error> {
        let now = unix_time();
        let content_updated = self.next_content_updated(topic_id, claimant, now).await?;
        let content_size = update.content.len() as u64;

        let affected = query(
            r#"
            UPDATE topic SET
                content = :content,
                content_type = :content_type,
                content_hash = :content_hash,
                http_etag = :http_etag,
                http_last_modified = :http_last_modified,
                content_updated = :content_updated,
                is_active = TRUE,
                content_fetch_attempts_since_success = 0,
                content_fetch_last_complete = :now,
                content_fetch_next_attempt = NULL,
                claimant = NULL,
                claim_expires = NULL
            WHERE id = :id AND claimant = :claimant
            "#,
        )?
        .bind("id", topic_id.to_string())
        .bind("claimant", claimant.to_string())
        .bind("content", update.content)
        .bind("content_type", update.content_type)
        .bind("content_hash", update.content_hash.as_str())
        .bind("http_etag", update.http_etag)
        .bind("http_last_modified", update.http_last_modified)
        .bind("content_updated", content_updated)
        .bind("now", now)
        .execute(&self.inner)
        .await?;

        if affected == 0 {
            return Err(Error::ClaimLost);
        }

        query(
            r#"
            INSERT INTO topic_content_history
                (topic_id, content_updated, content_size, content_hash)
            VALUES (:topic_id, :content_updated, :content_size, :content_hash)
            "#,
        )?
        .bind("topic_id", topic_id.to_string())
        .bind("content_updated", content_updated)
        .bind("content_size", content_size)
        .bind("content_hash", update.content_hash)
        .execute(&self.inner)
        .await?;

        self.notify_topic_changed(topic_id).await
    }

    async fn topic_delisted(&mut self, topic_id: &Uuid, claimant: &Uuid) -> Result<(), Error> {
        let now = unix_time();
        let content_updated = self.next_content_updated(topic_id, claimant, now).await?;

        let affected = query(
            r#"
            UPDATE topic SET
                is_deleted = TRUE,
                content_updated = :content_updated,
                content_fetch_attempts_since_success = 0,
                content_fetch_last_complete = :now,
                content_fetch_next_attempt = NULL,
                claimant = NULL,
                claim_expires = NULL
            WHERE id = :id AND claimant = :claimant
            "#,
        )?
        .bind("id", topic_id.to_string())
        .bind("claimant", claimant.to_string())
        .bind("content_updated", content_updated)
        .bind("now", now)
        .execute(&self.inner)
        .await?;

        if affected == 0 {
            return Err(Error::ClaimLost);
        }

        self.notify_topic_changed(topic_id).await
    }

    async fn topic_fetch_complete(
        &mut self,
        topic_id: &Uuid,
        claimant: &Uuid,
    ) -> Result<(), Error> {
        let affected = query(
            r#"
            UPDATE topic SET
                content_fetch_attempts_since_success = 0,
                content_fetch_last_complete = :now,
                content_fetch_next_attempt = NULL,
                claimant = NULL,
                claim_expires = NULL
            WHERE id = :id AND claimant = :claimant
            "#,
        )?
        .bind("id", topic_id.to_string())
        .bind("claimant", claimant.to_string())
        .bind("now", unix_time())
        .execute(&self.inner)
        .await?;

        if affected == 0 {
            return Err(Error::ClaimLost);
        }

        Ok(())
    }

    async fn topic_fetch_incomplete(
        &mut self,
        topic_id: &Uuid,
        claimant: &Uuid,
        retry_delays: &[u64],
    ) -> Result<(), Error> {
        let attempts = self
            .claimed_attempts(
                r#"
                SELECT content_fetch_attempts_since_success FROM topic
                WHERE id = :id AND claimant = :claimant
                "#,
                topic_id,
                claimant,
            )
            .await?
            + 1;

        let next_attempt =
            unix_time() + attempt_retry_seconds(attempts, retry_delays, DEFAULT_JITTER);

        query(
            r#"
            UPDATE topic SET
                content_fetch_attempts_since_success = :attempts,
                content_fetch_next_attempt = :next_attempt,
                claimant = NULL,
                claim_expires = NULL
            WHERE id = :id AND claimant = :claimant
            "#,
        )?
        .bind("id", topic_id.to_string())
        .bind("claimant", claimant.to_string())
        .bind("attempts", attempts)
        .bind("next_attempt", next_attempt)
        .execute(&self.inner)
        .await?;

        Ok(())
    }

    async fn delete_expired_subscriptions(
        &mut self,
        topic_id: &Uuid,
        now: u64,
    ) -> Result<u64, Error> {
        let affected = query(
            r#"DELETE FROM subscription WHERE topic_id = :topic_id AND expires_at < :now"#,
        )?
        .bind("topic_id", topic_id.to_string())
        .bind("now", now)
        .execute(&self.inner)
        .await?;

        Ok(affected as u64)
    }

    async fn upsert_subscription(
        &mut self,
        subscription: SubscriptionUpsert,
    ) -> Result<(), Error> {
        if let Some(secret) = subscription.secret.as_ref() {
            if secret.len() > MAX_SECRET_BYTES {
                return Err(Error::Invalid(format!(
                    "Secret exceeds {MAX_SECRET_BYTES} bytes"
                )));
            }
        }

        let expires_at = subscription.expires_at();

        query(
            r#"
            INSERT INTO subscription (
                id, topic_id, callback, verified_at, expires_at, secret,
                signature_algorithm, delivery_attempts_since_success
            )
            VALUES (
                :id, :topic_id, :callback, :verified_at, :expires_at, :secret,
                :signature_algorithm, 0
            )
            ON CONFLICT (callback, topic_id) DO UPDATE SET
                verified_at = excluded.verified_at,
                expires_at = excluded.expires_at,
                secret = excluded.secret,
                signature_algorithm = excluded.signature_algorithm
            "#,
        )?
        .bind("id", Uuid::new_v4().to_string())
        .bind("topic_id", subscription.topic_id.to_string())
        .bind("callback", subscription.callback.as_str())
        .bind("verified_at", subscription.verified_at)
        .bind("expires_at", expires_at)
        .bind("secret", subscription.secret)
        .bind(
            "signature_algorithm",
            subscription.signature_algorithm.to_string(),
        )
        .execute(&self.inner)
        .await?;

        Ok(())
    }

    async fn delete_subscription(
        &mut self,
        topic_id: &Uuid,
        callback: &str,
    ) -> Result<bool, Error> {
        let affected = query(
            r#"DELETE FROM subscription WHERE topic_id = :topic_id AND callback = :callback"#,
        )?
        .bind("topic_id", topic_id.to_string())
        .bind("callback", callback)
        .execute(&self.inner)
        .await?;

        Ok(affected > 0)
    }

    async fn subscription_delivery_complete(
        &mut self,
        subscription_id: &Uuid,
        claimant: &Uuid,
        content_updated: u64,
    ) -> Result<(), Error> {
        let affected = query(
            r#"
            UPDATE subscription SET
                latest_content_delivered = :content_updated,
                delivery_attempts_since_success = 0,
                delivery_next_attempt = NULL,
                claimant = NULL,
                claim_expires = NULL
            WHERE id = :id AND claimant = :claimant
            "#,
        )?
        .bind("id", subscription_id.to_string())
        .bind("claimant", claimant.to_string())
        .bind("content_updated", content_updated)
        .execute(&self.inner)
        .await?;

        if affected == 0 {
            return Err(Error::ClaimLost);
        }

        Ok(())
    }

    async fn subscription_delivery_gone(&mut self, subscription_id: &Uuid) -> Result<(), Error> {
        query(r#"DELETE FROM subscription WHERE id = :id"#)?
            .bind("id", subscription_id.to_string())
            .execute(&self.inner)
            .await?;

        Ok(())
    }

    async fn subscription_delivery_incomplete(
        &mut self,
        subscription_id: &Uuid,
        claimant: &Uuid,
        retry_delays: &[u64],
    ) -> Result<(), Error> {
        let attempts = self
            .claimed_attempts(
                r#"
                SELECT delivery_attempts_since_success FROM subscription
                WHERE id = :id AND claimant = :claimant
                "#,
                subscription_id,
                claimant,
            )
            .await?
            + 1;

        let next_attempt =
            unix_time() + attempt_retry_seconds(attempts, retry_delays, DEFAULT_JITTER);

        query(
            r#"
            UPDATE subscription SET
                delivery_attempts_since_success = :attempts,
                delivery_next_attempt = :next_attempt,
                claimant = NULL,
                claim_expires = NULL
            WHERE id = :id AND claimant = :claimant
            "#,
        )?
        .bind("id", subscription_id.to_string())
        .bind("claimant", claimant.to_string())
        .bind("attempts", attempts)
        .bind("next_attempt", next_attempt)
        .execute(&self.inner)
        .await?;

        Ok(())
    }

    async fn add_verification(
        &mut self,
        verification: VerificationCreate,
    ) -> Result<Uuid, Error> {
        if let Some(secret) = verification.secret.as_ref() {
            if secret.len() > MAX_SECRET_BYTES {
                return Err(Error::Invalid(format!(
                    "Secret exceeds {MAX_SECRET_BYTES} bytes"
                )));
            }
        }

        let id = Uuid::new_v4();
        query(
            r#"
            INSERT INTO verification (
                id, topic_id, callback, mode, lease_seconds, secret,
                signature_algorithm, is_publisher_validated, reason,
                attempts, next_attempt, request_id
            )
            VALUES (
                :id, :topic_id, :callback, :mode, :lease_seconds, :secret,
                :signature_algorithm, :is_publisher_validated, :reason,
                0, :next_attempt, :request_id
            )
            "#,
        )?
        .bind("id", id.to_string())
        .bind("topic_id", verification.topic_id.to_string())
        .bind("callback", verification.callback.as_str())
        .bind("mode", verification.mode.to_string())
        .bind("lease_seconds", verification.lease_seconds)
        .bind("secret", verification.secret)
        .bind(
            "signature_algorithm",
            verification.signature_algorithm.to_string(),
        )
        .bind("is_publisher_validated", verification.is_publisher_validated)
        .bind("reason", verification.reason)
        .bind("next_attempt", unix_time())
        .bind("request_id", verification.request_id)
        .execute(&self.inner)
        .await?;

        Ok(id)
    }

    async fn verification_update(
        &mut self,
        verification_id: &Uuid,
        mode: VerificationMode,
        reason: Option<String>,
        is_publisher_validated: bool,
    ) -> Result<(), Error> {
        let affected = query(
            r#"
            UPDATE verification SET
                mode = :mode,
                reason = :reason,
                is_publisher_validated = :is_publisher_validated
            WHERE id = :id
            "#,
        )?
        .bind("id", verification_id.to_string())
        .bind("mode", mode.to_string())
        .bind("reason", reason)
        .bind("is_publisher_validated", is_publisher_validated)
        .execute(&self.inner)
        .await?;

        if affected == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }

    async fn verification_complete(
        &mut self,
        topic_id: &Uuid,
        callback: &str,
    ) -> Result<(), Error> {
        query(
            r#"DELETE FROM verification WHERE topic_id = :topic_id AND callback = :callback"#,
        )?
        .bind("topic_id", topic_id.to_string())
        .bind("callback", callback)
        .execute(&self.inner)
        .await?;

        Ok(())
    }

    async fn verification_incomplete(
        &mut self,
        verification_id: &Uuid,
        claimant: &Uuid,
        retry_delays: &[u64],
    ) -> Result<(), Error> {
        let attempts = self
            .claimed_attempts(
                r#"
                SELECT attempts FROM verification
                WHERE id = :id AND claimant = :claimant
                "#,
                verification_id,
                claimant,
            )
            .await?
            + 1;

        let next_attempt =
            unix_time() + attempt_retry_seconds(attempts, retry_delays, DEFAULT_JITTER);

        query(
            r#"
            UPDATE verification SET
                attempts = :attempts,
                next_attempt = :next_attempt,
                claimant = NULL,
                claim_expires = NULL
            WHERE id = :id AND claimant = :claimant
            "#,
        )?
        .bind("id", verification_id.to_string())
        .bind("claimant", claimant.to_string())
        .bind("attempts", attempts)
        .bind("next_attempt", next_attempt)
        .execute(&self.inner)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        let Self { inner } = *self;
        inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), Error> {
        let Self { inner } = *self;
        inner.rollback().await
    }
}
