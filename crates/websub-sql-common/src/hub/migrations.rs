//! Schema migrations
//!
//! Kept as plain SQL understood by both supported drivers. Versions are
//! `(major, minor, patch)` tuples recorded in `_meta_schema_version`.

/// One migration: target version plus the batch that produces it
pub type Migration = ((u16, u16, u16), &'static str);

/// Oldest schema this build can still open
pub const SCHEMA_MIN: (u16, u16, u16) = (1, 0, 0);

/// Schema version this build produces
pub const SCHEMA_MAX: (u16, u16, u16) = (1, 0, 4);

/// All migrations, in version order
pub const MIGRATIONS: &[Migration] = &[
    ((1, 0, 0), r#"
CREATE TABLE topic (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL UNIQUE,
    lease_seconds_preferred BIGINT NOT NULL,
    lease_seconds_min BIGINT NOT NULL,
    lease_seconds_max BIGINT NOT NULL,
    publisher_validation_url TEXT,
    content_hash_algorithm TEXT NOT NULL DEFAULT 'sha512',
    is_active BOOL NOT NULL DEFAULT FALSE,
    is_deleted BOOL NOT NULL DEFAULT FALSE,
    content BYTEA,
    content_type TEXT,
    content_hash TEXT,
    http_etag TEXT,
    http_last_modified TEXT,
    content_updated BIGINT,
    last_publish BIGINT,
    content_fetch_next_attempt BIGINT,
    content_fetch_attempts_since_success BIGINT NOT NULL DEFAULT 0,
    claimant TEXT,
    claim_expires BIGINT
);

CREATE TABLE subscription (
    id TEXT PRIMARY KEY,
    topic_id TEXT NOT NULL REFERENCES topic(id) ON DELETE CASCADE,
    callback TEXT NOT NULL,
    verified_at BIGINT NOT NULL,
    expires_at BIGINT NOT NULL,
    secret BYTEA,
    signature_algorithm TEXT NOT NULL DEFAULT 'sha512',
    latest_content_delivered BIGINT,
    delivery_attempts_since_success BIGINT NOT NULL DEFAULT 0,
    delivery_next_attempt BIGINT,
    claimant TEXT,
    claim_expires BIGINT,
    UNIQUE (callback, topic_id)
);

CREATE INDEX subscription_topic_id_index ON subscription(topic_id);
CREATE INDEX subscription_expires_at_index ON subscription(expires_at);

CREATE TABLE verification (
    id TEXT PRIMARY KEY,
    topic_id TEXT NOT NULL REFERENCES topic(id) ON DELETE CASCADE,
    callback TEXT NOT NULL,
    mode TEXT CHECK ( mode IN ('subscribe', 'unsubscribe', 'denied') ) NOT NULL,
    lease_seconds BIGINT NOT NULL,
    secret BYTEA,
    signature_algorithm TEXT NOT NULL DEFAULT 'sha512',
    is_publisher_validated BOOL NOT NULL DEFAULT FALSE,
    reason TEXT,
    attempts BIGINT NOT NULL DEFAULT 0,
    next_attempt BIGINT NOT NULL,
    claimant TEXT,
    claim_expires BIGINT
);

CREATE INDEX verification_topic_callback_index ON verification(topic_id, callback);
    "#),
    ((1, 0, 1), r#"
CREATE TABLE topic_content_history (
    topic_id TEXT NOT NULL REFERENCES topic(id) ON DELETE CASCADE,
    content_updated BIGINT NOT NULL,
    content_size BIGINT NOT NULL,
    content_hash TEXT NOT NULL
);

CREATE INDEX topic_content_history_topic_id_index ON topic_content_history(topic_id);
CREATE INDEX topic_content_history_content_updated_index ON topic_content_history(content_updated);
    "#),
    ((1, 0, 2), r#"
ALTER TABLE verification ADD COLUMN request_id TEXT;
    "#),
    ((1, 0, 3), r#"
CREATE INDEX topic_content_fetch_next_attempt_index ON topic(content_fetch_next_attempt);
CREATE INDEX subscription_delivery_next_attempt_index ON subscription(delivery_next_attempt);
CREATE INDEX verification_next_attempt_index ON verification(next_attempt);
    "#),
    ((1, 0, 4), r#"
ALTER TABLE topic ADD COLUMN content_fetch_last_complete BIGINT;
    "#),
];
