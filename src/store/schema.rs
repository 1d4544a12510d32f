//! CQL schema and statements for the queue substrate.
//!
//! Partition layout:
//! - pointer tables partition on `(queue_name, region, shard_id)` and
//!   cluster ascending on the `queue_message_id` timeuuid, so a shard
//!   scan walks pointers in insertion-time order;
//! - `shards` and `shard_counters` partition on `(queue_name, region)`
//!   so queue teardown is a handful of partition deletes.

pub const DDL: &[&str] = &[
    r###"
    CREATE TABLE IF NOT EXISTS queues (
        queue_name text PRIMARY KEY,
        default_region text,
        regions list<text>,
        inflight_timeout_ms bigint,
        delivery_delay_ms bigint,
        created_at bigint
    )
    "###,
    r###"
    CREATE TABLE IF NOT EXISTS shards (
        queue_name text,
        region text,
        kind text,
        pointer timeuuid,
        shard_id bigint,
        PRIMARY KEY ((queue_name, region), kind, pointer)
    ) WITH CLUSTERING ORDER BY (kind ASC, pointer ASC)
    "###,
    r###"
    CREATE TABLE IF NOT EXISTS messages_available (
        queue_name text,
        region text,
        shard_id bigint,
        queue_message_id timeuuid,
        message_id uuid,
        queued_at bigint,
        inflight_at bigint,
        PRIMARY KEY ((queue_name, region, shard_id), queue_message_id)
    ) WITH CLUSTERING ORDER BY (queue_message_id ASC)
    "###,
    r###"
    CREATE TABLE IF NOT EXISTS messages_inflight (
        queue_name text,
        region text,
        shard_id bigint,
        queue_message_id timeuuid,
        message_id uuid,
        queued_at bigint,
        inflight_at bigint,
        PRIMARY KEY ((queue_name, region, shard_id), queue_message_id)
    ) WITH CLUSTERING ORDER BY (queue_message_id ASC)
    "###,
    r###"
    CREATE TABLE IF NOT EXISTS message_data (
        message_id uuid PRIMARY KEY,
        content_type text,
        data blob
    )
    "###,
    r###"
    CREATE TABLE IF NOT EXISTS shard_counters (
        queue_name text,
        region text,
        kind text,
        shard_id bigint,
        counter_value counter,
        PRIMARY KEY ((queue_name, region), kind, shard_id)
    )
    "###,
    r###"
    CREATE TABLE IF NOT EXISTS audit_log (
        message_id uuid,
        recorded_at bigint,
        action text,
        queue_name text,
        status text,
        error text,
        PRIMARY KEY ((message_id), recorded_at, action)
    ) WITH CLUSTERING ORDER BY (recorded_at ASC, action ASC)
    "###,
];

// ---- queues

pub const INSERT_QUEUE: &str = r###"
    INSERT INTO queues (queue_name, default_region, regions, inflight_timeout_ms, delivery_delay_ms, created_at)
    VALUES (?, ?, ?, ?, ?, ?)
"###;

pub const SELECT_QUEUE: &str = r###"
    SELECT queue_name, default_region, regions, inflight_timeout_ms, delivery_delay_ms, created_at
    FROM queues
    WHERE queue_name = ?
"###;

pub const SELECT_QUEUES: &str = r###"
    SELECT queue_name, default_region, regions, inflight_timeout_ms, delivery_delay_ms, created_at
    FROM queues
"###;

pub const DELETE_QUEUE: &str = r###"
    DELETE FROM queues WHERE queue_name = ?
"###;

// ---- shards

pub const INSERT_SHARD: &str = r###"
    INSERT INTO shards (queue_name, region, kind, pointer, shard_id)
    VALUES (?, ?, ?, ?, ?)
"###;

pub const LIST_SHARDS: &str = r###"
    SELECT pointer, shard_id
    FROM shards
    WHERE queue_name = ? AND region = ? AND kind = ?
"###;

pub const DELETE_SHARDS: &str = r###"
    DELETE FROM shards WHERE queue_name = ? AND region = ?
"###;

// ---- pointers (one statement pair per table; kind picks the pair)

pub const INSERT_AVAILABLE: &str = r###"
    INSERT INTO messages_available (queue_name, region, shard_id, queue_message_id, message_id, queued_at, inflight_at)
    VALUES (?, ?, ?, ?, ?, ?, ?)
"###;

pub const INSERT_INFLIGHT: &str = r###"
    INSERT INTO messages_inflight (queue_name, region, shard_id, queue_message_id, message_id, queued_at, inflight_at)
    VALUES (?, ?, ?, ?, ?, ?, ?)
"###;

pub const SELECT_AVAILABLE: &str = r###"
    SELECT message_id, queued_at, inflight_at
    FROM messages_available
    WHERE queue_name = ? AND region = ? AND shard_id = ? AND queue_message_id = ?
"###;

pub const SELECT_INFLIGHT: &str = r###"
    SELECT message_id, queued_at, inflight_at
    FROM messages_inflight
    WHERE queue_name = ? AND region = ? AND shard_id = ? AND queue_message_id = ?
"###;

pub const DELETE_AVAILABLE: &str = r###"
    DELETE FROM messages_available
    WHERE queue_name = ? AND region = ? AND shard_id = ? AND queue_message_id = ?
"###;

pub const DELETE_INFLIGHT: &str = r###"
    DELETE FROM messages_inflight
    WHERE queue_name = ? AND region = ? AND shard_id = ? AND queue_message_id = ?
"###;

pub const SCAN_AVAILABLE: &str = r###"
    SELECT queue_message_id, message_id, queued_at, inflight_at
    FROM messages_available
    WHERE queue_name = ? AND region = ? AND shard_id = ?
    LIMIT ?
"###;

pub const SCAN_INFLIGHT: &str = r###"
    SELECT queue_message_id, message_id, queued_at, inflight_at
    FROM messages_inflight
    WHERE queue_name = ? AND region = ? AND shard_id = ?
    LIMIT ?
"###;

pub const SCAN_AVAILABLE_AFTER: &str = r###"
    SELECT queue_message_id, message_id, queued_at, inflight_at
    FROM messages_available
    WHERE queue_name = ? AND region = ? AND shard_id = ? AND queue_message_id > ?
    LIMIT ?
"###;

pub const SCAN_INFLIGHT_AFTER: &str = r###"
    SELECT queue_message_id, message_id, queued_at, inflight_at
    FROM messages_inflight
    WHERE queue_name = ? AND region = ? AND shard_id = ? AND queue_message_id > ?
    LIMIT ?
"###;

pub const DELETE_AVAILABLE_SHARD: &str = r###"
    DELETE FROM messages_available WHERE queue_name = ? AND region = ? AND shard_id = ?
"###;

pub const DELETE_INFLIGHT_SHARD: &str = r###"
    DELETE FROM messages_inflight WHERE queue_name = ? AND region = ? AND shard_id = ?
"###;

// ---- bodies

pub const INSERT_BODY: &str = r###"
    INSERT INTO message_data (message_id, content_type, data)
    VALUES (?, ?, ?)
"###;

pub const SELECT_BODY: &str = r###"
    SELECT content_type, data
    FROM message_data
    WHERE message_id = ?
"###;

pub const DELETE_BODY: &str = r###"
    DELETE FROM message_data WHERE message_id = ?
"###;

/// Token-range walk over all bodies, for the GC sweep.
pub const SCAN_BODIES: &str = r###"
    SELECT message_id, content_type, data
    FROM message_data
    LIMIT ?
"###;

pub const SCAN_BODIES_AFTER: &str = r###"
    SELECT message_id, content_type, data
    FROM message_data
    WHERE token(message_id) > token(?)
    LIMIT ?
"###;

// ---- counters

pub const UPDATE_COUNTER: &str = r###"
    UPDATE shard_counters
    SET counter_value = counter_value + ?
    WHERE queue_name = ? AND region = ? AND kind = ? AND shard_id = ?
"###;

pub const SELECT_COUNTER: &str = r###"
    SELECT counter_value
    FROM shard_counters
    WHERE queue_name = ? AND region = ? AND kind = ? AND shard_id = ?
"###;

pub const DELETE_COUNTERS: &str = r###"
    DELETE FROM shard_counters WHERE queue_name = ? AND region = ?
"###;

// ---- audit log

pub const INSERT_AUDIT: &str = r###"
    INSERT INTO audit_log (message_id, recorded_at, action, queue_name, status, error)
    VALUES (?, ?, ?, ?, ?, ?)
"###;

pub const SELECT_AUDIT: &str = r###"
    SELECT recorded_at, action, queue_name, status, error
    FROM audit_log
    WHERE message_id = ?
"###;
