// src/timeuuid.rs

use std::cmp::Ordering;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::{Context, Timestamp, Uuid};

/// Process-wide clock-sequence context plus a random node id.
///
/// Message ids, queue-message ids and shard pointers are all type-1
/// (time-ordered) UUIDs; the context disambiguates ids minted within
/// the same 100ns tick.
fn context() -> &'static Context {
    static CONTEXT: OnceLock<Context> = OnceLock::new();
    CONTEXT.get_or_init(|| Context::new(rand::random::<u16>()))
}

fn node_id() -> &'static [u8; 6] {
    static NODE_ID: OnceLock<[u8; 6]> = OnceLock::new();
    NODE_ID.get_or_init(rand::random::<[u8; 6]>)
}

/// Wall clock as ms since the unix epoch.
pub fn now_unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Mint a time-UUID stamped "now" (full nanosecond wall clock).
pub fn now() -> Uuid {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ts = Timestamp::from_unix(
        context(),
        since_epoch.as_secs(),
        since_epoch.subsec_nanos(),
    );
    Uuid::new_v1(ts, node_id())
}

/// Mint a time-UUID stamped at an explicit ms-epoch instant.
///
/// Used for delayed delivery: a pointer stamped in the future sorts
/// after everything visible now and is skipped by the available scan
/// until its instant passes.
pub fn at_unix_millis(ms: i64) -> Uuid {
    let ms = ms.max(0) as u64;
    let secs = ms / 1000;
    let nanos = ((ms % 1000) * 1_000_000) as u32;
    let ts = Timestamp::from_unix(context(), secs, nanos);
    Uuid::new_v1(ts, node_id())
}

/// Extract the embedded instant as ms since the unix epoch.
///
/// Returns None for UUIDs that carry no timestamp (e.g. type-4).
pub fn unix_millis(uuid: &Uuid) -> Option<i64> {
    uuid.get_timestamp().map(|ts| {
        let (secs, nanos) = ts.to_unix();
        secs as i64 * 1000 + (nanos / 1_000_000) as i64
    })
}

/// Extract the embedded instant at 100ns tick resolution.
///
/// Ticks are the basis both for time-ordering and for shard ids.
pub fn ticks(uuid: &Uuid) -> Option<u64> {
    uuid.get_timestamp().map(|ts| {
        let (secs, nanos) = ts.to_unix();
        secs * 10_000_000 + (nanos / 100) as u64
    })
}

/// True if the UUID is time-ordered (type-1).
pub fn is_time_uuid(uuid: &Uuid) -> bool {
    uuid.get_timestamp().is_some()
}

/// Compare the way a `timeuuid` clustering column sorts: embedded
/// timestamp first, raw bytes as tiebreaker. Plain byte order on a
/// type-1 UUID is NOT time order (time_low leads), so every ordered
/// container in the crate goes through this. UUIDs without a timestamp
/// sort as tick zero, which keeps the order total.
pub fn cmp(a: &Uuid, b: &Uuid) -> Ordering {
    (ticks(a).unwrap_or(0), a.as_bytes()).cmp(&(ticks(b).unwrap_or(0), b.as_bytes()))
}

/// Newtype key for BTreeMap-backed partitions; orders like a
/// `timeuuid` clustering column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOrdered(pub Uuid);

impl Ord for TimeOrdered {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp(&self.0, &other.0)
    }
}

impl PartialOrd for TimeOrdered {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
