pub mod counter;
pub mod strategy;

pub use counter::*;
pub use strategy::*;

use std::cmp::Ordering;

use uuid::Uuid;

use crate::timeuuid;

/// Which pointer family a shard belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShardKind {
    /// Pending-delivery pointers.
    Default,
    /// Leased pointers awaiting ack or timeout.
    Inflight,
}

impl ShardKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardKind::Default => "default",
            ShardKind::Inflight => "inflight",
        }
    }
}

/// One partition of pointers for a `(queue, region, kind)` family.
///
/// Shards are append-only: new shards are minted with a fresh time-UUID
/// pointer; old shards stay readable until torn down with the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub queue: String,
    pub region: String,
    pub kind: ShardKind,
    pub shard_id: i64,
    /// Time-UUID chosen at creation; defines the shard's position on
    /// the timeline and derives `shard_id`.
    pub pointer: Uuid,
}

impl Shard {
    pub fn new(queue: impl Into<String>, region: impl Into<String>, kind: ShardKind, pointer: Uuid) -> Self {
        Shard {
            queue: queue.into(),
            region: region.into(),
            kind,
            shard_id: shard_id_for(&pointer),
            pointer,
        }
    }

    pub fn counter_key(&self) -> CounterKey {
        CounterKey {
            queue: self.queue.clone(),
            region: self.region.clone(),
            kind: self.kind,
            shard_id: self.shard_id,
        }
    }
}

impl PartialOrd for Shard {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Within one `(queue, region, kind)` family shards sort by pointer,
/// i.e. by creation time.
impl Ord for Shard {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.queue, &self.region, self.kind)
            .cmp(&(&other.queue, &other.region, other.kind))
            .then_with(|| timeuuid::cmp(&self.pointer, &other.pointer))
    }
}

/// Derive the 64-bit shard id from the pointer's 100ns tick instant.
///
/// Two racing allocations in the same tick collapse into one partition,
/// which the read path tolerates (it scans every listed shard).
pub fn shard_id_for(pointer: &Uuid) -> i64 {
    timeuuid::ticks(pointer).unwrap_or(0) as i64
}

/// Accumulator / persistence key for one shard's message counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub queue: String,
    pub region: String,
    pub kind: ShardKind,
    pub shard_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeuuid;

    #[test]
    fn shards_sort_by_pointer_time() {
        let a = Shard::new("q", "us-east", ShardKind::Default, timeuuid::at_unix_millis(1_000));
        let b = Shard::new("q", "us-east", ShardKind::Default, timeuuid::at_unix_millis(2_000));
        assert!(a < b);
        assert_ne!(a.shard_id, b.shard_id);
    }

    #[test]
    fn shard_id_tracks_pointer_instant() {
        let pointer = timeuuid::at_unix_millis(5_000);
        let shard = Shard::new("q", "r", ShardKind::Inflight, pointer);
        // 5 seconds at 100ns resolution
        assert_eq!(shard.shard_id, 50_000_000);
    }
}
