use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;

/// Per-network cache of block timestamps so several logs from the same block
/// only cost one header lookup.
#[derive(Debug, Clone)]
pub struct BlockTimestampCache {
    entries: Cache<u64, DateTime<Utc>>,
}

impl BlockTimestampCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(600);
    pub const DEFAULT_CAPACITY: u64 = 4_096;

    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(capacity)
                .build(),
        }
    }

    pub fn get(&self, block_number: u64) -> Option<DateTime<Utc>> {
        self.entries.get(&block_number)
    }

    pub fn insert(&self, block_number: u64, timestamp: DateTime<Utc>) {
        self.entries.insert(block_number, timestamp);
    }
}

impl Default for BlockTimestampCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembers_inserted_timestamps() {
        let cache = BlockTimestampCache::default();
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(cache.get(42), None);
        cache.insert(42, at);
        assert_eq!(cache.get(42), Some(at));
        assert_eq!(cache.get(43), None);
    }
}
