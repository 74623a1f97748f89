//! Bridge configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ids this short or shorter belong to seed records and are never deleted.
pub const SEED_ID_MAX_LEN: usize = 7;

/// Bridge configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Max buffered snapshots per feed. Once full, the oldest is discarded.
    /// Default: 64
    pub feed_buffer_size: usize,

    /// Minimum id length accepted by delete requests.
    /// Default: 8
    pub min_deletable_id_len: usize,

    /// Threads draining the mutation queue.
    /// Default: 2
    pub mutation_workers: usize,

    /// Max queued mutations before `submit` blocks.
    /// Default: 256
    pub mutation_queue_size: usize,

    /// How long a replaced subscription worker may take to stop before
    /// the replacement proceeds without it.
    /// Default: 5s
    #[serde(with = "millis")]
    pub join_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            feed_buffer_size: 64,
            min_deletable_id_len: SEED_ID_MAX_LEN + 1,
            mutation_workers: 2,
            mutation_queue_size: 256,
            join_timeout: Duration::from_secs(5),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
