use serde::{Deserialize, Serialize};

// ─── Scalar aliases ───────────────────────────────────────────

/// Entity key. `-1` when no key was assigned yet.
pub type Key = i64;

/// Position of a record in a partition log.
pub type Position = i64;

/// Partition identifier.
pub type PartitionId = u16;

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

/// Marker for "no key assigned".
pub const NO_KEY: Key = -1;

/// Marker for "no position" (e.g. source position of a client command).
pub const NO_POSITION: Position = -1;

// ─── Key generation ───────────────────────────────────────────

/// Number of low bits reserved for the per-partition counter.
const KEY_BITS: u32 = 51;

/// Encode a partition id into the upper bits of every key, so keys are unique
/// across partitions without coordination.
pub fn encode_partition_key(partition_id: PartitionId, counter: i64) -> Key {
    ((partition_id as i64) << KEY_BITS) + counter
}

/// Extract the partition id from a key produced by [`KeyGenerator`].
pub fn decode_partition_id(key: Key) -> PartitionId {
    (key >> KEY_BITS) as PartitionId
}

/// Deterministic key generator owned by a partition's processing state.
///
/// Keys are only derived from the counter, never from the clock or randomness,
/// so replaying the same commands yields the same keys.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyGenerator {
    partition_id: PartitionId,
    next: i64,
}

impl KeyGenerator {
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            next: 1,
        }
    }

    pub fn next_key(&mut self) -> Key {
        let key = encode_partition_key(self.partition_id, self.next);
        self.next += 1;
        key
    }

    /// Make sure the generator never hands out `key` (or anything below it)
    /// again. Called by the event appliers during replay.
    pub fn set_key_if_higher(&mut self, key: Key) {
        if key <= 0 || decode_partition_id(key) != self.partition_id {
            return;
        }
        let counter = key - encode_partition_key(self.partition_id, 0);
        if counter >= self.next {
            self.next = counter + 1;
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }
}
