//! Store port: a bucketed persistent map with keyed JSON records.

use std::fmt;

use thiserror::Error;

/// The three persistence buckets. A closed set so implementations can map
/// each one to a fixed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// The single configuration record, key `default`.
    Config,
    /// Append-only measurement records.
    Readings,
    /// Pending queue tasks.
    Queue,
}

impl Bucket {
    pub fn name(&self) -> &'static str {
        match self {
            Bucket::Config => "autotester",
            Bucket::Readings => "autotester_readings",
            Bucket::Queue => "autotester_queue",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Bucketed KV with atomic single-key operations.
///
/// `create` persists under a store-assigned, time-ordered key; `put` is an
/// upsert at a caller-chosen key and exists for the fixed config record.
/// `delete` of an absent key is a no-op.
pub trait Store: Send + Sync {
    fn get(&self, bucket: Bucket, id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Key-ordered scan of a whole bucket.
    fn list(&self, bucket: Bucket) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    fn create(&self, bucket: Bucket, value: &[u8]) -> Result<String, StoreError>;

    fn put(&self, bucket: Bucket, id: &str, value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, bucket: Bucket, id: &str) -> Result<(), StoreError>;
}
