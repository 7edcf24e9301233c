//! In-memory store used by tests and `--dev` runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use ulid::Ulid;

use crate::ports::store::{Bucket, Store, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    buckets: Mutex<HashMap<Bucket, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut HashMap<Bucket, BTreeMap<String, Vec<u8>>>) -> R) -> R {
        let mut buckets = self.buckets.lock().expect("memory store poisoned");
        f(&mut buckets)
    }
}

impl Store for MemoryStore {
    fn get(&self, bucket: Bucket, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.with(|b| b.get(&bucket).and_then(|t| t.get(id).cloned())))
    }

    fn list(&self, bucket: Bucket) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        Ok(self.with(|b| {
            b.get(&bucket)
                .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default()
        }))
    }

    fn create(&self, bucket: Bucket, value: &[u8]) -> Result<String, StoreError> {
        let id = Ulid::new().to_string();
        self.put(bucket, &id, value)?;
        Ok(id)
    }

    fn put(&self, bucket: Bucket, id: &str, value: &[u8]) -> Result<(), StoreError> {
        self.with(|b| {
            b.entry(bucket).or_default().insert(id.to_string(), value.to_vec());
        });
        Ok(())
    }

    fn delete(&self, bucket: Bucket, id: &str) -> Result<(), StoreError> {
        self.with(|b| {
            if let Some(t) = b.get_mut(&bucket) {
                t.remove(id);
            }
        });
        Ok(())
    }
}
