//! redb-backed store.
//!
//! One table per bucket: `&str` keys, JSON-serialized values. Keys assigned
//! by `create` are ULIDs, so a plain key-ordered scan is also a
//! creation-ordered scan.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use ulid::Ulid;

use crate::ports::store::{Bucket, Store, StoreError};

const CONFIG: TableDefinition<&str, &[u8]> = TableDefinition::new("autotester");
const READINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("autotester_readings");
const QUEUE: TableDefinition<&str, &[u8]> = TableDefinition::new("autotester_queue");

fn table(bucket: Bucket) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match bucket {
        Bucket::Config => CONFIG,
        Bucket::Readings => READINGS,
        Bucket::Queue => QUEUE,
    }
}

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open (creating if needed) the database and make sure every table
    /// exists, so later reads never hit a missing table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(StoreError::backend)?;
        let txn = db.begin_write().map_err(StoreError::backend)?;
        for bucket in [Bucket::Config, Bucket::Readings, Bucket::Queue] {
            txn.open_table(table(bucket)).map_err(StoreError::backend)?;
        }
        txn.commit().map_err(StoreError::backend)?;
        Ok(Self { db })
    }
}

impl Store for RedbStore {
    fn get(&self, bucket: Bucket, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = self.db.begin_read().map_err(StoreError::backend)?;
        let t = txn.open_table(table(bucket)).map_err(StoreError::backend)?;
        let value = t.get(id).map_err(StoreError::backend)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn list(&self, bucket: Bucket) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let txn = self.db.begin_read().map_err(StoreError::backend)?;
        let t = txn.open_table(table(bucket)).map_err(StoreError::backend)?;
        let mut out = Vec::new();
        for row in t.iter().map_err(StoreError::backend)? {
            let (key, value) = row.map_err(StoreError::backend)?;
            out.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(out)
    }

    fn create(&self, bucket: Bucket, value: &[u8]) -> Result<String, StoreError> {
        let id = Ulid::new().to_string();
        self.put(bucket, &id, value)?;
        Ok(id)
    }

    fn put(&self, bucket: Bucket, id: &str, value: &[u8]) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let mut t = txn.open_table(table(bucket)).map_err(StoreError::backend)?;
            t.insert(id, value).map_err(StoreError::backend)?;
        }
        txn.commit().map_err(StoreError::backend)
    }

    fn delete(&self, bucket: Bucket, id: &str) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(StoreError::backend)?;
        {
            let mut t = txn.open_table(table(bucket)).map_err(StoreError::backend)?;
            t.remove(id).map_err(StoreError::backend)?;
        }
        txn.commit().map_err(StoreError::backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, RedbStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn put_get_delete_round_trip() {
        let (_dir, store) = open_temp();

        assert_eq!(store.get(Bucket::Config, "default").unwrap(), None);
        store.put(Bucket::Config, "default", b"{\"a\":1}").unwrap();
        assert_eq!(
            store.get(Bucket::Config, "default").unwrap().as_deref(),
            Some(b"{\"a\":1}".as_slice())
        );

        // put is an upsert
        store.put(Bucket::Config, "default", b"{\"a\":2}").unwrap();
        assert_eq!(
            store.get(Bucket::Config, "default").unwrap().as_deref(),
            Some(b"{\"a\":2}".as_slice())
        );

        store.delete(Bucket::Config, "default").unwrap();
        assert_eq!(store.get(Bucket::Config, "default").unwrap(), None);
        // deleting again is a no-op
        store.delete(Bucket::Config, "default").unwrap();
    }

    #[test]
    fn create_assigns_ordered_keys() {
        let (_dir, store) = open_temp();

        let a = store.create(Bucket::Queue, b"first").unwrap();
        let b = store.create(Bucket::Queue, b"second").unwrap();
        assert_ne!(a, b);

        let listed = store.list(Bucket::Queue).unwrap();
        assert_eq!(listed.len(), 2);
        // key-ordered scan; ULIDs sort by creation time
        assert!(listed[0].0 <= listed[1].0);
    }

    #[test]
    fn buckets_are_isolated() {
        let (_dir, store) = open_temp();

        store.put(Bucket::Config, "k", b"cfg").unwrap();
        store.put(Bucket::Queue, "k", b"task").unwrap();
        assert_eq!(
            store.get(Bucket::Readings, "k").unwrap(),
            None,
            "readings bucket must not see other buckets' keys"
        );
        assert_eq!(store.list(Bucket::Config).unwrap().len(), 1);
    }
}
