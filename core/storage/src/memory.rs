//! In-memory store for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::debug;

use kanisync_common::{Error, FreshnessRecord, Record, ResourceType, Result, Timestamp};

use crate::store::{FreshnessLedger, TransactionalWriter, WriteTransaction};

/// Store contents.
#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<(ResourceType, i64), Record>,
    ledger: HashMap<ResourceType, Timestamp>,
}

impl Inner {
    fn apply_batch(&mut self, resource_type: ResourceType, records: &[Record]) {
        for record in records {
            let key = (resource_type, record.id);
            if record.hidden {
                self.records.remove(&key);
            } else {
                self.records.insert(key, record.clone());
            }
        }
    }

    fn advance(&mut self, resource_type: ResourceType, at: Timestamp) {
        let entry = self.ledger.entry(resource_type).or_insert(at);
        if *entry < at {
            *entry = at;
        }
    }
}

/// Buffered operation, applied at commit.
#[derive(Debug)]
enum PendingOp {
    Write(ResourceType, Vec<Record>),
    Ledger(ResourceType, Timestamp),
}

/// In-memory store.
///
/// Useful for testing and development. All data is stored in memory and
/// lost on drop. Transactions buffer their writes and apply them under a
/// single write lock on commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a stored record.
    pub fn record(&self, resource_type: ResourceType, id: i64) -> Result<Option<Record>> {
        let inner = self.read()?;
        Ok(inner.records.get(&(resource_type, id)).cloned())
    }

    /// All stored records of a type, ordered by id.
    pub fn records(&self, resource_type: ResourceType) -> Result<Vec<Record>> {
        let inner = self.read()?;
        Ok(inner
            .records
            .range((resource_type, i64::MIN)..=(resource_type, i64::MAX))
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::StoreUnavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl FreshnessLedger for MemoryStore {
    async fn last_sync(&self, resource_type: ResourceType) -> Result<Option<Timestamp>> {
        Ok(self.read()?.ledger.get(&resource_type).copied())
    }

    async fn set_last_sync(&self, resource_type: ResourceType, at: Timestamp) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| Error::StoreUnavailable("memory store lock poisoned".to_string()))?;
        inner.advance(resource_type, at);
        Ok(())
    }

    async fn ledger_snapshot(&self) -> Result<Vec<FreshnessRecord>> {
        let inner = self.read()?;
        let mut rows: Vec<FreshnessRecord> = inner
            .ledger
            .iter()
            .map(|(resource_type, at)| FreshnessRecord {
                resource_type: *resource_type,
                last_synced_at: *at,
            })
            .collect();
        rows.sort_by_key(|row| row.resource_type);
        Ok(rows)
    }
}

#[async_trait]
impl TransactionalWriter for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn WriteTransaction>> {
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
            ops: Vec::new(),
        }))
    }
}

/// Transaction handle for [`MemoryStore`].
pub struct MemoryTransaction {
    inner: Arc<RwLock<Inner>>,
    ops: Vec<PendingOp>,
}

#[async_trait]
impl WriteTransaction for MemoryTransaction {
    async fn write_batch(&mut self, resource_type: ResourceType, records: &[Record]) -> Result<()> {
        self.ops.push(PendingOp::Write(resource_type, records.to_vec()));
        Ok(())
    }

    async fn set_last_sync(&mut self, resource_type: ResourceType, at: Timestamp) -> Result<()> {
        self.ops.push(PendingOp::Ledger(resource_type, at));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| Error::Persistence("memory store lock poisoned".to_string()))?;
        debug!("Committing {} buffered operation(s)", self.ops.len());
        for op in &self.ops {
            match op {
                PendingOp::Write(resource_type, records) => {
                    inner.apply_batch(*resource_type, records)
                }
                PendingOp::Ledger(resource_type, at) => inner.advance(*resource_type, *at),
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!("Discarding {} buffered operation(s)", self.ops.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn at(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn record(id: i64, level: i64) -> Record {
        Record::new(id, serde_json::json!({ "level": level }))
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.write_batch(ResourceType::Subjects, &[record(1, 1), record(2, 1)])
            .await
            .unwrap();
        tx.set_last_sync(ResourceType::Subjects, at(1)).await.unwrap();

        assert!(store.records(ResourceType::Subjects).unwrap().is_empty());
        tx.commit().await.unwrap();

        assert_eq!(store.records(ResourceType::Subjects).unwrap().len(), 2);
        assert_eq!(store.last_sync(ResourceType::Subjects).await.unwrap(), Some(at(1)));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.write_batch(ResourceType::Assignments, &[record(1, 1)])
            .await
            .unwrap();
        tx.set_last_sync(ResourceType::Assignments, at(1)).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.records(ResourceType::Assignments).unwrap().is_empty());
        assert_eq!(store.last_sync(ResourceType::Assignments).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let store = MemoryStore::new();
        let batch = vec![record(1, 1), record(2, 2)];

        for _ in 0..2 {
            let mut tx = store.begin().await.unwrap();
            tx.write_batch(ResourceType::Subjects, &batch).await.unwrap();
            tx.commit().await.unwrap();
        }

        assert_eq!(store.records(ResourceType::Subjects).unwrap(), batch);
    }

    #[tokio::test]
    async fn test_hidden_record_is_removed() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.write_batch(ResourceType::Subjects, &[record(1, 1)]).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.write_batch(ResourceType::Subjects, &[record(1, 1).hidden()])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.record(ResourceType::Subjects, 1).unwrap(), None);
    }

    #[tokio::test]
    async fn test_records_are_scoped_by_type() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.write_batch(ResourceType::Subjects, &[record(1, 1)]).await.unwrap();
        tx.write_batch(ResourceType::Assignments, &[record(1, 9)]).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.records(ResourceType::Subjects).unwrap().len(), 1);
        assert_eq!(
            store.record(ResourceType::Assignments, 1).unwrap(),
            Some(record(1, 9))
        );
    }

    #[tokio::test]
    async fn test_earliest_last_sync_ignores_missing_rows() {
        let store = MemoryStore::new();
        store.set_last_sync(ResourceType::Subjects, at(5)).await.unwrap();
        store.set_last_sync(ResourceType::Assignments, at(3)).await.unwrap();

        let earliest = store
            .earliest_last_sync(&[
                ResourceType::Subjects,
                ResourceType::Assignments,
                ResourceType::StudyMaterials,
            ])
            .await
            .unwrap();
        assert_eq!(earliest, Some(at(3)));

        let none = store
            .earliest_last_sync(&[ResourceType::StudyMaterials, ResourceType::User])
            .await
            .unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn test_ledger_snapshot_is_ordered() {
        let store = MemoryStore::new();
        store.set_last_sync(ResourceType::Subjects, at(2)).await.unwrap();
        store.set_last_sync(ResourceType::User, at(1)).await.unwrap();

        let rows = store.ledger_snapshot().await.unwrap();
        let types: Vec<_> = rows.iter().map(|row| row.resource_type).collect();
        assert_eq!(types, vec![ResourceType::User, ResourceType::Subjects]);
    }

    proptest! {
        #[test]
        fn prop_ledger_never_moves_backwards(
            offsets in proptest::collection::vec(0i64..100_000, 1..32)
        ) {
            let base = at(0);
            let mut inner = Inner::default();
            let mut previous: Option<Timestamp> = None;

            for offset in offsets {
                inner.advance(ResourceType::Assignments, base + Duration::seconds(offset));
                let current = inner.ledger.get(&ResourceType::Assignments).copied();
                prop_assert!(current >= previous);
                previous = current;
            }
        }
    }
}
