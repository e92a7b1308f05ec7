//! Store traits: the freshness ledger and the transactional writer.

use async_trait::async_trait;

use kanisync_common::{FreshnessRecord, Record, ResourceType, Result, Timestamp};

/// Durable mapping from resource type to its last successful sync.
///
/// Implementations must keep each row monotonically non-decreasing: an
/// upsert older than the stored value leaves the stored value in place.
#[async_trait]
pub trait FreshnessLedger: Send + Sync {
    /// Point lookup of a type's last sync. Never touches the network.
    ///
    /// # Errors
    /// - `StoreUnavailable` if the ledger cannot be read
    async fn last_sync(&self, resource_type: ResourceType) -> Result<Option<Timestamp>>;

    /// Earliest last sync across `resource_types`.
    ///
    /// Types that were never synced are ignored; `None` when none of them
    /// has a row.
    async fn earliest_last_sync(
        &self,
        resource_types: &[ResourceType],
    ) -> Result<Option<Timestamp>> {
        let mut earliest: Option<Timestamp> = None;
        for resource_type in resource_types {
            if let Some(at) = self.last_sync(*resource_type).await? {
                earliest = Some(match earliest {
                    Some(current) if current <= at => current,
                    _ => at,
                });
            }
        }
        Ok(earliest)
    }

    /// Standalone idempotent upsert of a ledger row.
    async fn set_last_sync(&self, resource_type: ResourceType, at: Timestamp) -> Result<()>;

    /// Every recorded ledger row, ordered by resource type.
    async fn ledger_snapshot(&self) -> Result<Vec<FreshnessRecord>>;
}

/// One atomic unit of work against the store.
///
/// Nothing written through a transaction is visible until [`commit`]
/// succeeds. Dropping a transaction without committing discards it.
///
/// [`commit`]: WriteTransaction::commit
#[async_trait]
pub trait WriteTransaction: Send {
    /// Replace-or-insert visible records and delete hidden ones.
    ///
    /// Writing the same batch twice leaves the store as writing it once.
    async fn write_batch(&mut self, resource_type: ResourceType, records: &[Record]) -> Result<()>;

    /// Upsert the ledger row in this transaction.
    async fn set_last_sync(&mut self, resource_type: ResourceType, at: Timestamp) -> Result<()>;

    /// Make every write in this transaction visible at once.
    ///
    /// # Errors
    /// - `Persistence` if any write failed; nothing becomes visible
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write in this transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Factory for write transactions.
#[async_trait]
pub trait TransactionalWriter: Send + Sync {
    /// Begin a new transaction.
    ///
    /// # Errors
    /// - `StoreUnavailable` if the store cannot be reached
    async fn begin(&self) -> Result<Box<dyn WriteTransaction>>;
}

/// A store usable by the sync engine: ledger reads plus transactional writes.
pub trait ResourceStore: FreshnessLedger + TransactionalWriter {}

impl<T: FreshnessLedger + TransactionalWriter + ?Sized> ResourceStore for T {}
