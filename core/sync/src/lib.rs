//! Kanisync Sync Engine
//!
//! This module provides incremental synchronization of remote resources
//! into a local store, including:
//! - Minimum-interval freshness checks against a durable ledger
//! - Snapshot and paginated-collection strategies per resource type
//! - Per-page atomic writes with the ledger advanced on the last page
//! - Change events after successful syncs
//! - Manual and periodic scheduling, with cancellation between pages

pub mod clock;
pub mod config;
pub mod engine;
pub mod notifier;
pub mod outcome;
pub mod scheduler;
pub mod strategy;

// Re-export main types
pub use clock::{Clock, SystemClock};
pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use notifier::{ChangeEvent, ChangeNotifier};
pub use outcome::{NoDataReason, SyncOutcome, SyncReport};
pub use scheduler::{SyncMode, SyncRequest, SyncScheduler, SyncSchedulerHandle};
pub use strategy::{ResourceStrategy, StrategyTable, SyncKind};
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let config = SyncConfig::default();
        assert_eq!(config.sync_mode, SyncMode::Manual);
        let _table = StrategyTable::default();
        let _clock = SystemClock;
    }
}
