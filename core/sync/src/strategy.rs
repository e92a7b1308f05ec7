//! Per-resource-type sync strategies.
//!
//! Each resource type is either a snapshot (one record, compared by its
//! data-updated timestamp) or a paginated collection fetched incrementally
//! from the last successful sync.

use std::collections::BTreeMap;

use kanisync_common::{CollectionRequest, Error, ResourceType, Result, Timestamp};

/// How a resource type is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    Snapshot,
    Collection,
}

/// Builds the collection request for a type from its last sync time.
pub type FilterRule = fn(ResourceType, Option<Timestamp>) -> CollectionRequest;

/// Only records updated after the last sync; everything on first sync.
pub fn updated_after(
    resource_type: ResourceType,
    last_sync: Option<Timestamp>,
) -> CollectionRequest {
    match last_sync {
        Some(since) => CollectionRequest::updated_after(resource_type, since),
        None => CollectionRequest::full(resource_type),
    }
}

/// Always the whole collection.
pub fn full_fetch(resource_type: ResourceType, _last_sync: Option<Timestamp>) -> CollectionRequest {
    CollectionRequest::full(resource_type)
}

/// Strategy for one resource type.
#[derive(Debug, Clone, Copy)]
pub struct ResourceStrategy {
    pub kind: SyncKind,
    pub filter: FilterRule,
}

impl ResourceStrategy {
    pub fn snapshot() -> Self {
        Self {
            kind: SyncKind::Snapshot,
            filter: full_fetch,
        }
    }

    pub fn incremental_collection() -> Self {
        Self {
            kind: SyncKind::Collection,
            filter: updated_after,
        }
    }

    /// The request to issue given the ledger's last sync time.
    pub fn request(
        &self,
        resource_type: ResourceType,
        last_sync: Option<Timestamp>,
    ) -> CollectionRequest {
        (self.filter)(resource_type, last_sync)
    }
}

/// Resource type to strategy lookup.
#[derive(Debug, Clone)]
pub struct StrategyTable {
    strategies: BTreeMap<ResourceType, ResourceStrategy>,
}

impl StrategyTable {
    /// The user is a snapshot; every other type is an incremental
    /// collection.
    pub fn standard() -> Self {
        let strategies = ResourceType::ALL
            .into_iter()
            .map(|rt| {
                let strategy = match rt {
                    ResourceType::User => ResourceStrategy::snapshot(),
                    _ => ResourceStrategy::incremental_collection(),
                };
                (rt, strategy)
            })
            .collect();
        Self { strategies }
    }

    /// Replace the strategy for one type.
    pub fn with_strategy(
        mut self,
        resource_type: ResourceType,
        strategy: ResourceStrategy,
    ) -> Self {
        self.strategies.insert(resource_type, strategy);
        self
    }

    pub fn get(&self, resource_type: ResourceType) -> Result<&ResourceStrategy> {
        self.strategies.get(&resource_type).ok_or_else(|| {
            Error::InvalidInput(format!("No sync strategy for {}", resource_type))
        })
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_standard_table() {
        let table = StrategyTable::standard();
        assert_eq!(table.get(ResourceType::User).unwrap().kind, SyncKind::Snapshot);
        for rt in ResourceType::ALL.into_iter().filter(|rt| *rt != ResourceType::User) {
            assert_eq!(table.get(rt).unwrap().kind, SyncKind::Collection);
        }
    }

    #[test]
    fn test_first_sync_is_full() {
        let strategy = ResourceStrategy::incremental_collection();
        let request = strategy.request(ResourceType::Assignments, None);
        assert!(!request.is_incremental());
        assert_eq!(request.resource_type, ResourceType::Assignments);
    }

    #[test]
    fn test_incremental_filter_uses_last_sync() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let request = ResourceStrategy::incremental_collection()
            .request(ResourceType::Subjects, Some(since));
        assert_eq!(request.updated_after, Some(since));
    }

    #[test]
    fn test_override_to_full_fetch() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let table = StrategyTable::standard().with_strategy(
            ResourceType::LevelProgression,
            ResourceStrategy {
                kind: SyncKind::Collection,
                filter: full_fetch,
            },
        );
        let request = table
            .get(ResourceType::LevelProgression)
            .unwrap()
            .request(ResourceType::LevelProgression, Some(since));
        assert!(!request.is_incremental());
    }
}
