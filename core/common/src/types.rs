//! Common types used throughout kanisync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Point in time used for ledger rows and record versions.
pub type Timestamp = DateTime<Utc>;

/// The fixed set of synchronizable resource kinds.
///
/// Each value owns exactly one ledger row and one change-event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// The account's user profile (single snapshot).
    User,
    /// Per-subject assignment state.
    Assignments,
    /// Level start/pass/completion history.
    LevelProgression,
    /// Per-subject review accuracy.
    ReviewStatistics,
    /// User-authored notes and synonyms.
    StudyMaterials,
    /// Radicals, kanji and vocabulary.
    Subjects,
}

impl ResourceType {
    /// Every resource type, in dependency-friendly order.
    pub const ALL: [ResourceType; 6] = [
        ResourceType::User,
        ResourceType::Subjects,
        ResourceType::Assignments,
        ResourceType::LevelProgression,
        ResourceType::ReviewStatistics,
        ResourceType::StudyMaterials,
    ];

    /// Stable key used as the ledger row identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::User => "user",
            ResourceType::Assignments => "assignments",
            ResourceType::LevelProgression => "level_progression",
            ResourceType::ReviewStatistics => "review_statistics",
            ResourceType::StudyMaterials => "study_materials",
            ResourceType::Subjects => "subjects",
        }
    }

    /// Name of the change event hosts may relay to their own channels.
    pub fn change_event_name(&self) -> &'static str {
        match self {
            ResourceType::User => "waniKaniUserInformationDidChange",
            ResourceType::Assignments => "waniKaniAssignmentsDidChange",
            ResourceType::LevelProgression => "waniKaniLevelProgressionDidChange",
            ResourceType::ReviewStatistics => "waniKaniReviewStatisticsDidChange",
            ResourceType::StudyMaterials => "waniKaniStudyMaterialsDidChange",
            ResourceType::Subjects => "waniKaniSubjectsDidChange",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        ResourceType::ALL
            .into_iter()
            .find(|rt| rt.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown resource type: {}", s)))
    }
}

/// One opaque unit of remote data.
///
/// The sync engine never looks inside `payload`; the store keys records by
/// `(resource type, id)` and replaces on conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Remote identifier, unique within a resource type.
    pub id: i64,
    /// When the remote last changed this record.
    pub updated_at: Option<Timestamp>,
    /// Tombstone flag: the record must be removed rather than upserted.
    pub hidden: bool,
    /// Raw record body.
    pub payload: serde_json::Value,
}

impl Record {
    /// Create a visible record without a version timestamp.
    pub fn new(id: i64, payload: serde_json::Value) -> Self {
        Self {
            id,
            updated_at: None,
            hidden: false,
            payload,
        }
    }

    /// Set the remote version timestamp.
    pub fn with_updated_at(mut self, updated_at: Timestamp) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// Mark the record as a tombstone.
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// One batch of a paginated collection response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Records carried by this page, in remote order.
    pub records: Vec<Record>,
    /// Total number of records matching the request across all pages.
    pub total_count: u64,
    /// Number of pages the remote expects to serve for this request.
    pub estimated_page_count: u32,
}

impl Page {
    /// Create a page.
    pub fn new(records: Vec<Record>, total_count: u64, estimated_page_count: u32) -> Self {
        Self {
            records,
            total_count,
            estimated_page_count,
        }
    }

    /// A page for a request that matched nothing.
    pub fn empty() -> Self {
        Self::new(Vec::new(), 0, 0)
    }

    /// Whether the remote reported zero matching records.
    pub fn is_empty_result(&self) -> bool {
        self.total_count == 0
    }
}

/// Response for a single-snapshot resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// When the remote data last changed.
    pub data_updated_at: Timestamp,
    /// The resource body, if the remote sent one.
    pub record: Option<Record>,
}

/// A filtered collection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRequest {
    pub resource_type: ResourceType,
    /// Only records updated after this instant; `None` requests everything.
    pub updated_after: Option<Timestamp>,
}

impl CollectionRequest {
    /// Request every record of a type.
    pub fn full(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            updated_after: None,
        }
    }

    /// Request records updated after `since`.
    pub fn updated_after(resource_type: ResourceType, since: Timestamp) -> Self {
        Self {
            resource_type,
            updated_after: Some(since),
        }
    }

    /// Whether this is an incremental fetch.
    pub fn is_incremental(&self) -> bool {
        self.updated_after.is_some()
    }
}

/// A single ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessRecord {
    pub resource_type: ResourceType,
    pub last_synced_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_resource_type_round_trips_through_key() {
        for rt in ResourceType::ALL {
            assert_eq!(rt.as_str().parse::<ResourceType>().unwrap(), rt);
        }
    }

    #[test]
    fn test_unknown_resource_type() {
        assert!("vocabulary".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&ResourceType::LevelProgression).unwrap();
        assert_eq!(json, "\"level_progression\"");
    }

    #[test]
    fn test_change_event_names_are_distinct() {
        let mut names: Vec<_> = ResourceType::ALL
            .iter()
            .map(|rt| rt.change_event_name())
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ResourceType::ALL.len());
    }

    #[test]
    fn test_record_builders() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = Record::new(7, serde_json::json!({"level": 3}))
            .with_updated_at(at)
            .hidden();
        assert_eq!(record.id, 7);
        assert_eq!(record.updated_at, Some(at));
        assert!(record.hidden);
    }

    #[test]
    fn test_collection_request() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(!CollectionRequest::full(ResourceType::Subjects).is_incremental());
        assert!(CollectionRequest::updated_after(ResourceType::Subjects, at).is_incremental());
    }

    #[test]
    fn test_empty_page() {
        assert!(Page::empty().is_empty_result());
        assert!(!Page::new(Vec::new(), 3, 1).is_empty_result());
    }
}
