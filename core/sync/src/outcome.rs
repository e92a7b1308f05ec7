//! Results of sync attempts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use kanisync_common::{Error, ResourceType};

/// Why an attempt ended without applying data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoDataReason {
    /// The last sync is younger than the minimum fetch interval; the
    /// network was not contacted and the ledger is untouched.
    Skipped,
    /// The remote confirmed nothing changed; the ledger was advanced to the
    /// request start.
    Unchanged,
}

/// Terminal state of one sync attempt.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Data applied, ledger advanced, one change event emitted.
    Success,
    /// Nothing applied.
    NoData(NoDataReason),
    /// Attempt failed; the ledger keeps its previous value.
    Error(Error),
}

impl SyncOutcome {
    /// Collapse an attempt's result into an outcome.
    pub fn from_result(result: kanisync_common::Result<SyncOutcome>) -> Self {
        result.unwrap_or_else(SyncOutcome::Error)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, SyncOutcome::NoData(NoDataReason::Skipped))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SyncOutcome::Error(_))
    }

    /// The failure cause, if any.
    pub fn error(&self) -> Option<&Error> {
        match self {
            SyncOutcome::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Success => write!(f, "updated"),
            SyncOutcome::NoData(NoDataReason::Skipped) => write!(f, "skipped (fresh)"),
            SyncOutcome::NoData(NoDataReason::Unchanged) => write!(f, "no changes"),
            SyncOutcome::Error(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Outcomes of a batch of attempts.
#[derive(Debug)]
pub struct SyncReport {
    pub outcomes: Vec<(ResourceType, SyncOutcome)>,
    pub duration: Duration,
}

impl SyncReport {
    /// A report for a batch that ran nothing.
    pub fn empty() -> Self {
        Self {
            outcomes: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Outcome for a resource type, if it was part of the batch.
    pub fn outcome(&self, resource_type: ResourceType) -> Option<&SyncOutcome> {
        self.outcomes
            .iter()
            .find(|(rt, _)| *rt == resource_type)
            .map(|(_, outcome)| outcome)
    }

    pub fn succeeded(&self) -> usize {
        self.count(SyncOutcome::is_success)
    }

    pub fn skipped(&self) -> usize {
        self.count(SyncOutcome::is_skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(SyncOutcome::is_error)
    }

    fn count(&self, predicate: impl Fn(&SyncOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| predicate(o)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_result() {
        assert!(SyncOutcome::from_result(Ok(SyncOutcome::Success)).is_success());
        let failed = SyncOutcome::from_result(Err(Error::Transport("timeout".to_string())));
        assert!(failed.is_error());
        assert!(matches!(failed.error(), Some(Error::Transport(_))));
    }

    #[test]
    fn test_report_counts() {
        let report = SyncReport {
            outcomes: vec![
                (ResourceType::User, SyncOutcome::Success),
                (ResourceType::Subjects, SyncOutcome::NoData(NoDataReason::Skipped)),
                (ResourceType::Assignments, SyncOutcome::NoData(NoDataReason::Unchanged)),
                (ResourceType::StudyMaterials, SyncOutcome::Error(Error::Cancelled)),
            ],
            duration: Duration::from_millis(5),
        };

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert!(report.outcome(ResourceType::LevelProgression).is_none());
        assert_eq!(
            report.outcome(ResourceType::StudyMaterials).unwrap().to_string(),
            "failed: Cancelled"
        );
    }
}
