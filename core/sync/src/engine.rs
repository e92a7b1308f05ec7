//! Core sync engine that orchestrates resource synchronization.
//!
//! One attempt per resource type: check freshness, fetch, persist page by
//! page, advance the ledger to the request-start time together with the
//! last page, then emit a change event.

use futures::future::join_all;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use kanisync_common::{Error, Record, ResourceType, Result, Timestamp};
use kanisync_storage::{PageFetcher, ResourceStore, WriteTransaction};

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::notifier::{ChangeEvent, ChangeNotifier};
use crate::outcome::{NoDataReason, SyncOutcome, SyncReport};
use crate::scheduler::{SyncRequest, SyncScheduler, SyncSchedulerHandle};
use crate::strategy::{StrategyTable, SyncKind};

/// Main sync engine.
///
/// Attempts for different resource types may run concurrently. Running two
/// attempts for the same type at once is the caller's responsibility to
/// avoid.
pub struct SyncEngine<F: PageFetcher + ?Sized, S: ResourceStore + ?Sized> {
    fetcher: Arc<F>,
    store: Arc<S>,
    notifier: ChangeNotifier,
    strategies: StrategyTable,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    config: SyncConfig,
}

impl<F: PageFetcher + ?Sized, S: ResourceStore + ?Sized> SyncEngine<F, S> {
    /// Create a new sync engine.
    pub fn new(fetcher: Arc<F>, store: Arc<S>, config: SyncConfig) -> Self {
        let notifier = ChangeNotifier::new(
            config.notification_capacity,
            config.notification_base.clone(),
        );
        Self {
            fetcher,
            store,
            notifier,
            strategies: StrategyTable::standard(),
            clock: Arc::new(SystemClock),
            shutdown: CancellationToken::new(),
            config,
        }
    }

    /// Use a different clock for request-start timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_strategies(mut self, strategies: StrategyTable) -> Self {
        self.strategies = strategies;
        self
    }

    /// Tie every attempt started without an explicit token to `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Subscribe to change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.notifier.subscribe()
    }

    /// Cancel every running and future attempt tied to the engine token.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Create a scheduler whose mode comes from the configuration.
    pub fn init_scheduler(&self) -> (SyncScheduler, SyncSchedulerHandle) {
        SyncScheduler::new(self.config.sync_mode.clone())
    }

    /// Last successful sync of a resource type.
    pub async fn last_sync(&self, resource_type: ResourceType) -> Result<Option<Timestamp>> {
        self.store.last_sync(resource_type).await
    }

    /// Earliest last sync across `resource_types`, ignoring never-synced
    /// types.
    pub async fn earliest_last_sync(
        &self,
        resource_types: &[ResourceType],
    ) -> Result<Option<Timestamp>> {
        self.store.earliest_last_sync(resource_types).await
    }

    /// Sync one resource type using its strategy.
    pub async fn sync_resource(
        &self,
        resource_type: ResourceType,
        min_interval: Duration,
    ) -> SyncOutcome {
        let cancel = self.shutdown.child_token();
        self.sync_resource_with_cancel(resource_type, min_interval, &cancel)
            .await
    }

    /// Sync one resource type, stopping between pages once `cancel` fires.
    pub async fn sync_resource_with_cancel(
        &self,
        resource_type: ResourceType,
        min_interval: Duration,
        cancel: &CancellationToken,
    ) -> SyncOutcome {
        let kind = match self.strategies.get(resource_type) {
            Ok(strategy) => strategy.kind,
            Err(e) => return SyncOutcome::Error(e),
        };
        match kind {
            SyncKind::Snapshot => {
                self.sync_snapshot_with_cancel(resource_type, min_interval, cancel)
                    .await
            }
            SyncKind::Collection => {
                self.sync_collection(resource_type, min_interval, cancel)
                    .await
            }
        }
    }

    /// Sync a single-record resource.
    pub async fn sync_snapshot(
        &self,
        resource_type: ResourceType,
        min_interval: Duration,
    ) -> SyncOutcome {
        let cancel = self.shutdown.child_token();
        self.sync_snapshot_with_cancel(resource_type, min_interval, &cancel)
            .await
    }

    async fn sync_snapshot_with_cancel(
        &self,
        resource_type: ResourceType,
        min_interval: Duration,
        cancel: &CancellationToken,
    ) -> SyncOutcome {
        let outcome = SyncOutcome::from_result(
            self.run_snapshot(resource_type, min_interval, cancel).await,
        );
        self.log_outcome(resource_type, &outcome);
        outcome
    }

    /// Sync a paginated collection.
    pub async fn sync_collection(
        &self,
        resource_type: ResourceType,
        min_interval: Duration,
        cancel: &CancellationToken,
    ) -> SyncOutcome {
        let outcome = SyncOutcome::from_result(
            self.run_collection(resource_type, min_interval, cancel).await,
        );
        self.log_outcome(resource_type, &outcome);
        outcome
    }

    /// Sync every resource type with its configured minimum interval.
    pub async fn sync_all(&self) -> SyncReport {
        self.sync_many(&ResourceType::ALL).await
    }

    /// Sync the given types concurrently, one attempt per distinct type.
    pub async fn sync_many(&self, resource_types: &[ResourceType]) -> SyncReport {
        let start = Instant::now();
        let mut types = resource_types.to_vec();
        types.sort();
        types.dedup();

        info!("Starting sync of {} resource type(s)", types.len());

        let attempts = types.iter().map(|&rt| async move {
            let outcome = self.sync_resource(rt, self.config.min_interval(rt)).await;
            (rt, outcome)
        });
        let outcomes = join_all(attempts).await;

        let report = SyncReport {
            outcomes,
            duration: start.elapsed(),
        };
        info!(
            "Sync finished in {:?}: {} updated, {} skipped, {} failed",
            report.duration,
            report.succeeded(),
            report.skipped(),
            report.failed()
        );
        report
    }

    /// Handle a scheduler request.
    pub async fn process_request(&self, request: SyncRequest) -> SyncReport {
        match request {
            SyncRequest::All => self.sync_all().await,
            SyncRequest::Resources(types) => self.sync_many(&types).await,
            SyncRequest::Shutdown => SyncReport::empty(),
        }
    }

    async fn run_snapshot(
        &self,
        resource_type: ResourceType,
        min_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let request_start = self.clock.now();
        let last_sync = self.store.last_sync(resource_type).await?;
        if is_fresh(last_sync, request_start, min_interval) {
            return Ok(SyncOutcome::NoData(NoDataReason::Skipped));
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        info!("Fetching resource {}", resource_type);
        let snapshot = match self.fetcher.fetch_snapshot(resource_type).await {
            Ok(snapshot) => snapshot,
            Err(Error::NoContent) => {
                return self.finish_unchanged(resource_type, request_start).await
            }
            Err(e) => {
                error!("Failed to fetch {}: {}", resource_type, e);
                return Err(e);
            }
        };

        let Some(record) = snapshot.record else {
            debug!("No data available for {}", resource_type);
            return self.finish_unchanged(resource_type, request_start).await;
        };
        if let Some(last) = last_sync {
            if snapshot.data_updated_at < last {
                debug!(
                    "No change for {} (last update {})",
                    resource_type, snapshot.data_updated_at
                );
                return self.finish_unchanged(resource_type, request_start).await;
            }
        }

        self.commit_page(resource_type, std::slice::from_ref(&record), Some(request_start))
            .await?;
        self.notifier.notify(resource_type, request_start);
        Ok(SyncOutcome::Success)
    }

    async fn run_collection(
        &self,
        resource_type: ResourceType,
        min_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let request_start = self.clock.now();
        let last_sync = self.store.last_sync(resource_type).await?;
        if is_fresh(last_sync, request_start, min_interval) {
            return Ok(SyncOutcome::NoData(NoDataReason::Skipped));
        }

        let request = self.strategies.get(resource_type)?.request(resource_type, last_sync);
        match request.updated_after {
            Some(since) => info!("Fetching resource {} (updated since {})", resource_type, since),
            None => info!("Fetching resource {}", resource_type),
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut pages = match self.fetcher.fetch_collection(request).await {
            Ok(pages) => pages,
            Err(Error::NoContent) => {
                return self.finish_unchanged(resource_type, request_start).await
            }
            Err(e) => {
                error!("Failed to fetch {}: {}", resource_type, e);
                return Err(e);
            }
        };

        let mut pages_received: u32 = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Sync of {} cancelled after {} page(s)", resource_type, pages_received);
                    return Err(Error::Cancelled);
                }
                next = pages.next() => next,
            };

            let page = match next {
                Some(Ok(page)) => page,
                Some(Err(Error::NoContent)) => {
                    debug!("No content for {} after {} page(s)", resource_type, pages_received);
                    return self.finish_unchanged(resource_type, request_start).await;
                }
                Some(Err(e)) => {
                    error!(
                        "Failed to fetch page {} of {}: {}",
                        pages_received + 1,
                        resource_type,
                        e
                    );
                    return Err(e);
                }
                None => {
                    return Err(Error::Transport(format!(
                        "page sequence for {} ended after {} page(s)",
                        resource_type, pages_received
                    )));
                }
            };

            if pages_received == 0 && page.is_empty_result() {
                debug!("No changes for {}", resource_type);
                return self.finish_unchanged(resource_type, request_start).await;
            }

            pages_received += 1;
            let is_last_page = pages_received >= page.estimated_page_count;
            debug!(
                "Writing {} entries to database (page {} of {})",
                page.records.len(),
                pages_received,
                page.estimated_page_count
            );
            self.commit_page(
                resource_type,
                &page.records,
                is_last_page.then_some(request_start),
            )
            .await?;

            if is_last_page {
                self.notifier.notify(resource_type, request_start);
                return Ok(SyncOutcome::Success);
            }
        }
    }

    /// Persist one page, plus the ledger row when this is the last page,
    /// in a single transaction.
    async fn commit_page(
        &self,
        resource_type: ResourceType,
        records: &[Record],
        ledger_advance: Option<Timestamp>,
    ) -> Result<()> {
        let mut tx = self.store.begin().await?;

        if let Err(e) = stage(tx.as_mut(), resource_type, records, ledger_advance).await {
            warn!("Rolling back {} write: {}", resource_type, e);
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Rollback of {} write failed: {}", resource_type, rollback_err);
            }
            return Err(as_persistence(e));
        }

        tx.commit().await.map_err(as_persistence)?;
        if let Some(at) = ledger_advance {
            info!("Ledger for {} advanced to {}", resource_type, at);
        }
        Ok(())
    }

    /// The remote has nothing new: record the attempt and report no data.
    async fn finish_unchanged(
        &self,
        resource_type: ResourceType,
        request_start: Timestamp,
    ) -> Result<SyncOutcome> {
        self.store.set_last_sync(resource_type, request_start).await?;
        Ok(SyncOutcome::NoData(NoDataReason::Unchanged))
    }

    fn log_outcome(&self, resource_type: ResourceType, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Success => info!("Fetch of {} finished successfully", resource_type),
            SyncOutcome::NoData(NoDataReason::Skipped) => {
                debug!("Skipping {}: synced within minimum interval", resource_type)
            }
            SyncOutcome::NoData(NoDataReason::Unchanged) => {
                info!("Fetch of {} finished with no changes", resource_type)
            }
            SyncOutcome::Error(e) => warn!("Fetch of {} failed: {}", resource_type, e),
        }
    }
}

async fn stage(
    tx: &mut dyn WriteTransaction,
    resource_type: ResourceType,
    records: &[Record],
    ledger_advance: Option<Timestamp>,
) -> Result<()> {
    tx.write_batch(resource_type, records).await?;
    if let Some(at) = ledger_advance {
        tx.set_last_sync(resource_type, at).await?;
    }
    Ok(())
}

fn as_persistence(e: Error) -> Error {
    match e {
        Error::Persistence(_) | Error::StoreUnavailable(_) => e,
        other => Error::Persistence(other.to_string()),
    }
}

/// Whether the last sync is younger than `min_interval` at `now`.
///
/// A last sync in the future counts as zero elapsed time.
fn is_fresh(last_sync: Option<Timestamp>, now: Timestamp, min_interval: Duration) -> bool {
    let Some(last) = last_sync else {
        return false;
    };
    let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
    elapsed < min_interval
}
