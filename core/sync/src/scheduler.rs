//! Sync scheduling - manual and periodic modes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use kanisync_common::{Error, ResourceType, Result};

use crate::outcome::SyncReport;

/// Sync mode configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Sync only when requested.
    Manual,
    /// Sync every type at regular intervals, plus on request.
    Periodic { interval: Duration },
}

impl SyncMode {
    fn interval(&self) -> Option<Duration> {
        match self {
            SyncMode::Periodic { interval } => Some(*interval),
            SyncMode::Manual => None,
        }
    }
}

/// Sync request types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    /// Sync every resource type.
    All,
    /// Sync specific resource types.
    Resources(Vec<ResourceType>),
    /// Shutdown the scheduler.
    Shutdown,
}

type Envelope = (SyncRequest, oneshot::Sender<SyncReport>);

/// Front end for submitting sync requests to a running scheduler.
#[derive(Clone)]
pub struct SyncScheduler {
    mode_tx: Arc<watch::Sender<SyncMode>>,
    request_tx: mpsc::Sender<Envelope>,
}

impl SyncScheduler {
    /// Create a new scheduler with the given mode.
    pub fn new(mode: SyncMode) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(100);
        let (mode_tx, mode_rx) = watch::channel(mode);

        let scheduler = Self {
            mode_tx: Arc::new(mode_tx),
            request_tx,
        };
        let handle = SyncSchedulerHandle {
            mode_rx,
            request_rx,
        };

        (scheduler, handle)
    }

    /// Request a sync of every resource type.
    pub async fn request_sync(&self) -> Result<SyncReport> {
        self.submit(SyncRequest::All).await
    }

    /// Request a sync of specific resource types.
    pub async fn request_resources(
        &self,
        resource_types: Vec<ResourceType>,
    ) -> Result<SyncReport> {
        self.submit(SyncRequest::Resources(resource_types)).await
    }

    async fn submit(&self, request: SyncRequest) -> Result<SyncReport> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((request, response_tx))
            .await
            .map_err(|_| Error::Cancelled)?;

        response_rx.await.map_err(|_| Error::Cancelled)
    }

    /// Change the sync mode. A running scheduler switches immediately,
    /// starting a new period with a tick if the interval changed.
    pub fn set_mode(&self, mode: SyncMode) {
        self.mode_tx.send_replace(mode);
    }

    /// Get current sync mode.
    pub fn get_mode(&self) -> SyncMode {
        self.mode_tx.borrow().clone()
    }

    /// Shutdown the scheduler.
    pub async fn shutdown(&self) {
        let (response_tx, _) = oneshot::channel();
        let _ = self
            .request_tx
            .send((SyncRequest::Shutdown, response_tx))
            .await;
    }
}

/// Handle for the scheduler background task.
pub struct SyncSchedulerHandle {
    mode_rx: watch::Receiver<SyncMode>,
    request_rx: mpsc::Receiver<Envelope>,
}

impl SyncSchedulerHandle {
    /// Run the scheduler background task.
    ///
    /// This should be spawned in a tokio task. `sync_fn` is called for every
    /// request and every periodic tick. The task ends on a shutdown request
    /// or once every [`SyncScheduler`] has been dropped.
    pub async fn run<F, Fut>(self, sync_fn: F)
    where
        F: Fn(SyncRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = SyncReport> + Send,
    {
        let SyncSchedulerHandle {
            mut mode_rx,
            mut request_rx,
        } = self;
        let mut current = mode_rx.borrow_and_update().interval();
        let mut ticker = current.map(periodic_interval);

        info!("Sync scheduler started");

        loop {
            tokio::select! {
                received = request_rx.recv() => {
                    let Some((request, response_tx)) = received else {
                        info!("All scheduler handles dropped");
                        break;
                    };
                    if request == SyncRequest::Shutdown {
                        info!("Received shutdown request");
                        break;
                    }
                    debug!("Processing sync request: {:?}", request);
                    let report = sync_fn(request).await;
                    let _ = response_tx.send(report);
                }

                changed = mode_rx.changed() => {
                    if changed.is_err() {
                        info!("All scheduler handles dropped");
                        break;
                    }
                    let expected = mode_rx.borrow_and_update().interval();
                    if expected != current {
                        debug!("Sync interval changed to {:?}", expected);
                        current = expected;
                        ticker = current.map(periodic_interval);
                    }
                }

                _ = wait_for_tick(&mut ticker) => {
                    debug!("Triggering periodic sync");
                    let report = sync_fn(SyncRequest::All).await;
                    if report.failed() > 0 {
                        warn!(
                            "Periodic sync finished with {} failure(s) in {:?}",
                            report.failed(),
                            report.duration
                        );
                    } else {
                        info!(
                            "Periodic sync completed: {} updated, {} skipped in {:?}",
                            report.succeeded(),
                            report.skipped(),
                            report.duration
                        );
                    }
                }
            }
        }
    }
}

fn periodic_interval(period: Duration) -> Interval {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn wait_for_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
