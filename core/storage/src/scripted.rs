//! Scripted page fetcher for testing.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use kanisync_common::{CollectionRequest, Error, Page, ResourceType, Result, Snapshot};

use crate::fetcher::{PageFetcher, PageStream};

/// Fetcher that replays queued responses.
///
/// Each call to [`PageFetcher::fetch_snapshot`] or
/// [`PageFetcher::fetch_collection`] consumes the next queued response for
/// that resource type. Calls with nothing queued fail with a transport error.
/// Every request and every page actually pulled from a stream is counted so
/// tests can assert on network traffic.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    snapshots: Mutex<HashMap<ResourceType, VecDeque<Result<Snapshot>>>>,
    collections: Mutex<HashMap<ResourceType, VecDeque<Vec<Result<Page>>>>>,
    requests: Mutex<Vec<CollectionRequest>>,
    snapshot_calls: AtomicUsize,
    pages_served: Arc<AtomicUsize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedFetcher {
    /// Create a fetcher with nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the response to the next snapshot fetch of `resource_type`.
    pub fn push_snapshot(&self, resource_type: ResourceType, response: Result<Snapshot>) {
        lock(&self.snapshots)
            .entry(resource_type)
            .or_default()
            .push_back(response);
    }

    /// Queue the page sequence for the next collection fetch of
    /// `resource_type`.
    pub fn push_collection(&self, resource_type: ResourceType, pages: Vec<Result<Page>>) {
        lock(&self.collections)
            .entry(resource_type)
            .or_default()
            .push_back(pages);
    }

    /// Collection requests received so far, in order.
    pub fn requests(&self) -> Vec<CollectionRequest> {
        lock(&self.requests).clone()
    }

    /// Number of snapshot fetches received.
    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    /// Number of pages pulled from collection streams.
    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }

    /// Total number of fetch calls of either kind.
    pub fn call_count(&self) -> usize {
        self.snapshot_calls() + lock(&self.requests).len()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_snapshot(&self, resource_type: ResourceType) -> Result<Snapshot> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.snapshots)
            .get_mut(&resource_type)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(Error::Transport(format!(
                    "No scripted snapshot for {}",
                    resource_type
                )))
            })
    }

    async fn fetch_collection(&self, request: CollectionRequest) -> Result<PageStream> {
        let resource_type = request.resource_type;
        lock(&self.requests).push(request);

        let script = lock(&self.collections)
            .get_mut(&resource_type)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| {
                Error::Transport(format!("No scripted collection for {}", resource_type))
            })?;

        let served = self.pages_served.clone();
        let pages = stream::iter(script).inspect(move |_| {
            served.fetch_add(1, Ordering::SeqCst);
        });
        Ok(Box::pin(pages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_replays_snapshots_in_order() {
        let fetcher = ScriptedFetcher::new();
        let now = Utc::now();
        fetcher.push_snapshot(
            ResourceType::User,
            Ok(Snapshot {
                data_updated_at: now,
                record: None,
            }),
        );
        fetcher.push_snapshot(ResourceType::User, Err(Error::NoContent));

        assert!(fetcher.fetch_snapshot(ResourceType::User).await.is_ok());
        assert!(matches!(
            fetcher.fetch_snapshot(ResourceType::User).await,
            Err(Error::NoContent)
        ));
        assert!(fetcher.fetch_snapshot(ResourceType::User).await.is_err());
        assert_eq!(fetcher.snapshot_calls(), 3);
    }

    #[tokio::test]
    async fn test_counts_only_pulled_pages() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push_collection(
            ResourceType::Subjects,
            vec![
                Ok(Page::new(Vec::new(), 3, 3)),
                Ok(Page::new(Vec::new(), 3, 3)),
                Ok(Page::new(Vec::new(), 3, 3)),
            ],
        );

        let mut pages = fetcher
            .fetch_collection(CollectionRequest::full(ResourceType::Subjects))
            .await
            .unwrap();
        assert!(pages.next().await.is_some());
        drop(pages);

        assert_eq!(fetcher.pages_served(), 1);
        assert_eq!(fetcher.requests().len(), 1);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_script_is_transport_error() {
        let fetcher = ScriptedFetcher::new();
        let result = fetcher
            .fetch_collection(CollectionRequest::full(ResourceType::Assignments))
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
