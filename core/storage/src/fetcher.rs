//! Page fetcher trait definition.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use kanisync_common::{CollectionRequest, Page, ResourceType, Result, Snapshot};

/// Lazily-driven sequence of collection pages.
///
/// Pages are requested one at a time as the stream is polled; dropping the
/// stream stops further requests.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<Page>> + Send>>;

/// Remote API abstraction consumed by the sync engine.
///
/// Implementations own authentication, rate limiting and decoding. They must
/// report "nothing to report" as [`kanisync_common::Error::NoContent`], kept
/// separate from [`kanisync_common::Error::Transport`].
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Get the fetcher name (e.g., "http", "scripted").
    fn name(&self) -> &str;

    /// Fetch a single-snapshot resource.
    ///
    /// # Errors
    /// - `NoContent` when the remote has nothing newer
    /// - `Transport` / `Unauthorized` / `Decode` on failure
    async fn fetch_snapshot(&self, resource_type: ResourceType) -> Result<Snapshot>;

    /// Start a paginated collection fetch.
    ///
    /// # Postconditions
    /// - The first page yielded carries `total_count` and
    ///   `estimated_page_count` for the whole request
    /// - No request is required to be in flight until the stream is polled
    async fn fetch_collection(&self, request: CollectionRequest) -> Result<PageStream>;
}
