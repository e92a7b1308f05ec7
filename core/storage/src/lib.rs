//! Store and fetcher abstractions for kanisync.
//!
//! This module provides the trait-based interfaces the sync engine depends
//! on, plus concrete backends:
//! - [`MemoryStore`] and [`ScriptedFetcher`] for tests and development
//! - [`SqliteStore`] for durable local storage
//! - [`HttpFetcher`] for the remote REST API
//!
//! # Design Principles
//! - Atomic writes: a batch and its ledger row become visible together
//! - Idempotent replace: replaying a page leaves the store unchanged
//! - Lazy pagination: pages are requested only as the engine consumes them

pub mod fetcher;
pub mod http;
pub mod memory;
pub mod retry;
pub mod scripted;
pub mod sqlite;
pub mod store;

pub use fetcher::{PageFetcher, PageStream};
pub use http::{HttpConfig, HttpFetcher, DEFAULT_BASE_URL};
pub use memory::MemoryStore;
pub use retry::{RetryConfig, RetryExecutor};
pub use scripted::ScriptedFetcher;
pub use sqlite::SqliteStore;
pub use store::{FreshnessLedger, ResourceStore, TransactionalWriter, WriteTransaction};
