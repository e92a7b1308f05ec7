//! Common types shared across the kanisync crates.
//!
//! This module provides the error taxonomy and the data model the sync
//! engine, the stores and the fetchers all agree on.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    CollectionRequest, FreshnessRecord, Page, Record, ResourceType, Snapshot, Timestamp,
};
