//! # Host Bridge Traits
//!
//! Capability traits the synchronization engine consumes, plus the data model
//! those capabilities exchange.
//!
//! ## Overview
//!
//! This crate defines the contract between the engine in `core-sync` and the
//! concrete collaborators it talks to. The engine never reaches a media server
//! or the filesystem directly; everything goes through one of these traits so
//! the whole pipeline can be exercised against in-memory fakes.
//!
//! ## Traits
//!
//! ### Media Servers
//! - [`CatalogAdapter`](catalog::CatalogAdapter) - List items, read and write per-user watch state
//!
//! ### Filesystem
//! - [`AttributeProvider`](attributes::AttributeProvider) - Resolve a host path to file identity signals
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations used by the server adapters
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! Adapters report failures as [`CatalogError`](catalog::CatalogError), which
//! carries the retry classification (`Transient` vs `Permanent`). Filesystem
//! resolution reports [`ResolveError`](attributes::ResolveError). Lower-level
//! plumbing uses [`BridgeError`](error::BridgeError).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so one adapter instance can be
//! shared by every worker of a synchronization pass.

pub mod attributes;
pub mod catalog;
pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use attributes::{AttributeProvider, FileInode, MediaFile, ResolveError};
pub use catalog::{
    CatalogAdapter, CatalogError, ItemId, LibraryFilter, LibraryItem, ServerKind, WatchState,
};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use time::{Clock, FixedClock, SystemClock};
