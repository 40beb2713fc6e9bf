//! # Jellyfin Provider
//!
//! Implements the `CatalogAdapter` trait over the Jellyfin REST API.
//!
//! ## Overview
//!
//! This module provides:
//! - API key authentication through the `MediaBrowser` authorization header
//! - User name to user id resolution
//! - Paged listing of movie and episode items with their file paths
//! - Per-user watch state reads and single-request writes
//! - Retry with backoff for listing requests

pub mod connector;
pub mod error;
pub mod types;

pub use connector::{JellyfinConfig, JellyfinConnector};
pub use error::{JellyfinError, Result};
