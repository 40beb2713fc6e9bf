//! # Plex Provider
//!
//! Implements the `CatalogAdapter` trait over the Plex Media Server HTTP API.
//!
//! ## Overview
//!
//! This module provides:
//! - Token authentication with `X-Plex-*` headers and JSON responses
//! - Movie and episode listing paged with `X-Plex-Container-Start`/`Size`
//! - Watch state reads from item metadata
//! - Watch state writes through the scrobble, unscrobble and progress endpoints

pub mod connector;
pub mod error;
pub mod types;

pub use connector::{PlexConfig, PlexConnector};
pub use error::{PlexError, Result};
