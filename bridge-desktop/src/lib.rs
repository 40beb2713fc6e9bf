//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for the host the sync tool runs on
//! (typically a Linux box or container that mounts the media library).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `AttributeProvider` using `std::fs` metadata plus union filesystem
//!   extended attributes (mergerfs `user.mergerfs.*`)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, UnionFsAttributeProvider, UnionFsOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let attributes = UnionFsAttributeProvider::new(UnionFsOptions {
//!         union_roots: vec!["/mnt/merged".into()],
//!         branches: vec!["/mnt/disk1".into(), "/mnt/disk2".into()],
//!         partial_hash: false,
//!     });
//!     Ok(())
//! }
//! ```

mod attributes;
mod http;

pub use attributes::{UnionFsAttributeProvider, UnionFsOptions};
pub use http::ReqwestHttpClient;
