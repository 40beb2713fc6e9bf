//! Filesystem Attribute Abstractions
//!
//! Identity signals for the physical file behind a server-reported path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Device and inode of the physical file on its underlying branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileInode {
    pub device: u64,
    pub inode: u64,
}

/// The physical file a library item points at
///
/// Recomputed on every pass; nothing here is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFile {
    /// Host path that was resolved (after path mapping)
    pub source_path: PathBuf,
    /// Path of the file on the branch that actually stores it
    pub real_path: PathBuf,
    /// Path relative to the union root, identical whichever branch or mount
    /// view the file was reached through
    pub relative_path: PathBuf,
    /// Union filesystem branch holding the file, when known
    pub branch: Option<String>,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub inode: Option<FileInode>,
    /// Partial content hash, only computed when enabled
    pub content_hash: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The path is empty, relative or otherwise malformed
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The file is missing, unreadable, or its attributes could not be read
    #[error("Unresolvable path '{path}': {reason}")]
    Unresolvable { path: String, reason: String },
}

impl ResolveError {
    pub fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ResolveError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn unresolvable(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ResolveError::Unresolvable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            ResolveError::InvalidPath { path, .. } | ResolveError::Unresolvable { path, .. } => path,
        }
    }
}

/// Provider of file identity signals
///
/// Implementations read size, timestamps, inode and union filesystem attributes
/// for a host path. They must normalize union filesystem prefixes so the same
/// physical file reached through different mount views yields the same
/// `relative_path`.
#[async_trait]
pub trait AttributeProvider: Send + Sync {
    async fn resolve(&self, path: &Path) -> Result<MediaFile, ResolveError>;
}
