//! Attribute Resolver
//!
//! Turns the file paths a server reports into [`MediaFile`] identities. Each
//! server sees the library through its own mount, so reported paths are first
//! translated to host paths with a per-server [`PathMapper`], then handed to the
//! host's [`AttributeProvider`].

use bridge_traits::attributes::{AttributeProvider, MediaFile, ResolveError};
use bridge_traits::catalog::{LibraryItem, ServerKind};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Ordered prefix rewrites from a server's view of the library to the host's
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    /// Sorted longest prefix first
    rules: Vec<(PathBuf, PathBuf)>,
}

impl PathMapper {
    pub fn new<I, F, T>(mappings: I) -> Self
    where
        I: IntoIterator<Item = (F, T)>,
        F: Into<PathBuf>,
        T: Into<PathBuf>,
    {
        let mut rules: Vec<(PathBuf, PathBuf)> = mappings
            .into_iter()
            .map(|(from, to)| (from.into(), to.into()))
            .collect();
        rules.sort_by(|(a, _), (b, _)| {
            b.components()
                .count()
                .cmp(&a.components().count())
                .then_with(|| a.cmp(b))
        });
        Self { rules }
    }

    pub fn from_map(mappings: &BTreeMap<String, String>) -> Self {
        Self::new(mappings.iter().map(|(from, to)| (from.as_str(), to.as_str())))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewrite the longest matching prefix; whole components only, so
    /// `/media` never matches `/media2/...`
    pub fn map(&self, path: &Path) -> PathBuf {
        for (from, to) in &self.rules {
            if let Ok(rest) = path.strip_prefix(from) {
                return if rest.as_os_str().is_empty() {
                    to.clone()
                } else {
                    to.join(rest)
                };
            }
        }
        path.to_path_buf()
    }
}

/// A library item together with the identities of the files behind it
#[derive(Debug, Clone)]
pub struct ResolvedItem {
    pub item: LibraryItem,
    pub files: Vec<MediaFile>,
    /// Per-path failures; an item stays usable while at least one path resolved
    pub errors: Vec<ResolveError>,
}

impl ResolvedItem {
    pub fn is_resolved(&self) -> bool {
        !self.files.is_empty()
    }

    /// Human-readable reasons the item could not be resolved
    pub fn failure_reasons(&self) -> Vec<String> {
        if self.item.paths.is_empty() {
            return vec!["server reported no file path".to_string()];
        }
        self.errors.iter().map(ToString::to_string).collect()
    }
}

/// Resolves server-reported paths to physical file identities
#[derive(Clone)]
pub struct AttributeResolver {
    provider: Arc<dyn AttributeProvider>,
    jellyfin_paths: PathMapper,
    plex_paths: PathMapper,
}

impl AttributeResolver {
    pub fn new(
        provider: Arc<dyn AttributeProvider>,
        jellyfin_paths: PathMapper,
        plex_paths: PathMapper,
    ) -> Self {
        Self {
            provider,
            jellyfin_paths,
            plex_paths,
        }
    }

    fn mapper(&self, server: ServerKind) -> &PathMapper {
        match server {
            ServerKind::Jellyfin => &self.jellyfin_paths,
            ServerKind::Plex => &self.plex_paths,
        }
    }

    /// Resolve one path exactly as `server` reported it
    pub async fn resolve_path(&self, server: ServerKind, reported: &str) -> Result<MediaFile, ResolveError> {
        validate_reported_path(reported)?;

        let host_path = self.mapper(server).map(Path::new(reported));
        trace!(server = %server, reported, host_path = %host_path.display(), "Mapped path");

        self.provider.resolve(&host_path).await
    }

    /// Resolve every path of an item; failures are kept per path
    pub async fn resolve_item(&self, item: LibraryItem) -> ResolvedItem {
        let mut files = Vec::with_capacity(item.paths.len());
        let mut errors = Vec::new();

        for path in &item.paths {
            match self.resolve_path(item.server, path).await {
                Ok(file) => files.push(file),
                Err(e) => {
                    debug!(server = %item.server, item_id = %item.id, error = %e, "Path did not resolve");
                    errors.push(e);
                }
            }
        }

        ResolvedItem { item, files, errors }
    }
}

fn validate_reported_path(path: &str) -> Result<(), ResolveError> {
    if path.trim().is_empty() {
        return Err(ResolveError::invalid(path, "empty path"));
    }
    if path.contains('\0') {
        return Err(ResolveError::invalid(path, "path contains a NUL byte"));
    }
    if !path.starts_with('/') {
        return Err(ResolveError::invalid(path, "path is not absolute"));
    }
    Ok(())
}
