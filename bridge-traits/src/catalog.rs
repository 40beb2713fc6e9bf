//! Media Server Catalog Abstractions
//!
//! The common shape every media server adapter normalizes into: library items,
//! per-user watch state, and the capability trait used to read and write it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which media server family a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Jellyfin,
    Plex,
}

impl ServerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerKind::Jellyfin => "jellyfin",
            ServerKind::Plex => "plex",
        }
    }

    /// The server on the other side of a pair
    pub fn other(&self) -> ServerKind {
        match self {
            ServerKind::Jellyfin => ServerKind::Plex,
            ServerKind::Plex => ServerKind::Jellyfin,
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-assigned item identifier (Jellyfin item GUID, Plex `ratingKey`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Per-user playback state of one item
///
/// Positions are normalized to a [`Duration`] regardless of the unit the server
/// reports (Jellyfin ticks, Plex milliseconds).
///
/// States are ordered by how far the user has progressed:
/// watched > partially played further > partially played less > unwatched,
/// with `last_played_at` as the final tiebreak (see [`WatchState::compare`]).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WatchState {
    pub watched: bool,
    pub position: Option<Duration>,
    pub last_played_at: Option<DateTime<Utc>>,
}

impl WatchState {
    pub fn unwatched() -> Self {
        Self::default()
    }

    pub fn watched_at(at: Option<DateTime<Utc>>) -> Self {
        Self {
            watched: true,
            position: None,
            last_played_at: at,
        }
    }

    pub fn in_progress(position: Duration, at: Option<DateTime<Utc>>) -> Self {
        Self {
            watched: false,
            position: Some(position),
            last_played_at: at,
        }
    }

    /// Resume position, treating a zero offset as "not started"
    pub fn resume_position(&self) -> Option<Duration> {
        if self.watched {
            return None;
        }
        self.position.filter(|p| !p.is_zero())
    }

    pub fn is_in_progress(&self) -> bool {
        self.resume_position().is_some()
    }

    /// 2 = watched, 1 = partially played, 0 = unwatched
    pub fn progress_rank(&self) -> u8 {
        if self.watched {
            2
        } else if self.is_in_progress() {
            1
        } else {
            0
        }
    }

    /// Compare how far along the user is, ignoring when it happened.
    ///
    /// Two partially played states whose positions differ by no more than
    /// `tolerance` compare equal; two watched states always compare equal.
    pub fn cmp_progress(&self, other: &WatchState, tolerance: Duration) -> Ordering {
        match self.progress_rank().cmp(&other.progress_rank()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }

        match (self.resume_position(), other.resume_position()) {
            (Some(mine), Some(theirs)) => {
                let delta = if mine > theirs {
                    mine - theirs
                } else {
                    theirs - mine
                };
                if delta <= tolerance {
                    Ordering::Equal
                } else {
                    mine.cmp(&theirs)
                }
            }
            _ => Ordering::Equal,
        }
    }

    /// Total order: progress first, then `last_played_at` (missing sorts first)
    pub fn compare(&self, other: &WatchState, tolerance: Duration) -> Ordering {
        self.cmp_progress(other, tolerance)
            .then_with(|| self.last_played_at.cmp(&other.last_played_at))
    }

    /// Whether the two states describe the same progress
    pub fn same_progress(&self, other: &WatchState, tolerance: Duration) -> bool {
        self.cmp_progress(other, tolerance) == Ordering::Equal
    }
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.watched {
            f.write_str("watched")
        } else if let Some(position) = self.resume_position() {
            write!(f, "in progress at {}s", position.as_secs())
        } else {
            f.write_str("unwatched")
        }
    }
}

/// One media server's record of a playable item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryItem {
    pub id: ItemId,
    pub server: ServerKind,
    pub title: String,
    /// Library (Jellyfin view, Plex section) the item was listed from
    pub library: String,
    /// File paths exactly as the server reports them
    pub paths: Vec<String>,
    /// Watch state as included in the listing, if the server returned one
    pub watch_state: Option<WatchState>,
}

/// Which libraries to include in a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryFilter {
    /// Case-insensitive library names; empty means every movie and TV library
    pub names: Vec<String>,
}

impl LibraryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn accepts(&self, library_name: &str) -> bool {
        self.names.is_empty()
            || self
                .names
                .iter()
                .any(|name| name.trim().eq_ignore_ascii_case(library_name.trim()))
    }
}

/// Failure reported by a catalog adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Network failure, timeout, rate limiting or 5xx; worth retrying
    #[error("Transient {server} failure: {message}")]
    Transient { server: ServerKind, message: String },

    /// Authentication, 4xx or malformed payload; retrying will not help
    #[error("Permanent {server} failure: {message}")]
    Permanent { server: ServerKind, message: String },

    /// The item no longer exists on the server
    #[error("{server} item {item_id} not found")]
    NotFound { server: ServerKind, item_id: String },
}

impl CatalogError {
    pub fn transient(server: ServerKind, message: impl Into<String>) -> Self {
        CatalogError::Transient {
            server,
            message: message.into(),
        }
    }

    pub fn permanent(server: ServerKind, message: impl Into<String>) -> Self {
        CatalogError::Permanent {
            server,
            message: message.into(),
        }
    }

    /// Classify an HTTP status code returned by a media server
    pub fn from_status(server: ServerKind, status: u16, context: &str) -> Self {
        let message = format!("{} returned HTTP {}", context, status);
        if status == 408 || status == 429 || (500..600).contains(&status) {
            CatalogError::Transient { server, message }
        } else {
            CatalogError::Permanent { server, message }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::Transient { .. })
    }

    pub fn server(&self) -> ServerKind {
        match self {
            CatalogError::Transient { server, .. }
            | CatalogError::Permanent { server, .. }
            | CatalogError::NotFound { server, .. } => *server,
        }
    }
}

/// Media server capability consumed by the synchronization engine
///
/// One implementation exists per server family. Implementations must never
/// coerce a failed request into success: every non-2xx response or transport
/// error is surfaced as a [`CatalogError`] with the right classification.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::catalog::{CatalogAdapter, LibraryFilter};
/// use futures::TryStreamExt;
///
/// async fn count(adapter: &dyn CatalogAdapter) -> Result<usize, CatalogError> {
///     let filter = LibraryFilter::all();
///     let items: Vec<_> = adapter.list_items(&filter).try_collect().await?;
///     Ok(items.len())
/// }
/// ```
#[async_trait]
pub trait CatalogAdapter: Send + Sync {
    /// Which server family this adapter talks to
    fn server(&self) -> ServerKind;

    /// Authenticate and confirm the server is reachable
    async fn verify(&self) -> Result<(), CatalogError>;

    /// Lazily list every playable item in the selected libraries.
    ///
    /// The stream is finite and consumed once per pass.
    fn list_items<'a>(
        &'a self,
        filter: &'a LibraryFilter,
    ) -> BoxStream<'a, Result<LibraryItem, CatalogError>>;

    /// Read the current watch state of one item
    async fn get_watch_state(&self, item: &ItemId) -> Result<WatchState, CatalogError>;

    /// Overwrite the watch state of one item with a single remote call
    async fn set_watch_state(&self, item: &ItemId, state: &WatchState) -> Result<(), CatalogError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TOLERANCE: Duration = Duration::from_secs(10);

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn test_progress_order() {
        let unwatched = WatchState::unwatched();
        let early = WatchState::in_progress(Duration::from_secs(60), at(10));
        let late = WatchState::in_progress(Duration::from_secs(1200), at(5));
        let watched = WatchState::watched_at(None);

        assert_eq!(watched.cmp_progress(&late, TOLERANCE), Ordering::Greater);
        assert_eq!(late.cmp_progress(&early, TOLERANCE), Ordering::Greater);
        assert_eq!(early.cmp_progress(&unwatched, TOLERANCE), Ordering::Greater);
        assert_eq!(unwatched.cmp_progress(&watched, TOLERANCE), Ordering::Less);
    }

    #[test]
    fn test_zero_position_is_unwatched() {
        let zero = WatchState::in_progress(Duration::ZERO, at(100));
        assert_eq!(zero.progress_rank(), 0);
        assert!(zero.same_progress(&WatchState::unwatched(), TOLERANCE));
    }

    #[test]
    fn test_positions_within_tolerance_are_equal() {
        let a = WatchState::in_progress(Duration::from_secs(600), at(1));
        let b = WatchState::in_progress(Duration::from_secs(605), at(2));
        assert!(a.same_progress(&b, TOLERANCE));
        // the full order still distinguishes them by timestamp
        assert_eq!(a.compare(&b, TOLERANCE), Ordering::Less);
    }

    #[test]
    fn test_watched_ignores_position() {
        let mut a = WatchState::watched_at(at(1));
        a.position = Some(Duration::from_secs(30));
        let b = WatchState::watched_at(at(99));
        assert!(a.same_progress(&b, TOLERANCE));
    }

    #[test]
    fn test_library_filter() {
        let filter = LibraryFilter::named(["Movies", " TV Shows "]);
        assert!(filter.accepts("movies"));
        assert!(filter.accepts("TV Shows"));
        assert!(!filter.accepts("Music"));
        assert!(LibraryFilter::all().accepts("anything"));
    }

    #[test]
    fn test_error_classification() {
        assert!(CatalogError::from_status(ServerKind::Plex, 503, "scrobble").is_retryable());
        assert!(CatalogError::from_status(ServerKind::Plex, 429, "scrobble").is_retryable());
        assert!(!CatalogError::from_status(ServerKind::Jellyfin, 401, "items").is_retryable());

        let gone = CatalogError::NotFound {
            server: ServerKind::Jellyfin,
            item_id: "abc".to_string(),
        };
        assert!(!gone.is_retryable());
        assert_eq!(gone.server(), ServerKind::Jellyfin);
    }
}
