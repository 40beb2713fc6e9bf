//! Conflict Resolution for Watch State
//!
//! Decides which side of a matched pair wins when the two servers disagree.
//!
//! ## Conflict Policies
//!
//! - **MoreAdvancedWins** (default): the state further along propagates, so a
//!   user's progress is never regressed
//! - **JellyfinAuthoritative** / **PlexAuthoritative**: one server always wins
//! - **Bidirectional**: the most recently played side wins; a configurable
//!   tiebreak decides when timestamps are missing or equal
//!
//! Any type implementing [`ConflictResolver`] can be plugged into the
//! coordinator. Every resolver must return [`SyncDirection::None`] for two
//! states with the same progress.
//!
//! ## Usage
//!
//! ```ignore
//! use core_sync::conflict_resolver::{ConflictPolicy, ConflictResolver, SyncDirection};
//!
//! let policy = ConflictPolicy::MoreAdvancedWins;
//! let direction = policy.resolve(&jellyfin_state, &plex_state, Duration::from_secs(10));
//! assert_eq!(direction, SyncDirection::JellyfinToPlex);
//! ```

use bridge_traits::catalog::{ServerKind, WatchState};
use core_runtime::config::{StrategySetting, TiebreakSetting};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

/// Which way a state should be copied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    JellyfinToPlex,
    PlexToJellyfin,
    None,
}

impl SyncDirection {
    /// Server whose state is copied
    pub fn source(&self) -> Option<ServerKind> {
        match self {
            SyncDirection::JellyfinToPlex => Some(ServerKind::Jellyfin),
            SyncDirection::PlexToJellyfin => Some(ServerKind::Plex),
            SyncDirection::None => None,
        }
    }

    /// Server whose state is overwritten
    pub fn target(&self) -> Option<ServerKind> {
        self.source().map(|server| server.other())
    }

    fn from_winner(winner: ServerKind) -> Self {
        match winner {
            ServerKind::Jellyfin => SyncDirection::JellyfinToPlex,
            ServerKind::Plex => SyncDirection::PlexToJellyfin,
        }
    }

    fn from_ordering(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Greater => SyncDirection::JellyfinToPlex,
            Ordering::Less => SyncDirection::PlexToJellyfin,
            Ordering::Equal => SyncDirection::None,
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::JellyfinToPlex => f.write_str("jellyfin -> plex"),
            SyncDirection::PlexToJellyfin => f.write_str("plex -> jellyfin"),
            SyncDirection::None => f.write_str("none"),
        }
    }
}

/// Strategy deciding the direction for a pair whose states differ
pub trait ConflictResolver: Send + Sync {
    /// Name recorded in the run report
    fn name(&self) -> String;

    fn resolve(&self, jellyfin: &WatchState, plex: &WatchState, tolerance: Duration) -> SyncDirection;
}

/// Bidirectional tiebreak when play timestamps do not decide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tiebreak {
    #[default]
    MoreAdvanced,
    Jellyfin,
    Plex,
}

/// Built-in conflict policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// The more advanced state propagates
    #[default]
    MoreAdvancedWins,

    /// Jellyfin's state always propagates
    JellyfinAuthoritative,

    /// Plex's state always propagates
    PlexAuthoritative,

    /// The most recently played side propagates
    Bidirectional { tiebreak: Tiebreak },
}

impl ConflictPolicy {
    pub fn from_settings(strategy: StrategySetting, tiebreak: TiebreakSetting) -> Self {
        match strategy {
            StrategySetting::MoreAdvancedWins => ConflictPolicy::MoreAdvancedWins,
            StrategySetting::JellyfinAuthoritative => ConflictPolicy::JellyfinAuthoritative,
            StrategySetting::PlexAuthoritative => ConflictPolicy::PlexAuthoritative,
            StrategySetting::Bidirectional => ConflictPolicy::Bidirectional {
                tiebreak: match tiebreak {
                    TiebreakSetting::MoreAdvanced => Tiebreak::MoreAdvanced,
                    TiebreakSetting::Jellyfin => Tiebreak::Jellyfin,
                    TiebreakSetting::Plex => Tiebreak::Plex,
                },
            },
        }
    }
}

impl ConflictResolver for ConflictPolicy {
    fn name(&self) -> String {
        match self {
            ConflictPolicy::MoreAdvancedWins => "more-advanced-wins".to_string(),
            ConflictPolicy::JellyfinAuthoritative => "jellyfin-authoritative".to_string(),
            ConflictPolicy::PlexAuthoritative => "plex-authoritative".to_string(),
            ConflictPolicy::Bidirectional { tiebreak } => {
                let tiebreak = match tiebreak {
                    Tiebreak::MoreAdvanced => "more-advanced",
                    Tiebreak::Jellyfin => "jellyfin",
                    Tiebreak::Plex => "plex",
                };
                format!("bidirectional ({} tiebreak)", tiebreak)
            }
        }
    }

    fn resolve(&self, jellyfin: &WatchState, plex: &WatchState, tolerance: Duration) -> SyncDirection {
        let progress = jellyfin.cmp_progress(plex, tolerance);
        if progress == Ordering::Equal {
            return SyncDirection::None;
        }

        match self {
            ConflictPolicy::MoreAdvancedWins => SyncDirection::from_ordering(progress),
            ConflictPolicy::JellyfinAuthoritative => SyncDirection::JellyfinToPlex,
            ConflictPolicy::PlexAuthoritative => SyncDirection::PlexToJellyfin,
            ConflictPolicy::Bidirectional { tiebreak } => {
                match (jellyfin.last_played_at, plex.last_played_at) {
                    (Some(j), Some(p)) if j != p => SyncDirection::from_ordering(j.cmp(&p)),
                    _ => match tiebreak {
                        Tiebreak::MoreAdvanced => SyncDirection::from_ordering(progress),
                        Tiebreak::Jellyfin => SyncDirection::from_winner(ServerKind::Jellyfin),
                        Tiebreak::Plex => SyncDirection::from_winner(ServerKind::Plex),
                    },
                }
            }
        }
    }
}
