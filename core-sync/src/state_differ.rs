//! State Differ
//!
//! Fetches both sides' watch state for a matched pair and establishes whether
//! they disagree. Choosing a direction is left to the
//! [`ConflictResolver`](crate::conflict_resolver::ConflictResolver).

use crate::conflict_resolver::{ConflictResolver, SyncDirection};
use crate::executor::{retry_transient, SyncAction};
use crate::identity::MatchedPair;
use bridge_traits::catalog::{CatalogAdapter, CatalogError, WatchState};
use bridge_traits::http::RetryPolicy;
use std::time::Duration;
use tracing::trace;

/// Current state of both sides of a pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairStates {
    pub jellyfin: WatchState,
    pub plex: WatchState,
}

#[derive(Debug, Clone)]
pub struct StateDiffer {
    tolerance: Duration,
    retry: RetryPolicy,
}

impl StateDiffer {
    pub fn new(tolerance: Duration, retry: RetryPolicy) -> Self {
        Self { tolerance, retry }
    }

    /// Read both states concurrently; transient read failures are retried
    pub async fn fetch(
        &self,
        pair: &MatchedPair,
        jellyfin: &dyn CatalogAdapter,
        plex: &dyn CatalogAdapter,
    ) -> Result<PairStates, CatalogError> {
        let (jellyfin_id, plex_id) = (&pair.jellyfin.id, &pair.plex.id);

        let ((jellyfin_state, _), (plex_state, _)) = tokio::join!(
            retry_transient(&self.retry, "get_watch_state", move || jellyfin.get_watch_state(jellyfin_id)),
            retry_transient(&self.retry, "get_watch_state", move || plex.get_watch_state(plex_id)),
        );

        Ok(PairStates {
            jellyfin: jellyfin_state?,
            plex: plex_state?,
        })
    }

    /// Whether the two states describe different progress
    pub fn differs(&self, states: &PairStates) -> bool {
        !states.jellyfin.same_progress(&states.plex, self.tolerance)
    }

    /// Build the action for a pair, or `None` when nothing needs copying
    pub fn plan(
        &self,
        pair: &MatchedPair,
        states: &PairStates,
        resolver: &dyn ConflictResolver,
    ) -> Option<SyncAction> {
        if !self.differs(states) {
            trace!(jellyfin_id = %pair.jellyfin.id, plex_id = %pair.plex.id, "States agree");
            return None;
        }

        let direction = resolver.resolve(&states.jellyfin, &states.plex, self.tolerance);
        let state_to_apply = match direction {
            SyncDirection::JellyfinToPlex => states.jellyfin.clone(),
            SyncDirection::PlexToJellyfin => states.plex.clone(),
            SyncDirection::None => return None,
        };

        Some(SyncAction {
            pair: pair.clone(),
            direction,
            reason: format!(
                "{}: jellyfin {}, plex {}",
                resolver.name(),
                states.jellyfin,
                states.plex
            ),
            state_to_apply,
        })
    }
}
