//! Run Report
//!
//! Aggregated outcome of one sync pass: counts for external logging plus a
//! per-item detail list. Serializable so the binary can print it as JSON.

use crate::conflict_resolver::SyncDirection;
use crate::executor::{ActionOutcome, SkipReason, SyncAction};
use crate::identity::{MatchConfidence, UnmatchedItem, UnmatchedReason};
use crate::resolver::ResolvedItem;
use bridge_traits::catalog::{ItemId, ServerKind, WatchState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An action the pass decided on, whether or not it was applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub jellyfin_id: ItemId,
    pub plex_id: ItemId,
    pub title: String,
    pub direction: SyncDirection,
    pub confidence: MatchConfidence,
    pub reason: String,
    pub state: WatchState,
}

impl From<&SyncAction> for PlannedAction {
    fn from(action: &SyncAction) -> Self {
        Self {
            jellyfin_id: action.pair.jellyfin.id.clone(),
            plex_id: action.pair.plex.id.clone(),
            title: action.pair.jellyfin.title.clone(),
            direction: action.direction,
            confidence: action.pair.confidence,
            reason: action.reason.clone(),
            state: action.state_to_apply.clone(),
        }
    }
}

/// What happened to one item or pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    InSync {
        jellyfin_id: ItemId,
        plex_id: ItemId,
        title: String,
    },
    Applied {
        jellyfin_id: ItemId,
        plex_id: ItemId,
        title: String,
        direction: SyncDirection,
        attempts: u32,
    },
    Failed {
        jellyfin_id: ItemId,
        plex_id: ItemId,
        title: String,
        direction: Option<SyncDirection>,
        attempts: u32,
        error: String,
    },
    Skipped {
        jellyfin_id: ItemId,
        plex_id: ItemId,
        title: String,
        direction: Option<SyncDirection>,
        reason: SkipReason,
    },
    Unmatched {
        server: ServerKind,
        item_id: ItemId,
        title: String,
        reason: UnmatchedReason,
    },
    Unresolvable {
        server: ServerKind,
        item_id: ItemId,
        title: String,
        errors: Vec<String>,
    },
}

impl ItemOutcome {
    /// Outcome of executing `action`
    pub fn from_action(action: &SyncAction, outcome: ActionOutcome) -> Self {
        let (jellyfin_id, plex_id, title) = (
            action.pair.jellyfin.id.clone(),
            action.pair.plex.id.clone(),
            action.pair.jellyfin.title.clone(),
        );

        match outcome {
            ActionOutcome::Applied { attempts } => ItemOutcome::Applied {
                jellyfin_id,
                plex_id,
                title,
                direction: action.direction,
                attempts,
            },
            ActionOutcome::Failed { attempts, error } => ItemOutcome::Failed {
                jellyfin_id,
                plex_id,
                title,
                direction: Some(action.direction),
                attempts,
                error: error.to_string(),
            },
            ActionOutcome::Skipped(reason) => ItemOutcome::Skipped {
                jellyfin_id,
                plex_id,
                title,
                direction: Some(action.direction),
                reason,
            },
        }
    }

    pub fn unmatched(unmatched: &UnmatchedItem) -> Self {
        ItemOutcome::Unmatched {
            server: unmatched.item.server,
            item_id: unmatched.item.id.clone(),
            title: unmatched.item.title.clone(),
            reason: unmatched.reason,
        }
    }

    pub fn unresolvable(resolved: &ResolvedItem) -> Self {
        ItemOutcome::Unresolvable {
            server: resolved.item.server,
            item_id: resolved.item.id.clone(),
            title: resolved.item.title.clone(),
            errors: resolved.failure_reasons(),
        }
    }

    /// Key used to give the detail list a stable order
    fn sort_key(&self) -> (u8, &str, &str) {
        match self {
            ItemOutcome::InSync { jellyfin_id, plex_id, .. }
            | ItemOutcome::Applied { jellyfin_id, plex_id, .. }
            | ItemOutcome::Failed { jellyfin_id, plex_id, .. }
            | ItemOutcome::Skipped { jellyfin_id, plex_id, .. } => (0, jellyfin_id.as_str(), plex_id.as_str()),
            ItemOutcome::Unmatched { server, item_id, .. } | ItemOutcome::Unresolvable { server, item_id, .. } => {
                (1, server.as_str(), item_id.as_str())
            }
        }
    }
}

/// Summary of one sync pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub strategy: String,
    pub jellyfin_items: usize,
    pub plex_items: usize,
    pub matched_count: usize,
    pub unmatched_count: usize,
    pub unresolved_count: usize,
    pub in_sync_count: usize,
    pub actions_applied: usize,
    pub actions_failed: usize,
    pub actions_skipped: usize,
    /// Whether the pass was cancelled before every pair was reconciled
    pub cancelled: bool,
    /// Every action decided on, identical between dry and real runs
    pub actions: Vec<PlannedAction>,
    pub items: Vec<ItemOutcome>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, dry_run: bool, strategy: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: None,
            dry_run,
            strategy: strategy.into(),
            jellyfin_items: 0,
            plex_items: 0,
            matched_count: 0,
            unmatched_count: 0,
            unresolved_count: 0,
            in_sync_count: 0,
            actions_applied: 0,
            actions_failed: 0,
            actions_skipped: 0,
            cancelled: false,
            actions: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn record_planned(&mut self, action: PlannedAction) {
        self.actions.push(action);
    }

    /// Count and keep one outcome
    pub fn record(&mut self, outcome: ItemOutcome) {
        match &outcome {
            ItemOutcome::InSync { .. } => self.in_sync_count += 1,
            ItemOutcome::Applied { .. } => self.actions_applied += 1,
            ItemOutcome::Failed { .. } => self.actions_failed += 1,
            ItemOutcome::Skipped { reason, .. } => {
                self.actions_skipped += 1;
                if *reason == SkipReason::Cancelled {
                    self.cancelled = true;
                }
            }
            ItemOutcome::Unmatched { .. } => self.unmatched_count += 1,
            ItemOutcome::Unresolvable { .. } => self.unresolved_count += 1,
        }
        self.items.push(outcome);
    }

    /// Sort the detail lists and stamp the end time
    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.actions.sort_by(|a, b| {
            (a.jellyfin_id.as_str(), a.plex_id.as_str()).cmp(&(b.jellyfin_id.as_str(), b.plex_id.as_str()))
        });
        self.items.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        self.finished_at = Some(finished_at);
    }

    /// Whether any per-item failure was recorded
    pub fn has_failures(&self) -> bool {
        self.actions_failed > 0
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.finished_at.map(|end| (end - self.started_at).num_seconds())
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        let mode = if self.dry_run { " (dry run)" } else { "" };
        let elapsed = self
            .duration_secs()
            .map(|secs| format!(" in {}s", secs))
            .unwrap_or_default();
        let cancelled = if self.cancelled { ", cancelled" } else { "" };
        format!(
            "Sync pass{mode}{elapsed}: {jf} Jellyfin / {px} Plex items, {matched} matched, {unmatched} unmatched, \
             {unresolved} unresolvable, {in_sync} in sync, {applied} applied, {failed} failed, {skipped} skipped{cancelled}",
            jf = self.jellyfin_items,
            px = self.plex_items,
            matched = self.matched_count,
            unmatched = self.unmatched_count,
            unresolved = self.unresolved_count,
            in_sync = self.in_sync_count,
            applied = self.actions_applied,
            failed = self.actions_failed,
            skipped = self.actions_skipped,
        )
    }
}
