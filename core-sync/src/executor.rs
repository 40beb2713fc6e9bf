//! Sync Executor
//!
//! Applies [`SyncAction`]s through the target server's adapter.
//!
//! Transient failures are retried with exponential backoff up to the policy's
//! attempt limit; permanent failures and missing items fail immediately. In
//! dry-run mode nothing is written and every action is reported as skipped.

use crate::conflict_resolver::SyncDirection;
use crate::identity::MatchedPair;
use bridge_traits::catalog::{CatalogAdapter, CatalogError, LibraryItem, WatchState};
use bridge_traits::http::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{info, warn};

/// One state copy between the two sides of a pair
#[derive(Debug, Clone)]
pub struct SyncAction {
    pub pair: MatchedPair,
    pub direction: SyncDirection,
    pub reason: String,
    pub state_to_apply: WatchState,
}

impl SyncAction {
    /// Item whose state gets overwritten
    pub fn target_item(&self) -> Option<&LibraryItem> {
        match self.direction {
            SyncDirection::JellyfinToPlex => Some(&self.pair.plex),
            SyncDirection::PlexToJellyfin => Some(&self.pair.jellyfin),
            SyncDirection::None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DryRun,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Applied { attempts: u32 },
    Failed { attempts: u32, error: CatalogError },
    Skipped(SkipReason),
}

/// Run `operation` until it succeeds, fails permanently, or the policy's
/// attempts are exhausted. Returns the last result and the attempts made.
pub(crate) async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> (Result<T, CatalogError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CatalogError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return (Ok(value), attempt),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncExecutor {
    retry: RetryPolicy,
    dry_run: bool,
}

impl SyncExecutor {
    pub fn new(retry: RetryPolicy, dry_run: bool) -> Self {
        Self { retry, dry_run }
    }

    /// Apply one action to `target`, the adapter of the overwritten server
    pub async fn execute(&self, action: &SyncAction, target: &dyn CatalogAdapter) -> ActionOutcome {
        let Some(item) = action.target_item() else {
            return ActionOutcome::Applied { attempts: 0 };
        };

        if self.dry_run {
            info!(
                item_id = %item.id,
                title = %item.title,
                direction = %action.direction,
                state = %action.state_to_apply,
                "Dry run: would update watch state"
            );
            return ActionOutcome::Skipped(SkipReason::DryRun);
        }

        debug_assert_eq!(Some(target.server()), action.direction.target());

        let (id, state) = (&item.id, &action.state_to_apply);
        let (result, attempts) =
            retry_transient(&self.retry, "set_watch_state", move || target.set_watch_state(id, state)).await;

        match result {
            Ok(()) => {
                info!(
                    item_id = %item.id,
                    title = %item.title,
                    direction = %action.direction,
                    state = %action.state_to_apply,
                    attempts,
                    "Watch state updated"
                );
                ActionOutcome::Applied { attempts }
            }
            Err(error) => {
                warn!(
                    item_id = %item.id,
                    title = %item.title,
                    direction = %action.direction,
                    attempts,
                    error = %error,
                    "Failed to update watch state"
                );
                ActionOutcome::Failed { attempts, error }
            }
        }
    }
}
