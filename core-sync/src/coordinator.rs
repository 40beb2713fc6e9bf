//! # Sync Coordinator
//!
//! Runs one bounded reconciliation pass between Jellyfin and Plex.
//!
//! ## Workflow
//!
//! 1. Verify both servers (failure aborts the pass before any work)
//! 2. List both catalogs concurrently
//! 3. Resolve every item's file paths to physical identities
//! 4. Match items across servers
//! 5. Reconcile matched pairs on a bounded worker pool: fetch both states,
//!    diff, resolve the conflict, apply
//! 6. Assemble the run report
//!
//! Only setup failures (verification or listing) escape [`SyncCoordinator::run_pass`].
//! Everything that goes wrong for a single item or pair is recorded in the
//! report instead. A token fired during listing or resolution ends the pass
//! with an empty, cancelled report. Once reconciling, cancellation is checked
//! before each pair; pairs not yet started are reported as skipped.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncConfig, SyncCoordinator};
//! use tokio_util::sync::CancellationToken;
//!
//! let coordinator = SyncCoordinator::new(config, jellyfin, plex, resolver, strategy)?;
//! let report = coordinator.run_pass(CancellationToken::new()).await?;
//! println!("{}", report.summary());
//! ```

use crate::{
    conflict_resolver::ConflictResolver,
    executor::{ActionOutcome, SkipReason, SyncExecutor},
    identity::{IdentityMatcher, MatchedPair},
    report::{ItemOutcome, PlannedAction, RunReport},
    resolver::{AttributeResolver, ResolvedItem},
    state_differ::StateDiffer,
    Result, SyncError,
};
use bridge_traits::catalog::{CatalogAdapter, CatalogError, LibraryFilter, LibraryItem, ServerKind};
use bridge_traits::http::RetryPolicy;
use bridge_traits::time::{Clock, SystemClock};
use core_runtime::config::Settings;
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Sync coordinator configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Compute actions without applying them
    pub dry_run: bool,

    /// Matched pairs reconciled concurrently
    pub max_concurrent_pairs: usize,

    /// Item paths resolved concurrently
    pub max_concurrent_resolves: usize,

    /// Playback positions closer than this are the same progress
    pub position_tolerance: Duration,

    /// Enable the size + modification time matching stage
    pub loose_matching: bool,

    /// Retry policy for state reads and writes
    pub retry: RetryPolicy,

    pub jellyfin_filter: LibraryFilter,
    pub plex_filter: LibraryFilter,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_concurrent_pairs: 8,
            max_concurrent_resolves: 16,
            position_tolerance: Duration::from_secs(10),
            loose_matching: true,
            retry: RetryPolicy::default(),
            jellyfin_filter: LibraryFilter::all(),
            plex_filter: LibraryFilter::all(),
        }
    }
}

impl SyncConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            dry_run: settings.sync.dry_run,
            max_concurrent_pairs: settings.sync.max_concurrent_pairs,
            position_tolerance: Duration::from_secs(settings.sync.position_tolerance_secs),
            loose_matching: settings.sync.loose_matching,
            retry: RetryPolicy {
                max_attempts: settings.retry.max_attempts,
                base_delay: Duration::from_millis(settings.retry.base_delay_ms),
                max_delay: Duration::from_millis(settings.retry.max_delay_ms),
                use_exponential_backoff: true,
            },
            jellyfin_filter: LibraryFilter::named(settings.jellyfin.libraries.iter().cloned()),
            plex_filter: LibraryFilter::named(settings.plex.libraries.iter().cloned()),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_pairs == 0 || self.max_concurrent_resolves == 0 {
            return Err(SyncError::Config(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::Config("retry attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Orchestrates one sync pass
pub struct SyncCoordinator {
    config: SyncConfig,
    jellyfin: Arc<dyn CatalogAdapter>,
    plex: Arc<dyn CatalogAdapter>,
    resolver: AttributeResolver,
    strategy: Arc<dyn ConflictResolver>,
    matcher: IdentityMatcher,
    differ: StateDiffer,
    executor: SyncExecutor,
    clock: Arc<dyn Clock>,
}

impl SyncCoordinator {
    pub fn new(
        config: SyncConfig,
        jellyfin: Arc<dyn CatalogAdapter>,
        plex: Arc<dyn CatalogAdapter>,
        resolver: AttributeResolver,
        strategy: Arc<dyn ConflictResolver>,
    ) -> Result<Self> {
        config.validate()?;

        for (adapter, expected) in [(&jellyfin, ServerKind::Jellyfin), (&plex, ServerKind::Plex)] {
            if adapter.server() != expected {
                return Err(SyncError::Config(format!(
                    "adapter for {} reports server {}",
                    expected,
                    adapter.server()
                )));
            }
        }

        Ok(Self {
            matcher: IdentityMatcher::new(config.loose_matching),
            differ: StateDiffer::new(config.position_tolerance, config.retry.clone()),
            executor: SyncExecutor::new(config.retry.clone(), config.dry_run),
            config,
            jellyfin,
            plex,
            resolver,
            strategy,
            clock: Arc::new(SystemClock),
        })
    }

    /// Use a different time source for report timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn adapter(&self, server: ServerKind) -> &dyn CatalogAdapter {
        match server {
            ServerKind::Jellyfin => self.jellyfin.as_ref(),
            ServerKind::Plex => self.plex.as_ref(),
        }
    }

    /// Run one full reconciliation pass
    #[instrument(skip(self, cancel), fields(dry_run = self.config.dry_run, strategy = %self.strategy.name()))]
    pub async fn run_pass(&self, cancel: CancellationToken) -> Result<RunReport> {
        let mut report = RunReport::new(self.clock.now(), self.config.dry_run, self.strategy.name());

        info!("Phase 1: Verifying servers");
        tokio::try_join!(self.verify(ServerKind::Jellyfin), self.verify(ServerKind::Plex))?;

        info!("Phase 2: Listing libraries");
        let listing = async {
            tokio::try_join!(
                self.list(ServerKind::Jellyfin, &self.config.jellyfin_filter),
                self.list(ServerKind::Plex, &self.config.plex_filter),
            )
        };
        let (jellyfin_items, plex_items) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(self.interrupted(report, "listing")),
            listed = listing => listed?,
        };
        report.jellyfin_items = jellyfin_items.len();
        report.plex_items = plex_items.len();
        info!(
            jellyfin = jellyfin_items.len(),
            plex = plex_items.len(),
            "Listed library items"
        );

        info!("Phase 3: Resolving file identities");
        let resolving = async {
            let jellyfin = self.resolve_all(jellyfin_items).await;
            (jellyfin, self.resolve_all(plex_items).await)
        };
        let ((jellyfin_resolved, jellyfin_unresolved), (plex_resolved, plex_unresolved)) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(self.interrupted(report, "resolution")),
            resolved = resolving => resolved,
        };
        for unresolved in jellyfin_unresolved.iter().chain(plex_unresolved.iter()) {
            warn!(
                server = %unresolved.item.server,
                item_id = %unresolved.item.id,
                title = %unresolved.item.title,
                "Item excluded from matching: no resolvable file"
            );
            report.record(ItemOutcome::unresolvable(unresolved));
        }

        info!("Phase 4: Matching items");
        let outcome = self.matcher.match_items(jellyfin_resolved, plex_resolved);
        report.matched_count = outcome.pairs.len();
        for unmatched in &outcome.unmatched {
            debug!(
                server = %unmatched.item.server,
                item_id = %unmatched.item.id,
                reason = ?unmatched.reason,
                "Item unmatched"
            );
            report.record(ItemOutcome::unmatched(unmatched));
        }

        info!(pairs = outcome.pairs.len(), "Phase 5: Reconciling matched pairs");
        let results: Vec<(ItemOutcome, Option<PlannedAction>)> = futures::stream::iter(outcome.pairs)
            .map(|pair| self.reconcile_pair(pair, &cancel))
            .buffer_unordered(self.config.max_concurrent_pairs)
            .collect()
            .await;

        for (item, planned) in results {
            if let Some(planned) = planned {
                report.record_planned(planned);
            }
            report.record(item);
        }

        report.finish(self.clock.now());
        info!(run_id = %report.run_id, "{}", report.summary());
        Ok(report)
    }

    /// Close a pass cancelled before any pair was reconciled
    fn interrupted(&self, mut report: RunReport, phase: &str) -> RunReport {
        warn!(phase, "Sync pass cancelled before reconciling pairs");
        report.cancelled = true;
        report.finish(self.clock.now());
        report
    }

    async fn verify(&self, server: ServerKind) -> Result<()> {
        self.adapter(server).verify().await.map_err(|e| {
            warn!(server = %server, error = %e, "Server verification failed");
            setup_error(server, e)
        })
    }

    async fn list(&self, server: ServerKind, filter: &LibraryFilter) -> Result<Vec<LibraryItem>> {
        self.adapter(server)
            .list_items(filter)
            .try_collect()
            .await
            .map_err(|e| {
                warn!(server = %server, error = %e, "Listing failed");
                setup_error(server, e)
            })
    }

    /// Split items into those with at least one resolved file and the rest
    async fn resolve_all(&self, items: Vec<LibraryItem>) -> (Vec<ResolvedItem>, Vec<ResolvedItem>) {
        let resolved: Vec<ResolvedItem> = futures::stream::iter(items)
            .map(|item| self.resolver.resolve_item(item))
            .buffer_unordered(self.config.max_concurrent_resolves)
            .collect()
            .await;

        resolved.into_iter().partition(ResolvedItem::is_resolved)
    }

    /// Fetch, diff, resolve and execute for one pair
    async fn reconcile_pair(
        &self,
        pair: MatchedPair,
        cancel: &CancellationToken,
    ) -> (ItemOutcome, Option<PlannedAction>) {
        let (jellyfin_id, plex_id, title) = (
            pair.jellyfin.id.clone(),
            pair.plex.id.clone(),
            pair.jellyfin.title.clone(),
        );

        if cancel.is_cancelled() {
            return (
                ItemOutcome::Skipped {
                    jellyfin_id,
                    plex_id,
                    title,
                    direction: None,
                    reason: SkipReason::Cancelled,
                },
                None,
            );
        }

        let states = match self
            .differ
            .fetch(&pair, self.jellyfin.as_ref(), self.plex.as_ref())
            .await
        {
            Ok(states) => states,
            Err(error) => {
                warn!(jellyfin_id = %jellyfin_id, plex_id = %plex_id, error = %error, "Could not read watch state");
                return (
                    ItemOutcome::Failed {
                        jellyfin_id,
                        plex_id,
                        title,
                        direction: None,
                        attempts: 0,
                        error: error.to_string(),
                    },
                    None,
                );
            }
        };

        let Some(action) = self.differ.plan(&pair, &states, self.strategy.as_ref()) else {
            return (ItemOutcome::InSync { jellyfin_id, plex_id, title }, None);
        };

        let planned = PlannedAction::from(&action);
        let outcome = match action.direction.target() {
            Some(target) => self.executor.execute(&action, self.adapter(target)).await,
            None => ActionOutcome::Applied { attempts: 0 },
        };

        (ItemOutcome::from_action(&action, outcome), Some(planned))
    }
}

fn setup_error(server: ServerKind, error: CatalogError) -> SyncError {
    SyncError::FatalSetup {
        server,
        message: error.to_string(),
    }
}
