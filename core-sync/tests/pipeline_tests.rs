//! Integration tests for a full sync pass
//!
//! These tests run the coordinator end to end against in-memory servers and an
//! in-memory filesystem:
//! - Identity matching across divergent mount paths
//! - Direction of propagated state and the resulting server state
//! - Idempotence of consecutive passes
//! - Dry-run producing the same plan without writes
//! - Partial failures, setup failures and cancellation
//! - Report timestamps from an injected clock

use async_trait::async_trait;
use bridge_traits::attributes::{AttributeProvider, MediaFile, ResolveError};
use bridge_traits::catalog::{
    CatalogAdapter, CatalogError, ItemId, LibraryFilter, LibraryItem, ServerKind, WatchState,
};
use bridge_traits::http::RetryPolicy;
use bridge_traits::time::FixedClock;
use chrono::{TimeZone, Utc};
use core_sync::{
    AttributeResolver, ConflictPolicy, ConflictResolver, ItemOutcome, MatchConfidence, PathMapper,
    SkipReason, SyncConfig, SyncCoordinator, SyncDirection, SyncError, UnmatchedReason,
};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MB: u64 = 1024 * 1024;

// ============================================================================
// Fake Implementations
// ============================================================================

/// In-memory media server
struct FakeCatalog {
    server: ServerKind,
    items: Vec<LibraryItem>,
    states: Mutex<HashMap<ItemId, WatchState>>,
    scripted_write_errors: Mutex<HashMap<ItemId, VecDeque<CatalogError>>>,
    write_attempts: Mutex<HashMap<ItemId, u32>>,
    writes: AtomicUsize,
    fail_verify: bool,
    fail_listing: bool,
    stall_listing: bool,
    cancel_on_write: Option<CancellationToken>,
}

impl FakeCatalog {
    fn new(server: ServerKind) -> Self {
        Self {
            server,
            items: Vec::new(),
            states: Mutex::new(HashMap::new()),
            scripted_write_errors: Mutex::new(HashMap::new()),
            write_attempts: Mutex::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            fail_verify: false,
            fail_listing: false,
            stall_listing: false,
            cancel_on_write: None,
        }
    }

    fn with_item(mut self, id: &str, title: &str, path: &str, state: WatchState) -> Self {
        let id = ItemId::new(id);
        self.items.push(LibraryItem {
            id: id.clone(),
            server: self.server,
            title: title.to_string(),
            library: "Library".to_string(),
            paths: vec![path.to_string()],
            watch_state: Some(state.clone()),
        });
        self.states.get_mut().unwrap().insert(id, state);
        self
    }

    fn failing_writes(self, id: &str, errors: Vec<CatalogError>) -> Self {
        self.scripted_write_errors
            .lock()
            .unwrap()
            .insert(ItemId::new(id), errors.into());
        self
    }

    fn state(&self, id: &str) -> WatchState {
        self.states.lock().unwrap()[&ItemId::new(id)].clone()
    }

    fn successful_writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn attempts(&self, id: &str) -> u32 {
        self.write_attempts
            .lock()
            .unwrap()
            .get(&ItemId::new(id))
            .copied()
            .unwrap_or(0)
    }

    fn total_attempts(&self) -> u32 {
        self.write_attempts.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl CatalogAdapter for FakeCatalog {
    fn server(&self) -> ServerKind {
        self.server
    }

    async fn verify(&self) -> Result<(), CatalogError> {
        if self.fail_verify {
            return Err(CatalogError::permanent(self.server, "401 Unauthorized"));
        }
        Ok(())
    }

    fn list_items<'a>(&'a self, _filter: &'a LibraryFilter) -> BoxStream<'a, Result<LibraryItem, CatalogError>> {
        if self.stall_listing {
            return stream::pending::<Result<LibraryItem, CatalogError>>().boxed();
        }
        let mut results: Vec<Result<LibraryItem, CatalogError>> = self.items.iter().cloned().map(Ok).collect();
        if self.fail_listing {
            results.push(Err(CatalogError::transient(self.server, "connection reset")));
        }
        stream::iter(results).boxed()
    }

    async fn get_watch_state(&self, item: &ItemId) -> Result<WatchState, CatalogError> {
        self.states
            .lock()
            .unwrap()
            .get(item)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound {
                server: self.server,
                item_id: item.to_string(),
            })
    }

    async fn set_watch_state(&self, item: &ItemId, state: &WatchState) -> Result<(), CatalogError> {
        *self.write_attempts.lock().unwrap().entry(item.clone()).or_default() += 1;

        if let Some(error) = self
            .scripted_write_errors
            .lock()
            .unwrap()
            .get_mut(item)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        self.states.lock().unwrap().insert(item.clone(), state.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_write {
            token.cancel();
        }
        Ok(())
    }
}

/// In-memory union filesystem: host path -> (branch-independent path, size)
#[derive(Default)]
struct FakeFilesystem {
    files: HashMap<PathBuf, (PathBuf, u64)>,
}

impl FakeFilesystem {
    /// Make `relative` visible under the merged root and under `branch`
    fn with_file(mut self, branch: &str, relative: &str, size: u64) -> Self {
        let relative_path = PathBuf::from(relative);
        let trimmed = relative.trim_start_matches('/');
        for root in ["/mnt/merged", branch] {
            self.files
                .insert(Path::new(root).join(trimmed), (relative_path.clone(), size));
        }
        self
    }
}

#[async_trait]
impl AttributeProvider for FakeFilesystem {
    async fn resolve(&self, path: &Path) -> Result<MediaFile, ResolveError> {
        let (relative_path, size) = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| ResolveError::unresolvable(path.display().to_string(), "file not found"))?;

        Ok(MediaFile {
            source_path: path.to_path_buf(),
            real_path: path.to_path_buf(),
            relative_path,
            branch: None,
            size,
            modified_at: None,
            inode: None,
            content_hash: None,
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn fast_config() -> SyncConfig {
    SyncConfig {
        max_concurrent_pairs: 4,
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            use_exponential_backoff: true,
        },
        ..SyncConfig::default()
    }
}

/// Jellyfin sees the library under `/media`, Plex under `/data` or directly
/// through the merged mount
fn resolver(fs: FakeFilesystem) -> AttributeResolver {
    AttributeResolver::new(
        Arc::new(fs),
        PathMapper::new([("/media", "/mnt/merged")]),
        PathMapper::new([("/data", "/mnt/merged")]),
    )
}

fn coordinator(
    jellyfin: &Arc<FakeCatalog>,
    plex: &Arc<FakeCatalog>,
    fs: FakeFilesystem,
    config: SyncConfig,
    strategy: Arc<dyn ConflictResolver>,
) -> SyncCoordinator {
    SyncCoordinator::new(config, jellyfin.clone(), plex.clone(), resolver(fs), strategy).unwrap()
}

fn more_advanced() -> Arc<dyn ConflictResolver> {
    Arc::new(ConflictPolicy::MoreAdvancedWins)
}

fn episode_fs() -> FakeFilesystem {
    FakeFilesystem::default().with_file("/mnt/disk1", "/tv/Show/S01E01.mkv", 900 * MB)
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

/// Ten episodes on both servers with assorted, mostly diverging states
fn season(jellyfin_states: &[WatchState], plex_states: &[WatchState]) -> (FakeCatalog, FakeCatalog, FakeFilesystem) {
    let mut jellyfin = FakeCatalog::new(ServerKind::Jellyfin);
    let mut plex = FakeCatalog::new(ServerKind::Plex);
    let mut fs = FakeFilesystem::default();

    for (episode, (j, p)) in jellyfin_states.iter().zip(plex_states).enumerate() {
        let relative = format!("/tv/Show/S01E{:02}.mkv", episode + 1);
        let branch = if episode % 2 == 0 { "/mnt/disk1" } else { "/mnt/disk2" };
        fs = fs.with_file(branch, &relative, 500 * MB + episode as u64);

        jellyfin = jellyfin.with_item(
            &format!("jf-{}", episode),
            &format!("Show S01E{:02}", episode + 1),
            &format!("/media{}", relative),
            j.clone(),
        );
        plex = plex.with_item(
            &format!("px-{}", episode),
            &format!("Show S01E{:02}", episode + 1),
            &format!("{}{}", branch, relative),
            p.clone(),
        );
    }

    (jellyfin, plex, fs)
}

fn assorted_states() -> (Vec<WatchState>, Vec<WatchState>) {
    let jellyfin = vec![
        WatchState::watched_at(None),
        WatchState::unwatched(),
        WatchState::in_progress(minutes(20), None),
        WatchState::in_progress(minutes(5), None),
        WatchState::watched_at(None),
        WatchState::unwatched(),
        WatchState::in_progress(minutes(40), None),
        WatchState::unwatched(),
        WatchState::watched_at(None),
        WatchState::in_progress(minutes(1), None),
    ];
    let plex = vec![
        WatchState::unwatched(),
        WatchState::watched_at(None),
        WatchState::in_progress(minutes(30), None),
        WatchState::unwatched(),
        WatchState::watched_at(None),
        WatchState::unwatched(),
        WatchState::in_progress(Duration::from_secs(40 * 60 + 4), None),
        WatchState::in_progress(minutes(12), None),
        WatchState::in_progress(minutes(12), None),
        WatchState::watched_at(None),
    ];
    (jellyfin, plex)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_same_file_through_different_mounts_is_exact_match() {
    let jellyfin = Arc::new(FakeCatalog::new(ServerKind::Jellyfin).with_item(
        "jf-1",
        "Show S01E01",
        "/media/tv/Show/S01E01.mkv",
        WatchState::watched_at(None),
    ));
    let plex = Arc::new(FakeCatalog::new(ServerKind::Plex).with_item(
        "px-1",
        "Show S01E01",
        "/mnt/merged/tv/Show/S01E01.mkv",
        WatchState::unwatched(),
    ));

    let report = coordinator(&jellyfin, &plex, episode_fs(), fast_config(), more_advanced())
        .run_pass(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.matched_count, 1);
    assert_eq!(report.unmatched_count, 0);
    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.actions[0].confidence, MatchConfidence::Exact);
}

#[tokio::test]
async fn test_watched_on_jellyfin_propagates_to_plex() {
    let jellyfin = Arc::new(FakeCatalog::new(ServerKind::Jellyfin).with_item(
        "jf-1",
        "Show S01E01",
        "/media/tv/Show/S01E01.mkv",
        WatchState::watched_at(None),
    ));
    let plex = Arc::new(FakeCatalog::new(ServerKind::Plex).with_item(
        "px-1",
        "Show S01E01",
        "/mnt/merged/tv/Show/S01E01.mkv",
        WatchState::unwatched(),
    ));

    let report = coordinator(&jellyfin, &plex, episode_fs(), fast_config(), more_advanced())
        .run_pass(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.actions[0].direction, SyncDirection::JellyfinToPlex);
    assert_eq!(report.actions_applied, 1);
    assert!(plex.state("px-1").watched);
    assert_eq!(jellyfin.successful_writes(), 0);
}

#[tokio::test]
async fn test_progress_propagates_from_plex() {
    let jellyfin = Arc::new(FakeCatalog::new(ServerKind::Jellyfin).with_item(
        "jf-1",
        "Show S01E01",
        "/media/tv/Show/S01E01.mkv",
        WatchState::unwatched(),
    ));
    let plex = Arc::new(FakeCatalog::new(ServerKind::Plex).with_item(
        "px-1",
        "Show S01E01",
        "/data/tv/Show/S01E01.mkv",
        WatchState::in_progress(minutes(20), None),
    ));

    let report = coordinator(&jellyfin, &plex, episode_fs(), fast_config(), more_advanced())
        .run_pass(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.actions[0].direction, SyncDirection::PlexToJellyfin);
    assert_eq!(jellyfin.state("jf-1").resume_position(), Some(minutes(20)));
}

#[tokio::test]
async fn test_file_deleted_from_plex_is_unmatched() {
    let fs = episode_fs().with_file("/mnt/disk2", "/movies/Film (2020)/Film.mkv", 4_000 * MB);
    let jellyfin = Arc::new(
        FakeCatalog::new(ServerKind::Jellyfin)
            .with_item("jf-1", "Show S01E01", "/media/tv/Show/S01E01.mkv", WatchState::unwatched())
            .with_item(
                "jf-2",
                "Film",
                "/media/movies/Film (2020)/Film.mkv",
                WatchState::watched_at(None),
            ),
    );
    let plex = Arc::new(FakeCatalog::new(ServerKind::Plex).with_item(
        "px-1",
        "Show S01E01",
        "/data/tv/Show/S01E01.mkv",
        WatchState::unwatched(),
    ));

    let report = coordinator(&jellyfin, &plex, fs, fast_config(), more_advanced())
        .run_pass(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.matched_count, 1);
    assert_eq!(report.unmatched_count, 1);
    assert!(report.actions.is_empty());
    assert!(report.items.iter().any(|item| matches!(
        item,
        ItemOutcome::Unmatched { item_id, reason: UnmatchedReason::Absent, .. } if item_id.as_str() == "jf-2"
    )));
    assert_eq!(plex.total_attempts(), 0);
}

#[tokio::test]
async fn test_persistent_503_fails_one_action_only() {
    let (jellyfin_states, _) = assorted_states();
    let plex_states = vec![WatchState::unwatched(); jellyfin_states.len()];
    let (jellyfin, plex, fs) = season(&jellyfin_states, &plex_states);

    let unavailable = || CatalogError::from_status(ServerKind::Plex, 503, "scrobble");
    let plex = Arc::new(plex.failing_writes("px-0", vec![unavailable(), unavailable(), unavailable()]));
    let jellyfin = Arc::new(jellyfin);

    let report = coordinator(&jellyfin, &plex, fs, fast_config(), more_advanced())
        .run_pass(CancellationToken::new())
        .await
        .unwrap();

    // episodes 0, 2, 3, 4, 6, 8 and 9 are ahead on Jellyfin
    assert_eq!(report.actions.len(), 7);
    assert_eq!(report.actions_failed, 1);
    assert_eq!(report.actions_applied, 6);
    assert_eq!(plex.attempts("px-0"), 3);
    assert!(!plex.state("px-0").watched);
    assert!(plex.state("px-4").watched);

    let failed = report
        .items
        .iter()
        .find(|item| matches!(item, ItemOutcome::Failed { .. }))
        .unwrap();
    assert!(matches!(failed, ItemOutcome::Failed { attempts: 3, plex_id, .. } if plex_id.as_str() == "px-0"));
}

#[tokio::test]
async fn test_permanent_write_failure_is_not_retried() {
    let jellyfin = Arc::new(FakeCatalog::new(ServerKind::Jellyfin).with_item(
        "jf-1",
        "Show S01E01",
        "/media/tv/Show/S01E01.mkv",
        WatchState::watched_at(None),
    ));
    let plex = Arc::new(
        FakeCatalog::new(ServerKind::Plex)
            .with_item("px-1", "Show S01E01", "/data/tv/Show/S01E01.mkv", WatchState::unwatched())
            .failing_writes("px-1", vec![CatalogError::from_status(ServerKind::Plex, 403, "scrobble")]),
    );

    let report = coordinator(&jellyfin, &plex, episode_fs(), fast_config(), more_advanced())
        .run_pass(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.actions_failed, 1);
    assert_eq!(plex.attempts("px-1"), 1);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let (jellyfin_states, plex_states) = assorted_states();
    let (jellyfin, plex, fs) = season(&jellyfin_states, &plex_states);
    let (jellyfin, plex) = (Arc::new(jellyfin), Arc::new(plex));
    let coordinator = coordinator(&jellyfin, &plex, fs, fast_config(), more_advanced());

    let first = coordinator.run_pass(CancellationToken::new()).await.unwrap();
    assert!(!first.actions.is_empty());
    assert_eq!(first.actions_failed, 0);

    let second = coordinator.run_pass(CancellationToken::new()).await.unwrap();
    assert!(second.actions.is_empty());
    assert_eq!(second.actions_applied, 0);
    assert_eq!(second.in_sync_count, 10);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_idempotent_for_every_policy() {
    let policies: Vec<Arc<dyn ConflictResolver>> = vec![
        Arc::new(ConflictPolicy::MoreAdvancedWins),
        Arc::new(ConflictPolicy::JellyfinAuthoritative),
        Arc::new(ConflictPolicy::PlexAuthoritative),
        Arc::new(ConflictPolicy::Bidirectional {
            tiebreak: core_sync::Tiebreak::Plex,
        }),
    ];

    for policy in policies {
        let (jellyfin_states, plex_states) = assorted_states();
        let (jellyfin, plex, fs) = season(&jellyfin_states, &plex_states);
        let (jellyfin, plex) = (Arc::new(jellyfin), Arc::new(plex));
        let coordinator = coordinator(&jellyfin, &plex, fs, fast_config(), policy.clone());

        coordinator.run_pass(CancellationToken::new()).await.unwrap();
        let second = coordinator.run_pass(CancellationToken::new()).await.unwrap();
        assert!(second.actions.is_empty(), "{} not idempotent", policy.name());
    }
}

#[tokio::test]
async fn test_dry_run_plans_same_actions_without_writes() {
    let (jellyfin_states, plex_states) = assorted_states();

    let (jellyfin, plex, fs) = season(&jellyfin_states, &plex_states);
    let (dry_jellyfin, dry_plex) = (Arc::new(jellyfin), Arc::new(plex));
    let dry_config = SyncConfig {
        dry_run: true,
        ..fast_config()
    };
    let dry = coordinator(&dry_jellyfin, &dry_plex, fs, dry_config, more_advanced())
        .run_pass(CancellationToken::new())
        .await
        .unwrap();

    let (jellyfin, plex, fs) = season(&jellyfin_states, &plex_states);
    let (real_jellyfin, real_plex) = (Arc::new(jellyfin), Arc::new(plex));
    let real = coordinator(&real_jellyfin, &real_plex, fs, fast_config(), more_advanced())
        .run_pass(CancellationToken::new())
        .await
        .unwrap();

    assert!(dry.dry_run);
    assert_eq!(dry_jellyfin.total_attempts() + dry_plex.total_attempts(), 0);
    assert_eq!(dry.actions_skipped, dry.actions.len());
    assert_eq!(dry.actions, real.actions);
    assert!(real.actions_applied > 0);
}

#[tokio::test]
async fn test_more_advanced_wins_copies_watched_forward() {
    let jellyfin_states = vec![WatchState::watched_at(None); 4];
    let plex_states = vec![
        WatchState::unwatched(),
        WatchState::in_progress(minutes(3), None),
        WatchState::in_progress(minutes(59), None),
        WatchState::unwatched(),
    ];
    let (jellyfin, plex, fs) = season(&jellyfin_states, &plex_states);
    let (jellyfin, plex) = (Arc::new(jellyfin), Arc::new(plex));

    let report = coordinator(&jellyfin, &plex, fs, fast_config(), more_advanced())
        .run_pass(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.actions.len(), 4);
    assert!(report
        .actions
        .iter()
        .all(|action| action.direction == SyncDirection::JellyfinToPlex));
    assert_eq!(jellyfin.total_attempts(), 0);
}

#[tokio::test]
async fn test_duplicate_items_are_never_paired() {
    let jellyfin = Arc::new(FakeCatalog::new(ServerKind::Jellyfin).with_item(
        "jf-1",
        "Show S01E01",
        "/media/tv/Show/S01E01.mkv",
        WatchState::watched_at(None),
    ));
    let plex = Arc::new(
        FakeCatalog::new(ServerKind::Plex)
            .with_item("px-1", "Show S01E01", "/data/tv/Show/S01E01.mkv", WatchState::unwatched())
            .with_item("px-2", "Show S01E01 (copy)", "/mnt/disk1/tv/Show/S01E01.mkv", WatchState::unwatched()),
    );

    let report = coordinator(&jellyfin, &plex, episode_fs(), fast_config(), more_advanced())
        .run_pass(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.matched_count, 0);
    assert_eq!(report.unmatched_count, 3);
    assert!(report.actions.is_empty());
    assert_eq!(plex.total_attempts(), 0);
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_unresolvable_item_is_reported_not_fatal() {
    let jellyfin = Arc::new(
        FakeCatalog::new(ServerKind::Jellyfin)
            .with_item("jf-1", "Show S01E01", "/media/tv/Show/S01E01.mkv", WatchState::watched_at(None))
            .with_item("jf-2", "Missing", "/media/tv/Show/S01E02.mkv", WatchState::watched_at(None))
            .with_item("jf-3", "Relative", "tv/Show/S01E03.mkv", WatchState::unwatched()),
    );
    let plex = Arc::new(FakeCatalog::new(ServerKind::Plex).with_item(
        "px-1",
        "Show S01E01",
        "/data/tv/Show/S01E01.mkv",
        WatchState::unwatched(),
    ));

    let report = coordinator(&jellyfin, &plex, episode_fs(), fast_config(), more_advanced())
        .run_pass(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.unresolved_count, 2);
    assert_eq!(report.matched_count, 1);
    assert_eq!(report.actions_applied, 1);
}

#[tokio::test]
async fn test_unreachable_server_is_fatal() {
    let jellyfin = Arc::new(FakeCatalog::new(ServerKind::Jellyfin).with_item(
        "jf-1",
        "Show S01E01",
        "/media/tv/Show/S01E01.mkv",
        WatchState::watched_at(None),
    ));
    let mut plex = FakeCatalog::new(ServerKind::Plex).with_item(
        "px-1",
        "Show S01E01",
        "/data/tv/Show/S01E01.mkv",
        WatchState::unwatched(),
    );
    plex.fail_verify = true;
    let plex = Arc::new(plex);

    let result = coordinator(&jellyfin, &plex, episode_fs(), fast_config(), more_advanced())
        .run_pass(CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(SyncError::FatalSetup { server: ServerKind::Plex, .. })
    ));
    assert_eq!(plex.total_attempts() + jellyfin.total_attempts(), 0);
}

#[tokio::test]
async fn test_listing_failure_is_fatal() {
    let mut jellyfin = FakeCatalog::new(ServerKind::Jellyfin).with_item(
        "jf-1",
        "Show S01E01",
        "/media/tv/Show/S01E01.mkv",
        WatchState::watched_at(None),
    );
    jellyfin.fail_listing = true;
    let jellyfin = Arc::new(jellyfin);
    let plex = Arc::new(FakeCatalog::new(ServerKind::Plex));

    let result = coordinator(&jellyfin, &plex, episode_fs(), fast_config(), more_advanced())
        .run_pass(CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(SyncError::FatalSetup { server: ServerKind::Jellyfin, .. })
    ));
}

#[tokio::test]
async fn test_cancelled_before_pass_lists_nothing() {
    let (jellyfin_states, plex_states) = assorted_states();
    let (jellyfin, plex, fs) = season(&jellyfin_states, &plex_states);
    let (jellyfin, plex) = (Arc::new(jellyfin), Arc::new(plex));

    let token = CancellationToken::new();
    token.cancel();

    let report = coordinator(&jellyfin, &plex, fs, fast_config(), more_advanced())
        .run_pass(token)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.matched_count, 0);
    assert!(report.items.is_empty());
    assert!(report.finished_at.is_some());
    assert_eq!(jellyfin.total_attempts() + plex.total_attempts(), 0);
}

#[tokio::test]
async fn test_cancel_interrupts_stalled_listing() {
    let mut jellyfin = FakeCatalog::new(ServerKind::Jellyfin);
    jellyfin.stall_listing = true;
    let jellyfin = Arc::new(jellyfin);
    let plex = Arc::new(FakeCatalog::new(ServerKind::Plex));

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator(&jellyfin, &plex, episode_fs(), fast_config(), more_advanced()).run_pass(token),
    )
    .await
    .expect("pass should stop once cancelled")
    .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.jellyfin_items, 0);
}

#[tokio::test]
async fn test_cancel_mid_pass_finishes_in_flight_action() {
    let jellyfin_states = vec![WatchState::watched_at(None); 5];
    let plex_states = vec![WatchState::unwatched(); 5];
    let (jellyfin, mut plex, fs) = season(&jellyfin_states, &plex_states);

    let token = CancellationToken::new();
    plex.cancel_on_write = Some(token.clone());
    let (jellyfin, plex) = (Arc::new(jellyfin), Arc::new(plex));
    let config = SyncConfig {
        max_concurrent_pairs: 1,
        ..fast_config()
    };

    let report = coordinator(&jellyfin, &plex, fs, config, more_advanced())
        .run_pass(token)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.matched_count, 5);
    assert_eq!(report.actions_applied, 1);
    assert_eq!(report.actions_skipped, 4);
    assert_eq!(plex.successful_writes(), 1);
    assert_eq!(plex.total_attempts(), 1);

    let skipped = report
        .items
        .iter()
        .filter(|item| matches!(item, ItemOutcome::Skipped { reason: SkipReason::Cancelled, .. }))
        .count();
    assert_eq!(skipped, 4);
    assert!(report.items.iter().any(|item| matches!(
        item,
        ItemOutcome::Applied { plex_id, .. } if plex.state(plex_id.as_str()).watched
    )));
}

#[tokio::test]
async fn test_report_timestamps_come_from_clock() {
    let instant = Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap();
    let jellyfin = Arc::new(FakeCatalog::new(ServerKind::Jellyfin).with_item(
        "jf-1",
        "Show S01E01",
        "/media/tv/Show/S01E01.mkv",
        WatchState::watched_at(None),
    ));
    let plex = Arc::new(FakeCatalog::new(ServerKind::Plex).with_item(
        "px-1",
        "Show S01E01",
        "/data/tv/Show/S01E01.mkv",
        WatchState::unwatched(),
    ));

    let report = coordinator(&jellyfin, &plex, episode_fs(), fast_config(), more_advanced())
        .with_clock(Arc::new(FixedClock(instant)))
        .run_pass(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.started_at, instant);
    assert_eq!(report.finished_at, Some(instant));
    assert_eq!(report.duration_secs(), Some(0));
    assert!(!report.has_failures());
}

#[tokio::test]
async fn test_custom_resolver_is_pluggable() {
    struct NeverOverwrite;

    impl ConflictResolver for NeverOverwrite {
        fn name(&self) -> String {
            "never-overwrite".to_string()
        }

        fn resolve(&self, _jellyfin: &WatchState, _plex: &WatchState, _tolerance: Duration) -> SyncDirection {
            SyncDirection::None
        }
    }

    let (jellyfin_states, plex_states) = assorted_states();
    let (jellyfin, plex, fs) = season(&jellyfin_states, &plex_states);
    let (jellyfin, plex) = (Arc::new(jellyfin), Arc::new(plex));

    let report = coordinator(&jellyfin, &plex, fs, fast_config(), Arc::new(NeverOverwrite))
        .run_pass(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.strategy, "never-overwrite");
    assert!(report.actions.is_empty());
    assert_eq!(jellyfin.total_attempts() + plex.total_attempts(), 0);
}

// ============================================================================
// Real filesystem
// ============================================================================

#[tokio::test]
async fn test_union_filesystem_paths_match_on_disk() {
    use bridge_desktop::{UnionFsAttributeProvider, UnionFsOptions};

    let root = tempfile::tempdir().unwrap();
    let root_path = root.path().canonicalize().unwrap();
    let merged = root_path.join("merged");
    let disk1 = root_path.join("disk1");

    // the merged view and the branch hold the same episode
    for base in [&merged, &disk1] {
        let dir = base.join("tv/Show");
        std::fs::create_dir_all(&dir).unwrap();
        let file = std::fs::File::create(dir.join("S01E01.mkv")).unwrap();
        file.set_len(900 * MB).unwrap();
    }

    let provider = UnionFsAttributeProvider::new(UnionFsOptions {
        union_roots: vec![merged.clone()],
        branches: vec![disk1.clone()],
        partial_hash: false,
    });
    let resolver = AttributeResolver::new(
        Arc::new(provider),
        PathMapper::new([(PathBuf::from("/media"), merged.clone())]),
        PathMapper::default(),
    );

    let jellyfin = Arc::new(FakeCatalog::new(ServerKind::Jellyfin).with_item(
        "jf-1",
        "Show S01E01",
        "/media/tv/Show/S01E01.mkv",
        WatchState::watched_at(None),
    ));
    let plex = Arc::new(FakeCatalog::new(ServerKind::Plex).with_item(
        "px-1",
        "Show S01E01",
        &disk1.join("tv/Show/S01E01.mkv").display().to_string(),
        WatchState::unwatched(),
    ));

    let coordinator = SyncCoordinator::new(
        fast_config(),
        jellyfin.clone(),
        plex.clone(),
        resolver,
        more_advanced(),
    )
    .unwrap();
    let report = coordinator.run_pass(CancellationToken::new()).await.unwrap();

    assert_eq!(report.matched_count, 1);
    assert_eq!(report.actions[0].confidence, MatchConfidence::Exact);
    assert!(plex.state("px-1").watched);
}
