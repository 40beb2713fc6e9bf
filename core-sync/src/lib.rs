//! # Watch State Sync Engine
//!
//! Reconciles per-user watch state between a Jellyfin and a Plex server that
//! index the same union-mounted media library through different paths.
//!
//! ## Overview
//!
//! One pass lists both catalogs, establishes which items are the same physical
//! file, and copies watch state across according to a pluggable conflict
//! policy. Passes are idempotent: once a pass has applied its actions, an
//! immediate second pass finds nothing to do.
//!
//! ## Components
//!
//! - **Attribute Resolver** (`resolver`): Maps server paths to host paths and resolves file identities
//! - **Identity Matcher** (`identity`): Builds a strict partial bijection between Jellyfin and Plex items
//! - **State Differ** (`state_differ`): Fetches both states of a pair and detects disagreement
//! - **Conflict Resolver** (`conflict_resolver`): Pluggable policy choosing the sync direction
//! - **Sync Executor** (`executor`): Applies actions with retry, backoff and dry-run support
//! - **Request Throttle** (`throttle`): Caps concurrent requests per server
//! - **Run Report** (`report`): Counts and per-item outcomes of a pass
//! - **Sync Coordinator** (`coordinator`): Runs a pass end to end

pub mod conflict_resolver;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod identity;
pub mod report;
pub mod resolver;
pub mod state_differ;
pub mod throttle;

pub use conflict_resolver::{ConflictPolicy, ConflictResolver, SyncDirection, Tiebreak};
pub use coordinator::{SyncConfig, SyncCoordinator};
pub use error::{Result, SyncError};
pub use executor::{ActionOutcome, SkipReason, SyncAction, SyncExecutor};
pub use identity::{
    FileIdentity, IdentityMatcher, MatchConfidence, MatchOutcome, MatchedPair, UnmatchedItem,
    UnmatchedReason,
};
pub use report::{ItemOutcome, PlannedAction, RunReport};
pub use resolver::{AttributeResolver, PathMapper, ResolvedItem};
pub use state_differ::{PairStates, StateDiffer};
pub use throttle::ThrottledCatalog;
