use bridge_traits::catalog::ServerKind;
use thiserror::Error;

/// Errors that abort a sync pass
///
/// Per-item and per-pair failures never surface here; they are recorded in the
/// run report instead.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A server could not be reached, authenticated against or listed
    #[error("Setup failed for {server}: {message}")]
    FatalSetup { server: ServerKind, message: String },

    #[error("Invalid sync configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
