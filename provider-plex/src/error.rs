//! Error types for Plex provider

use bridge_traits::catalog::{CatalogError, ServerKind};
use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Plex provider errors
#[derive(Error, Debug)]
pub enum PlexError {
    /// API request returned a non-success status
    #[error("Plex API error (status {status_code}) for {context}")]
    ApiError { status_code: u16, context: String },

    /// Metadata item does not exist
    #[error("Item not found: {rating_key}")]
    ItemNotFound { rating_key: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Transport error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for Plex operations
pub type Result<T> = std::result::Result<T, PlexError>;

impl PlexError {
    /// Whether the request may succeed if sent again
    pub fn is_retryable(&self) -> bool {
        match self {
            PlexError::ApiError { status_code, .. } => {
                matches!(status_code, 408 | 429) || (500..600).contains(status_code)
            }
            PlexError::BridgeError(e) => e.is_network(),
            _ => false,
        }
    }
}

impl From<PlexError> for CatalogError {
    fn from(error: PlexError) -> Self {
        let server = ServerKind::Plex;
        match error {
            PlexError::ApiError {
                status_code,
                context,
            } => CatalogError::from_status(server, status_code, &context),
            PlexError::ItemNotFound { rating_key } => CatalogError::NotFound {
                server,
                item_id: rating_key,
            },
            PlexError::BridgeError(e) if e.is_network() => CatalogError::transient(server, e.to_string()),
            other => CatalogError::permanent(server, other.to_string()),
        }
    }
}
