//! Error types for Jellyfin provider

use bridge_traits::catalog::{CatalogError, ServerKind};
use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Jellyfin provider errors
#[derive(Error, Debug)]
pub enum JellyfinError {
    /// API request returned a non-success status
    #[error("Jellyfin API error (status {status_code}) for {context}: {message}")]
    ApiError {
        status_code: u16,
        context: String,
        message: String,
    },

    /// Item does not exist or is not visible to the user
    #[error("Item not found: {item_id}")]
    ItemNotFound { item_id: String },

    /// Configured user does not exist on the server
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Transport error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for Jellyfin operations
pub type Result<T> = std::result::Result<T, JellyfinError>;

impl JellyfinError {
    /// Whether the request may succeed if sent again
    pub fn is_retryable(&self) -> bool {
        match self {
            JellyfinError::ApiError { status_code, .. } => {
                matches!(status_code, 408 | 429) || (500..600).contains(status_code)
            }
            JellyfinError::BridgeError(e) => e.is_network(),
            _ => false,
        }
    }
}

impl From<JellyfinError> for CatalogError {
    fn from(error: JellyfinError) -> Self {
        let server = ServerKind::Jellyfin;
        match error {
            JellyfinError::ApiError {
                status_code,
                context,
                ..
            } => CatalogError::from_status(server, status_code, &context),
            JellyfinError::ItemNotFound { item_id } => CatalogError::NotFound { server, item_id },
            JellyfinError::BridgeError(e) if e.is_network() => CatalogError::transient(server, e.to_string()),
            other => CatalogError::permanent(server, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = JellyfinError::ApiError {
            status_code: 401,
            context: "GET /System/Info".to_string(),
            message: "Unauthorized".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "Jellyfin API error (status 401) for GET /System/Info: Unauthorized"
        );
    }

    #[test]
    fn test_error_conversion() {
        let unavailable = JellyfinError::ApiError {
            status_code: 503,
            context: "UserData".to_string(),
            message: String::new(),
        };
        assert!(unavailable.is_retryable());
        assert!(CatalogError::from(unavailable).is_retryable());

        let missing: CatalogError = JellyfinError::ItemNotFound {
            item_id: "abc".to_string(),
        }
        .into();
        assert!(matches!(missing, CatalogError::NotFound { ref item_id, .. } if item_id == "abc"));

        let timeout: CatalogError = JellyfinError::BridgeError(BridgeError::Timeout("read".to_string())).into();
        assert!(timeout.is_retryable());

        let parse: CatalogError = JellyfinError::ParseError("bad json".to_string()).into();
        assert!(matches!(parse, CatalogError::Permanent { .. }));
    }
}
