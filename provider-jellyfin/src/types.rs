//! Jellyfin API response types
//!
//! Data structures for deserializing Jellyfin REST API responses. Only the
//! fields the adapter reads are modelled; everything else is ignored.

use serde::{Deserialize, Serialize};

/// `GET /System/Info`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemInfo {
    #[serde(default)]
    pub server_name: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub id: Option<String>,
}

/// Entry of `GET /Users`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserDto {
    pub name: String,
    pub id: String,
}

/// Generic `{ Items, TotalRecordCount }` query result
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemsResult {
    #[serde(default)]
    pub items: Vec<BaseItemDto>,

    #[serde(default)]
    pub total_record_count: Option<usize>,
}

/// Library view, movie, or episode
///
/// See: https://api.jellyfin.org/#tag/Items
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BaseItemDto {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// `Movie`, `Episode`, `CollectionFolder`, ...
    #[serde(default, rename = "Type")]
    pub item_type: Option<String>,

    /// Set on library views: `movies`, `tvshows`, `music`, ...
    #[serde(default)]
    pub collection_type: Option<String>,

    /// Primary file path as the server sees it
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub media_sources: Vec<MediaSourceInfo>,

    #[serde(default)]
    pub user_data: Option<UserItemData>,

    #[serde(default)]
    pub series_name: Option<String>,

    /// Season number for episodes
    #[serde(default)]
    pub parent_index_number: Option<u32>,

    /// Episode number for episodes
    #[serde(default)]
    pub index_number: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaSourceInfo {
    #[serde(default)]
    pub path: Option<String>,
}

/// Per-user playback data, used both for reads and for the update body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserItemData {
    #[serde(default)]
    pub played: bool,

    /// Resume offset in 100ns ticks
    #[serde(default)]
    pub playback_position_ticks: i64,

    /// RFC 3339
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_played_date: Option<String>,
}
