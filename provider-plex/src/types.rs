//! Plex API response types
//!
//! Every JSON response from Plex Media Server is wrapped in a
//! `MediaContainer` object.

use serde::Deserialize;

/// `{ "MediaContainer": { ... } }`
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    pub media_container: T,
}

/// `GET /identity`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityContainer {
    #[serde(default)]
    pub machine_identifier: Option<String>,

    #[serde(default)]
    pub version: Option<String>,
}

/// `GET /library/sections`
#[derive(Debug, Deserialize)]
pub struct SectionsContainer {
    #[serde(default, rename = "Directory")]
    pub directories: Vec<Section>,
}

/// A library section
#[derive(Debug, Clone, Deserialize)]
pub struct Section {
    pub key: String,
    pub title: String,

    /// `movie`, `show`, `artist`, `photo`
    #[serde(rename = "type")]
    pub section_type: String,
}

/// Paged metadata listing, also used for single-item lookups
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataContainer {
    #[serde(default)]
    pub offset: Option<usize>,

    /// Total items in the listing, sent only for paged requests
    #[serde(default)]
    pub total_size: Option<usize>,

    #[serde(default, rename = "Metadata")]
    pub metadata: Vec<PlexMetadata>,
}

/// Movie or episode
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlexMetadata {
    pub rating_key: String,

    #[serde(default)]
    pub title: String,

    #[serde(default, rename = "type")]
    pub item_type: Option<String>,

    /// Show title for episodes
    #[serde(default)]
    pub grandparent_title: Option<String>,

    /// Season number for episodes
    #[serde(default)]
    pub parent_index: Option<u32>,

    /// Episode number for episodes
    #[serde(default)]
    pub index: Option<u32>,

    #[serde(default)]
    pub view_count: Option<u32>,

    /// Resume offset in milliseconds
    #[serde(default)]
    pub view_offset: Option<u64>,

    /// Unix seconds
    #[serde(default)]
    pub last_viewed_at: Option<i64>,

    #[serde(default, rename = "Media")]
    pub media: Vec<Media>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Media {
    #[serde(default, rename = "Part")]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub file: Option<String>,
}
