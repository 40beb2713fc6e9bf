//! # Configuration Module
//!
//! Loads, overrides and validates the settings of one sync pass.
//!
//! ## Overview
//!
//! Settings come from a TOML file whose path is given on the command line or
//! through `JELLYPLEX_CONFIG`. Credentials may be supplied through the
//! environment instead of the file (`JELLYPLEX_JELLYFIN_API_KEY`,
//! `JELLYPLEX_PLEX_TOKEN`). Validation is fail-fast: an invalid configuration
//! is a fatal setup error and no server is contacted.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::Settings;
//!
//! let settings = Settings::load(Some(Path::new("/etc/jellyplex.toml")))?;
//! ```
//!
//! Tests and embedders can build settings directly:
//!
//! ```ignore
//! use core_runtime::config::{Settings, StrategySetting};
//!
//! let settings = Settings::builder()
//!     .jellyfin("http://jellyfin:8096", "api-key", "alice")
//!     .plex("http://plex:32400", "plex-token")
//!     .strategy(StrategySetting::MoreAdvancedWins)
//!     .dry_run(true)
//!     .build()?;
//! ```
//!
//! ## File format
//!
//! ```toml
//! [jellyfin]
//! url = "http://jellyfin:8096"
//! api_key = "..."
//! user = "alice"
//! libraries = ["Movies", "Shows"]
//!
//! [plex]
//! url = "http://plex:32400"
//! token = "..."
//!
//! [sync]
//! strategy = "more-advanced-wins"
//! dry_run = false
//!
//! [filesystem]
//! union_roots = ["/mnt/merged"]
//! branches = ["/mnt/disk1", "/mnt/disk2"]
//!
//! [path_mappings.jellyfin]
//! "/media" = "/mnt/merged"
//! ```

use crate::error::{Error, Result};
use crate::logging::redact_if_sensitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "JELLYPLEX_CONFIG";
/// Environment variable overriding `jellyfin.api_key`
pub const JELLYFIN_API_KEY_ENV: &str = "JELLYPLEX_JELLYFIN_API_KEY";
/// Environment variable overriding `plex.token`
pub const PLEX_TOKEN_ENV: &str = "JELLYPLEX_PLEX_TOKEN";

/// Client/device identifier sent to both servers unless configured
pub const DEFAULT_CLIENT_ID: &str = "jellyplex";

/// Conflict strategy selected in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategySetting {
    #[default]
    MoreAdvancedWins,
    JellyfinAuthoritative,
    PlexAuthoritative,
    Bidirectional,
}

impl StrategySetting {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategySetting::MoreAdvancedWins => "more-advanced-wins",
            StrategySetting::JellyfinAuthoritative => "jellyfin-authoritative",
            StrategySetting::PlexAuthoritative => "plex-authoritative",
            StrategySetting::Bidirectional => "bidirectional",
        }
    }
}

impl fmt::Display for StrategySetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategySetting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "more-advanced-wins" => Ok(StrategySetting::MoreAdvancedWins),
            "jellyfin-authoritative" => Ok(StrategySetting::JellyfinAuthoritative),
            "plex-authoritative" => Ok(StrategySetting::PlexAuthoritative),
            "bidirectional" => Ok(StrategySetting::Bidirectional),
            other => Err(Error::Config(format!("Unknown conflict strategy '{}'", other))),
        }
    }
}

/// Which side wins a bidirectional conflict whose timestamps do not decide it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TiebreakSetting {
    #[default]
    MoreAdvanced,
    Jellyfin,
    Plex,
}

/// Connection settings for the Jellyfin server
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JellyfinSettings {
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    /// User name or user id whose watch state is synchronized
    pub user: String,
    /// Library names to include; empty means every movie and TV library
    #[serde(default)]
    pub libraries: Vec<String>,
    #[serde(default = "default_client_id")]
    pub device_id: String,
}

impl fmt::Debug for JellyfinSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JellyfinSettings")
            .field("url", &self.url)
            .field("api_key", &redact_if_sensitive("api_key", &self.api_key))
            .field("user", &self.user)
            .field("libraries", &self.libraries)
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Connection settings for the Plex server
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlexSettings {
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub libraries: Vec<String>,
    #[serde(default = "default_client_id")]
    pub client_identifier: String,
}

impl fmt::Debug for PlexSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlexSettings")
            .field("url", &self.url)
            .field("token", &redact_if_sensitive("token", &self.token))
            .field("libraries", &self.libraries)
            .field("client_identifier", &self.client_identifier)
            .finish()
    }
}

/// Pass-level behaviour
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    pub strategy: StrategySetting,
    pub bidirectional_tiebreak: TiebreakSetting,
    /// Compute actions without applying any
    pub dry_run: bool,
    /// Matched pairs reconciled concurrently
    pub max_concurrent_pairs: usize,
    /// Concurrent requests allowed against each server
    pub max_requests_per_server: usize,
    /// Playback positions closer than this are considered equal
    pub position_tolerance_secs: u64,
    /// Fall back to size + modification time for items without an exact match
    pub loose_matching: bool,
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            strategy: StrategySetting::default(),
            bidirectional_tiebreak: TiebreakSetting::default(),
            dry_run: false,
            max_concurrent_pairs: 8,
            max_requests_per_server: 4,
            position_tolerance_secs: 10,
            loose_matching: true,
            request_timeout_secs: 30,
        }
    }
}

/// Retry behaviour for transient server failures
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    /// Total attempts per request, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// Union filesystem layout of the host running the pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilesystemSettings {
    pub union_roots: Vec<PathBuf>,
    pub branches: Vec<PathBuf>,
    pub partial_hash: bool,
}

/// Server-visible path prefix → host path prefix, per server
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathMappingSettings {
    pub jellyfin: BTreeMap<String, String>,
    pub plex: BTreeMap<String, String>,
}

/// Complete configuration of a sync pass
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub jellyfin: JellyfinSettings,
    pub plex: PlexSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub filesystem: FilesystemSettings,
    #[serde(default)]
    pub path_mappings: PathMappingSettings,
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

impl Settings {
    /// Creates a new builder for constructing `Settings`.
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Parse settings from TOML text without environment overrides or validation
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))
    }

    /// Load, apply environment overrides and validate.
    ///
    /// The file is `path` when given, else the file named by `JELLYPLEX_CONFIG`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => std::env::var_os(CONFIG_PATH_ENV)
                .map(PathBuf::from)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "No configuration file given; pass --config or set {}",
                        CONFIG_PATH_ENV
                    ))
                })?,
        };

        let text = std::fs::read_to_string(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;

        let mut settings = Self::from_toml_str(&text)?;
        settings.apply_env_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Replace credentials with values from the environment when present
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_key) = lookup(JELLYFIN_API_KEY_ENV).filter(|v| !v.trim().is_empty()) {
            self.jellyfin.api_key = api_key;
        }
        if let Some(token) = lookup(PLEX_TOKEN_ENV).filter(|v| !v.trim().is_empty()) {
            self.plex.token = token;
        }
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Server URLs parse and use http or https
    /// - Credentials and the Jellyfin user are present
    /// - Concurrency limits and retry attempts are at least 1
    /// - Path mapping prefixes are absolute
    pub fn validate(&self) -> Result<()> {
        validate_url("jellyfin.url", &self.jellyfin.url)?;
        validate_url("plex.url", &self.plex.url)?;

        if self.jellyfin.api_key.trim().is_empty() {
            return Err(Error::Config(format!(
                "jellyfin.api_key is required (or set {})",
                JELLYFIN_API_KEY_ENV
            )));
        }
        if self.jellyfin.user.trim().is_empty() {
            return Err(Error::Config("jellyfin.user cannot be empty".to_string()));
        }
        if self.plex.token.trim().is_empty() {
            return Err(Error::Config(format!(
                "plex.token is required (or set {})",
                PLEX_TOKEN_ENV
            )));
        }

        if self.sync.max_concurrent_pairs == 0 {
            return Err(Error::Config(
                "sync.max_concurrent_pairs must be at least 1".to_string(),
            ));
        }
        if self.sync.max_requests_per_server == 0 {
            return Err(Error::Config(
                "sync.max_requests_per_server must be at least 1".to_string(),
            ));
        }
        if self.sync.request_timeout_secs == 0 {
            return Err(Error::Config(
                "sync.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config(
                "retry.base_delay_ms cannot exceed retry.max_delay_ms".to_string(),
            ));
        }

        for (server, mappings) in [
            ("jellyfin", &self.path_mappings.jellyfin),
            ("plex", &self.path_mappings.plex),
        ] {
            for (from, to) in mappings {
                if !from.starts_with('/') || !to.starts_with('/') {
                    return Err(Error::Config(format!(
                        "path_mappings.{}: '{}' -> '{}' must map absolute paths",
                        server, from, to
                    )));
                }
            }
        }

        Ok(())
    }
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| Error::Config(format!("{} '{}' is not a valid URL: {}", field, value, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(Error::Config(format!(
            "{} must use http or https, got '{}'",
            field, scheme
        ))),
    }
}

/// Builder for constructing [`Settings`] in code.
#[derive(Default)]
pub struct SettingsBuilder {
    jellyfin: Option<JellyfinSettings>,
    plex: Option<PlexSettings>,
    sync: SyncSettings,
    retry: RetrySettings,
    filesystem: FilesystemSettings,
    path_mappings: PathMappingSettings,
}

impl SettingsBuilder {
    pub fn jellyfin(
        mut self,
        url: impl Into<String>,
        api_key: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        self.jellyfin = Some(JellyfinSettings {
            url: url.into(),
            api_key: api_key.into(),
            user: user.into(),
            libraries: Vec::new(),
            device_id: default_client_id(),
        });
        self
    }

    pub fn plex(mut self, url: impl Into<String>, token: impl Into<String>) -> Self {
        self.plex = Some(PlexSettings {
            url: url.into(),
            token: token.into(),
            libraries: Vec::new(),
            client_identifier: default_client_id(),
        });
        self
    }

    pub fn jellyfin_libraries<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(jellyfin) = self.jellyfin.as_mut() {
            jellyfin.libraries = names.into_iter().map(Into::into).collect();
        }
        self
    }

    pub fn plex_libraries<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(plex) = self.plex.as_mut() {
            plex.libraries = names.into_iter().map(Into::into).collect();
        }
        self
    }

    pub fn strategy(mut self, strategy: StrategySetting) -> Self {
        self.sync.strategy = strategy;
        self
    }

    pub fn bidirectional_tiebreak(mut self, tiebreak: TiebreakSetting) -> Self {
        self.sync.bidirectional_tiebreak = tiebreak;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.sync.dry_run = dry_run;
        self
    }

    pub fn max_concurrent_pairs(mut self, pairs: usize) -> Self {
        self.sync.max_concurrent_pairs = pairs;
        self
    }

    pub fn max_requests_per_server(mut self, requests: usize) -> Self {
        self.sync.max_requests_per_server = requests;
        self
    }

    pub fn loose_matching(mut self, enabled: bool) -> Self {
        self.sync.loose_matching = enabled;
        self
    }

    pub fn retry(mut self, max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.retry = RetrySettings {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        };
        self
    }

    pub fn filesystem(mut self, filesystem: FilesystemSettings) -> Self {
        self.filesystem = filesystem;
        self
    }

    pub fn jellyfin_path_mapping(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.path_mappings.jellyfin.insert(from.into(), to.into());
        self
    }

    pub fn plex_path_mapping(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.path_mappings.plex.insert(from.into(), to.into());
        self
    }

    /// Builds and validates the settings.
    pub fn build(self) -> Result<Settings> {
        let settings = Settings {
            jellyfin: self
                .jellyfin
                .ok_or_else(|| Error::Config("Jellyfin connection settings are required".to_string()))?,
            plex: self
                .plex
                .ok_or_else(|| Error::Config("Plex connection settings are required".to_string()))?,
            sync: self.sync,
            retry: self.retry,
            filesystem: self.filesystem,
            path_mappings: self.path_mappings,
        };

        settings.validate()?;
        Ok(settings)
    }
}
