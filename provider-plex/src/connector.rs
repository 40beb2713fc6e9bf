//! Plex Media Server connector implementation
//!
//! Implements the `CatalogAdapter` trait for the Plex Media Server HTTP API.

use async_trait::async_trait;
use bridge_traits::catalog::{
    CatalogAdapter, CatalogError, ItemId, LibraryFilter, LibraryItem, ServerKind, WatchState,
};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use chrono::{TimeZone, Utc};
use core_runtime::config::Settings;
use core_runtime::logging::redact_if_sensitive;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{PlexError, Result};
use crate::types::{Envelope, IdentityContainer, MetadataContainer, PlexMetadata, SectionsContainer};

/// Items requested per listing page
const DEFAULT_PAGE_SIZE: usize = 500;

/// Plugin identifier the scrobble endpoints require
const LIBRARY_IDENTIFIER: &str = "com.plexapp.plugins.library";

/// Plex metadata type codes used in `type=` filters
const TYPE_MOVIE: u8 = 1;
const TYPE_EPISODE: u8 = 4;

/// Connection settings for one Plex server
#[derive(Clone)]
pub struct PlexConfig {
    /// Server base URL, e.g. `http://plex:32400`
    pub base_url: String,
    pub token: String,
    pub client_identifier: String,
    pub page_size: usize,
    pub request_timeout: Duration,
    /// Retry policy for listing and verification requests
    pub retry: RetryPolicy,
}

impl PlexConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client_identifier: "jellyplex".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_settings(settings: &Settings, retry: RetryPolicy) -> Self {
        Self {
            client_identifier: settings.plex.client_identifier.clone(),
            request_timeout: Duration::from_secs(settings.sync.request_timeout_secs),
            retry,
            ..Self::new(&settings.plex.url, &settings.plex.token)
        }
    }
}

impl fmt::Debug for PlexConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlexConfig")
            .field("base_url", &self.base_url)
            .field("token", &redact_if_sensitive("token", &self.token))
            .field("client_identifier", &self.client_identifier)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// A library section selected for listing
#[derive(Debug, Clone)]
struct Section {
    key: String,
    title: String,
    item_type: u8,
}

/// Scrobble endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Watched,
    Unwatched,
}

impl Mark {
    fn path(&self) -> &'static str {
        match self {
            Mark::Watched => "/:/scrobble",
            Mark::Unwatched => "/:/unscrobble",
        }
    }
}

/// Plex Media Server connector
///
/// Implements `CatalogAdapter` for the account owning the token.
///
/// # Features
///
/// - Movie and TV sections, episodes listed directly with `type=4`
/// - Paged listing through container headers
/// - Exponential backoff for listing requests
///
/// Every write is exactly one request. A resume offset on an item with a view
/// count reads as a rewatch in progress, so a partial position never needs
/// the watched flag cleared first.
pub struct PlexConnector {
    http_client: Arc<dyn HttpClient>,
    config: PlexConfig,
}

impl PlexConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, config: PlexConfig) -> Self {
        Self { http_client, config }
    }

    fn request(&self, path: &str) -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, format!("{}{}", self.config.base_url, path))
            .header("X-Plex-Token", self.config.token.clone())
            .header("X-Plex-Client-Identifier", self.config.client_identifier.clone())
            .header("X-Plex-Product", "jellyplex")
            .header("X-Plex-Version", env!("CARGO_PKG_VERSION"))
            .header("Accept", "application/json")
            .timeout(self.config.request_timeout)
    }

    /// Execute one request and map non-2xx statuses to errors
    async fn send(&self, request: HttpRequest, context: &str) -> Result<HttpResponse> {
        let response = self.http_client.execute(request).await?;
        if response.is_success() {
            debug!(context, status = response.status, "API request succeeded");
            return Ok(response);
        }

        Err(PlexError::ApiError {
            status_code: response.status,
            context: context.to_string(),
        })
    }

    /// Send with retry on transient failures; `build` makes a fresh request per attempt
    async fn send_with_retry<F>(&self, build: F, context: &str) -> Result<HttpResponse>
    where
        F: Fn() -> HttpRequest,
    {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.send(build(), context).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    warn!(
                        "API request failed (attempt {}/{}): {}, retrying in {}ms",
                        attempt,
                        max_attempts,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn parse<T: DeserializeOwned>(response: &HttpResponse, what: &str) -> Result<T> {
        serde_json::from_slice::<Envelope<T>>(&response.body)
            .map(|envelope| envelope.media_container)
            .map_err(|e| PlexError::ParseError(format!("Failed to parse {}: {}", what, e)))
    }

    /// Movie and show sections accepted by `filter`
    async fn sections(&self, filter: &LibraryFilter) -> Result<Vec<Section>> {
        let response = self
            .send_with_retry(|| self.request("/library/sections"), "GET /library/sections")
            .await?;
        let container: SectionsContainer = Self::parse(&response, "library sections")?;

        let sections: Vec<Section> = container
            .directories
            .into_iter()
            .filter_map(|directory| {
                let item_type = match directory.section_type.as_str() {
                    "movie" => TYPE_MOVIE,
                    "show" => TYPE_EPISODE,
                    _ => return None,
                };
                filter.accepts(&directory.title).then_some(Section {
                    key: directory.key,
                    title: directory.title,
                    item_type,
                })
            })
            .collect();

        info!(
            libraries = ?sections.iter().map(|s| s.title.as_str()).collect::<Vec<_>>(),
            "Selected Plex libraries"
        );
        Ok(sections)
    }

    /// One page of a section; returns the items and the next offset
    async fn fetch_page(&self, section: &Section, start: usize) -> Result<(Vec<LibraryItem>, Option<usize>)> {
        let path = format!(
            "/library/sections/{}/all?type={}",
            urlencoding::encode(&section.key),
            section.item_type
        );
        let build = || {
            self.request(&path)
                .header("X-Plex-Container-Start", start.to_string())
                .header("X-Plex-Container-Size", self.config.page_size.to_string())
        };

        let response = self.send_with_retry(build, &path).await?;
        let page: MetadataContainer = Self::parse(&response, "section items")?;

        let received = page.metadata.len();
        let offset = page.offset.unwrap_or(start);
        let total = page.total_size.unwrap_or(offset + received);
        let next = (received > 0 && offset + received < total).then_some(offset + received);

        debug!(library = %section.title, start, received, total, "Fetched Plex page");

        let items = page
            .metadata
            .into_iter()
            .map(|item| convert_item(item, &section.title))
            .collect();
        Ok((items, next))
    }

    /// Every item of one section, page by page
    fn section_items(&self, section: Section) -> BoxStream<'_, std::result::Result<LibraryItem, CatalogError>> {
        stream::try_unfold(Some(0usize), move |start| {
            let section = section.clone();
            async move {
                let Some(start) = start else {
                    return Ok::<_, CatalogError>(None);
                };
                let (items, next) = self.fetch_page(&section, start).await?;
                let page = stream::iter(items.into_iter().map(Ok::<LibraryItem, CatalogError>));
                Ok(Some((page, next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    async fn metadata(&self, item: &ItemId) -> Result<PlexMetadata> {
        let path = format!("/library/metadata/{}", urlencoding::encode(item.as_str()));
        let not_found = || PlexError::ItemNotFound {
            rating_key: item.to_string(),
        };

        let response = match self.send(self.request(&path), "GET metadata").await {
            Err(PlexError::ApiError { status_code: 404, .. }) => return Err(not_found()),
            other => other?,
        };

        let container: MetadataContainer = Self::parse(&response, "item metadata")?;
        container.metadata.into_iter().next().ok_or_else(not_found)
    }

    async fn mark(&self, item: &ItemId, mark: Mark) -> Result<()> {
        let path = format!(
            "{}?identifier={}&key={}",
            mark.path(),
            LIBRARY_IDENTIFIER,
            urlencoding::encode(item.as_str())
        );
        self.send(self.request(&path), mark.path()).await.map(|_| ())
    }

    async fn report_progress(&self, item: &ItemId, position: Duration) -> Result<()> {
        let path = format!(
            "/:/progress?identifier={}&key={}&time={}&state=stopped",
            LIBRARY_IDENTIFIER,
            urlencoding::encode(item.as_str()),
            position.as_millis()
        );
        self.send(self.request(&path), "/:/progress").await.map(|_| ())
    }

    async fn write_state(&self, item: &ItemId, state: &WatchState) -> Result<()> {
        if state.watched {
            return self.mark(item, Mark::Watched).await;
        }

        match state.resume_position() {
            Some(position) => self.report_progress(item, position).await,
            None => self.mark(item, Mark::Unwatched).await,
        }
    }
}

#[async_trait]
impl CatalogAdapter for PlexConnector {
    fn server(&self) -> ServerKind {
        ServerKind::Plex
    }

    #[instrument(skip(self), fields(url = %self.config.base_url))]
    async fn verify(&self) -> std::result::Result<(), CatalogError> {
        let response = self
            .send_with_retry(|| self.request("/identity"), "GET /identity")
            .await?;
        let identity: IdentityContainer = Self::parse(&response, "server identity")?;

        // the token is only checked by authenticated endpoints
        self.send_with_retry(|| self.request("/library/sections"), "GET /library/sections")
            .await?;

        info!(
            machine_identifier = identity.machine_identifier.as_deref().unwrap_or("unknown"),
            version = identity.version.as_deref().unwrap_or("unknown"),
            "Connected to Plex"
        );
        Ok(())
    }

    fn list_items<'a>(
        &'a self,
        filter: &'a LibraryFilter,
    ) -> BoxStream<'a, std::result::Result<LibraryItem, CatalogError>> {
        stream::once(self.sections(filter))
            .map_err(CatalogError::from)
            .map_ok(|sections| stream::iter(sections.into_iter().map(Ok::<Section, CatalogError>)))
            .try_flatten()
            .map_ok(move |section| self.section_items(section))
            .try_flatten()
            .boxed()
    }

    #[instrument(skip(self), fields(item_id = %item))]
    async fn get_watch_state(&self, item: &ItemId) -> std::result::Result<WatchState, CatalogError> {
        Ok(watch_state_from(&self.metadata(item).await?))
    }

    #[instrument(skip(self, state), fields(item_id = %item, state = %state))]
    async fn set_watch_state(&self, item: &ItemId, state: &WatchState) -> std::result::Result<(), CatalogError> {
        match self.write_state(item, state).await {
            Err(PlexError::ApiError { status_code: 404, .. }) => Err(PlexError::ItemNotFound {
                rating_key: item.to_string(),
            }
            .into()),
            other => other.map_err(CatalogError::from),
        }
    }
}

fn convert_item(item: PlexMetadata, library: &str) -> LibraryItem {
    let mut paths: Vec<String> = Vec::new();
    for file in item
        .media
        .iter()
        .flat_map(|media| media.parts.iter())
        .filter_map(|part| part.file.as_ref())
    {
        if !paths.contains(file) {
            paths.push(file.clone());
        }
    }

    let title = match (item.item_type.as_deref(), &item.grandparent_title) {
        (Some("episode"), Some(show)) => format!(
            "{} S{:02}E{:02} {}",
            show,
            item.parent_index.unwrap_or(0),
            item.index.unwrap_or(0),
            item.title
        ),
        _ => item.title.clone(),
    };

    LibraryItem {
        watch_state: Some(watch_state_from(&item)),
        id: ItemId::new(item.rating_key),
        server: ServerKind::Plex,
        title,
        library: library.to_string(),
        paths,
    }
}

/// A resume offset wins over the view count, which Plex keeps during a rewatch
fn watch_state_from(item: &PlexMetadata) -> WatchState {
    let last_played_at = item
        .last_viewed_at
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

    if let Some(ms) = item.view_offset.filter(|ms| *ms > 0) {
        return WatchState::in_progress(Duration::from_millis(ms), last_played_at);
    }

    if item.view_count.unwrap_or(0) > 0 {
        return WatchState::watched_at(last_played_at);
    }

    WatchState {
        last_played_at,
        ..WatchState::unwatched()
    }
}
