//! Jellyfin API connector implementation
//!
//! Implements the `CatalogAdapter` trait for the Jellyfin REST API.

use async_trait::async_trait;
use bridge_traits::catalog::{
    CatalogAdapter, CatalogError, ItemId, LibraryFilter, LibraryItem, ServerKind, WatchState,
};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use chrono::{DateTime, SecondsFormat, Utc};
use core_runtime::config::Settings;
use core_runtime::logging::redact_if_sensitive;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::error::{JellyfinError, Result};
use crate::types::{BaseItemDto, ItemsResult, SystemInfo, UserDto, UserItemData};

/// Items requested per listing page
const DEFAULT_PAGE_SIZE: usize = 500;

/// Library collection types that hold playable video
const VIDEO_COLLECTION_TYPES: &[&str] = &["movies", "tvshows"];

/// One Jellyfin tick is 100 nanoseconds
const NANOS_PER_TICK: u64 = 100;

/// Connection settings for one Jellyfin server
#[derive(Clone)]
pub struct JellyfinConfig {
    /// Server base URL, e.g. `http://jellyfin:8096`
    pub base_url: String,
    pub api_key: String,
    /// User name or user id
    pub user: String,
    pub device_id: String,
    pub page_size: usize,
    pub request_timeout: Duration,
    /// Retry policy for listing and verification requests
    pub retry: RetryPolicy,
}

impl JellyfinConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            user: user.into(),
            device_id: "jellyplex".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_settings(settings: &Settings, retry: RetryPolicy) -> Self {
        let jellyfin = &settings.jellyfin;
        Self {
            device_id: jellyfin.device_id.clone(),
            request_timeout: Duration::from_secs(settings.sync.request_timeout_secs),
            retry,
            ..Self::new(&jellyfin.url, &jellyfin.api_key, &jellyfin.user)
        }
    }
}

impl fmt::Debug for JellyfinConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JellyfinConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact_if_sensitive("api_key", &self.api_key))
            .field("user", &self.user)
            .field("device_id", &self.device_id)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// A library view selected for listing
#[derive(Debug, Clone)]
struct Library {
    id: String,
    name: String,
}

/// Jellyfin API connector
///
/// Implements `CatalogAdapter` for one Jellyfin user.
///
/// # Features
///
/// - Lazy user id resolution, shared by every request of a pass
/// - Paged listing restricted to movie and TV libraries
/// - Watch state written with a single `UserData` update
/// - Exponential backoff for listing requests
///
/// # Example
///
/// ```ignore
/// use provider_jellyfin::{JellyfinConfig, JellyfinConnector};
/// use bridge_traits::catalog::CatalogAdapter;
///
/// let config = JellyfinConfig::new("http://jellyfin:8096", api_key, "alice");
/// let connector = JellyfinConnector::new(http_client, config);
/// connector.verify().await?;
/// ```
pub struct JellyfinConnector {
    http_client: Arc<dyn HttpClient>,
    config: JellyfinConfig,
    user_id: OnceCell<String>,
}

impl JellyfinConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, config: JellyfinConfig) -> Self {
        Self {
            http_client,
            config,
            user_id: OnceCell::new(),
        }
    }

    /// Build the `Authorization` header value
    fn auth_header(&self) -> String {
        format!(
            r#"MediaBrowser Client="jellyplex", Device="jellyplex", DeviceId="{}", Version="{}", Token="{}""#,
            self.config.device_id,
            env!("CARGO_PKG_VERSION"),
            self.config.api_key
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest::new(method, self.url(path))
            .header("Authorization", self.auth_header())
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

        Err(JellyfinError::ApiError {
            status_code: response.status,
            context: context.to_string(),
            message: response.text_lossy(),
        })
    }

    /// GET with retry on transient failures
    #[instrument(skip(self))]
    async fn get_with_retry(&self, path: &str) -> Result<HttpResponse> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.send(self.request(HttpMethod::Get, path), path).await {
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
        serde_json::from_slice(&response.body)
            .map_err(|e| JellyfinError::ParseError(format!("Failed to parse {}: {}", what, e)))
    }

    /// Resolve the configured user to its id once per connector
    async fn user_id(&self) -> Result<&str> {
        let id = self.user_id.get_or_try_init(|| self.lookup_user_id()).await?;
        Ok(id.as_str())
    }

    async fn lookup_user_id(&self) -> Result<String> {
        if looks_like_id(&self.config.user) {
            return Ok(self.config.user.replace('-', ""));
        }

        let response = self.get_with_retry("/Users").await?;
        let users: Vec<UserDto> = Self::parse(&response, "user list")?;
        users
            .into_iter()
            .find(|user| user.name.eq_ignore_ascii_case(&self.config.user))
            .map(|user| user.id)
            .ok_or_else(|| JellyfinError::UserNotFound(self.config.user.clone()))
    }

    /// Movie and TV libraries accepted by `filter`
    async fn libraries(&self, filter: &LibraryFilter) -> Result<Vec<Library>> {
        let user_id = self.user_id().await?;
        let response = self.get_with_retry(&format!("/Users/{}/Views", user_id)).await?;
        let views: ItemsResult = Self::parse(&response, "library views")?;

        let libraries: Vec<Library> = views
            .items
            .into_iter()
            .filter(|view| {
                view.collection_type
                    .as_deref()
                    .is_some_and(|kind| VIDEO_COLLECTION_TYPES.contains(&kind))
            })
            .filter_map(|view| {
                let name = view.name.unwrap_or_default();
                filter.accepts(&name).then_some(Library { id: view.id, name })
            })
            .collect();

        info!(
            libraries = ?libraries.iter().map(|l| l.name.as_str()).collect::<Vec<_>>(),
            "Selected Jellyfin libraries"
        );
        Ok(libraries)
    }

    /// One page of a library; returns the items and the next start index
    async fn fetch_page(&self, library: &Library, start: usize) -> Result<(Vec<LibraryItem>, Option<usize>)> {
        let user_id = self.user_id().await?;
        let path = format!(
            "/Users/{}/Items?ParentId={}&Recursive=true&IncludeItemTypes=Movie,Episode&Fields=Path,MediaSources&EnableUserData=true&StartIndex={}&Limit={}",
            user_id,
            urlencoding::encode(&library.id),
            start,
            self.config.page_size
        );

        let response = self.get_with_retry(&path).await?;
        let page: ItemsResult = Self::parse(&response, "item page")?;

        let received = page.items.len();
        let total = page.total_record_count.unwrap_or(start + received);
        let next = (received > 0 && start + received < total).then_some(start + received);

        debug!(library = %library.name, start, received, total, "Fetched Jellyfin page");

        let items = page
            .items
            .into_iter()
            .map(|item| convert_item(item, &library.name))
            .collect();
        Ok((items, next))
    }

    /// Every item of one library, page by page
    fn library_items(&self, library: Library) -> BoxStream<'_, std::result::Result<LibraryItem, CatalogError>> {
        stream::try_unfold(Some(0usize), move |start| {
            let library = library.clone();
            async move {
                let Some(start) = start else {
                    return Ok::<_, CatalogError>(None);
                };
                let (items, next) = self.fetch_page(&library, start).await?;
                let page = stream::iter(items.into_iter().map(Ok::<LibraryItem, CatalogError>));
                Ok(Some((page, next)))
            }
        })
        .try_flatten()
        .boxed()
    }
}

#[async_trait]
impl CatalogAdapter for JellyfinConnector {
    fn server(&self) -> ServerKind {
        ServerKind::Jellyfin
    }

    #[instrument(skip(self), fields(url = %self.config.base_url))]
    async fn verify(&self) -> std::result::Result<(), CatalogError> {
        let response = self.get_with_retry("/System/Info").await?;
        let info: SystemInfo = Self::parse(&response, "system info")?;
        let user_id = self.user_id().await?;

        info!(
            server_name = info.server_name.as_deref().unwrap_or("unknown"),
            version = info.version.as_deref().unwrap_or("unknown"),
            user_id,
            "Connected to Jellyfin"
        );
        Ok(())
    }

    fn list_items<'a>(
        &'a self,
        filter: &'a LibraryFilter,
    ) -> BoxStream<'a, std::result::Result<LibraryItem, CatalogError>> {
        stream::once(self.libraries(filter))
            .map_err(CatalogError::from)
            .map_ok(|libraries| stream::iter(libraries.into_iter().map(Ok::<Library, CatalogError>)))
            .try_flatten()
            .map_ok(move |library| self.library_items(library))
            .try_flatten()
            .boxed()
    }

    #[instrument(skip(self), fields(item_id = %item))]
    async fn get_watch_state(&self, item: &ItemId) -> std::result::Result<WatchState, CatalogError> {
        let user_id = self.user_id().await?;
        let path = format!("/Users/{}/Items/{}", user_id, urlencoding::encode(item.as_str()));

        let response = match self.send(self.request(HttpMethod::Get, &path), "GET item").await {
            Err(JellyfinError::ApiError { status_code: 404, .. }) => {
                return Err(JellyfinError::ItemNotFound {
                    item_id: item.to_string(),
                }
                .into())
            }
            other => other?,
        };

        let dto: BaseItemDto = Self::parse(&response, "item")?;
        Ok(watch_state_from(&dto.user_data.unwrap_or_default()))
    }

    #[instrument(skip(self, state), fields(item_id = %item, state = %state))]
    async fn set_watch_state(&self, item: &ItemId, state: &WatchState) -> std::result::Result<(), CatalogError> {
        let user_id = self.user_id().await?;
        let path = format!(
            "/UserItems/{}/UserData?userId={}",
            urlencoding::encode(item.as_str()),
            user_id
        );

        let request = self
            .request(HttpMethod::Post, &path)
            .json(&user_data_from(state))
            .map_err(JellyfinError::from)?;

        match self.send(request, "POST UserData").await {
            Ok(_) => Ok(()),
            Err(JellyfinError::ApiError { status_code: 404, .. }) => Err(JellyfinError::ItemNotFound {
                item_id: item.to_string(),
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A configured user that is already a GUID, with or without dashes
fn looks_like_id(user: &str) -> bool {
    let hex: Vec<char> = user.chars().filter(|c| *c != '-').collect();
    hex.len() == 32 && hex.iter().all(char::is_ascii_hexdigit)
}

fn convert_item(item: BaseItemDto, library: &str) -> LibraryItem {
    let mut paths: Vec<String> = Vec::new();
    for path in item
        .path
        .iter()
        .chain(item.media_sources.iter().filter_map(|source| source.path.as_ref()))
    {
        if !paths.contains(path) {
            paths.push(path.clone());
        }
    }

    let name = item.name.clone().unwrap_or_default();
    let title = match (item.item_type.as_deref(), &item.series_name) {
        (Some("Episode"), Some(series)) => format!(
            "{} S{:02}E{:02} {}",
            series,
            item.parent_index_number.unwrap_or(0),
            item.index_number.unwrap_or(0),
            name
        ),
        _ => name,
    };

    LibraryItem {
        id: ItemId::new(item.id),
        server: ServerKind::Jellyfin,
        title,
        library: library.to_string(),
        paths,
        watch_state: item.user_data.as_ref().map(watch_state_from),
    }
}

pub(crate) fn ticks_to_duration(ticks: i64) -> Duration {
    Duration::from_nanos(u64::try_from(ticks).unwrap_or(0).saturating_mul(NANOS_PER_TICK))
}

pub(crate) fn duration_to_ticks(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos() / u128::from(NANOS_PER_TICK)).unwrap_or(i64::MAX)
}

fn watch_state_from(data: &UserItemData) -> WatchState {
    let last_played_at = data
        .last_played_date
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    if data.played {
        return WatchState::watched_at(last_played_at);
    }

    let position = ticks_to_duration(data.playback_position_ticks);
    if position.is_zero() {
        WatchState {
            last_played_at,
            ..WatchState::unwatched()
        }
    } else {
        WatchState::in_progress(position, last_played_at)
    }
}

fn user_data_from(state: &WatchState) -> UserItemData {
    UserItemData {
        played: state.watched,
        playback_position_ticks: state.resume_position().map(duration_to_ticks).unwrap_or(0),
        last_played_date: state
            .last_played_at
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    }
}
