//! Per-server request limiting
//!
//! Every worker of a pass shares the same adapter per server. Wrapping the
//! adapter in a [`ThrottledCatalog`] caps how many requests are in flight
//! against that server at once.

use async_trait::async_trait;
use bridge_traits::catalog::{CatalogAdapter, CatalogError, ItemId, LibraryFilter, LibraryItem, ServerKind, WatchState};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct ThrottledCatalog {
    inner: Arc<dyn CatalogAdapter>,
    permits: Arc<Semaphore>,
}

impl ThrottledCatalog {
    pub fn new(inner: Arc<dyn CatalogAdapter>, max_in_flight: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    async fn permit(&self) -> Result<OwnedSemaphorePermit, CatalogError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| CatalogError::transient(self.inner.server(), "request limiter closed"))
    }
}

#[async_trait]
impl CatalogAdapter for ThrottledCatalog {
    fn server(&self) -> ServerKind {
        self.inner.server()
    }

    async fn verify(&self) -> Result<(), CatalogError> {
        let _permit = self.permit().await?;
        self.inner.verify().await
    }

    /// Holds one permit for the whole listing
    fn list_items<'a>(&'a self, filter: &'a LibraryFilter) -> BoxStream<'a, Result<LibraryItem, CatalogError>> {
        stream::once(self.permit())
            .flat_map(move |permit| match permit {
                Ok(permit) => self
                    .inner
                    .list_items(filter)
                    .map(move |item| {
                        let _held = &permit;
                        item
                    })
                    .boxed(),
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .boxed()
    }

    async fn get_watch_state(&self, item: &ItemId) -> Result<WatchState, CatalogError> {
        let _permit = self.permit().await?;
        self.inner.get_watch_state(item).await
    }

    async fn set_watch_state(&self, item: &ItemId, state: &WatchState) -> Result<(), CatalogError> {
        let _permit = self.permit().await?;
        self.inner.set_watch_state(item, state).await
    }
}
