pub mod dooplay;
pub mod fetch;
pub mod html;
pub mod model;
pub mod zoro;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use tracing::warn;

pub use dooplay::DooplaySource;
pub use fetch::{ScrapeError, ScrapeResult, SourceClient};
pub use model::*;
pub use zoro::ZoroSource;

use crate::config::AppConfig;

pub type DynCatalogSource = Arc<dyn CatalogSource + Send + Sync>;

pub const SUGGESTION_LIMIT: usize = 5;

/// same capabilities for every site, only the markup knowledge differs
#[automock]
#[async_trait]
pub trait CatalogSource {
    fn id(&self) -> &'static str;
    async fn home(&self) -> ScrapeResult<HomePage>;
    async fn search(&self, query: &str, page: u32) -> ScrapeResult<SearchPage>;
    /// bounded and deadline-limited, never fails, worst case is an empty list
    async fn suggestions(&self, query: &str) -> Vec<CatalogItem>;
    async fn details(&self, id: &str) -> ScrapeResult<SeriesDetails>;
    async fn episode(&self, url: &str) -> ScrapeResult<EpisodeServers>;
    /// the one extra fetch for servers that only came with an opaque id
    async fn resolve_server(&self, server_id: &str) -> ScrapeResult<String>;
}

/// runs the suggestion future under the tighter deadline and caps the result
pub async fn bounded_suggestions<F>(source: &'static str, deadline: Duration, work: F) -> Vec<CatalogItem>
where
    F: std::future::Future<Output = ScrapeResult<Vec<CatalogItem>>>,
{
    match tokio::time::timeout(deadline, work).await {
        Ok(Ok(mut items)) => {
            items.truncate(SUGGESTION_LIMIT);
            items
        }
        Ok(Err(e)) => {
            warn!("{} suggestions failed: {}", source, e);
            Vec::new()
        }
        Err(_) => {
            warn!("{} suggestions gave up after {:?}", source, deadline);
            Vec::new()
        }
    }
}

/// all the sources we know, keyed by id. built once at startup, the sources themselves hold no
/// mutable state so sharing them between requests is fine
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<&'static str, DynCatalogSource>,
}

impl SourceRegistry {
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(DooplaySource::new(
            SourceClient::new(
                &config.dooplay_base_url,
                &config.user_agent,
                config.request_timeout(),
            ),
            config.suggestions_timeout(),
        )));
        registry.register(Arc::new(ZoroSource::new(
            SourceClient::new(
                &config.zoro_base_url,
                &config.user_agent,
                config.request_timeout(),
            ),
            config.suggestions_timeout(),
        )));
        registry
    }

    pub fn register(&mut self, source: DynCatalogSource) {
        self.sources.insert(source.id(), source);
    }

    pub fn get(&self, id: &str) -> Option<DynCatalogSource> {
        self.sources.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.sources.keys().copied().collect()
    }
}
