use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use crate::catalog::SourceRegistry;
use crate::config::AppConfig;
use crate::extractor::{DynStreamExtractor, StreamExtractor};

/// everything a handler can reach. all of it is cheap to clone and none of it holds per request
/// state, the browser sessions live and die inside a single extraction call
#[derive(Clone)]
pub struct AppServices {
    pub config: Arc<AppConfig>,
    // shared by the proxy, connection pooling matters a lot for segment fetches
    pub http: reqwest::Client,
    pub sources: SourceRegistry,
    pub extractor: DynStreamExtractor,
    pub metrics: PrometheusHandle,
}

impl AppServices {
    pub fn new(config: Arc<AppConfig>, metrics: PrometheusHandle) -> Self {
        info!("starting services...");

        let sources = SourceRegistry::from_config(&config);
        info!("catalog sources ok: {:?}", sources.ids());

        let extractor = Arc::new(StreamExtractor::from_config(&config));
        info!(
            "stream extractor ok, browser available: {}",
            extractor.browser_available()
        );

        Self::with_parts(config, sources, extractor, metrics)
    }

    pub fn with_parts(
        config: Arc<AppConfig>,
        sources: SourceRegistry,
        extractor: DynStreamExtractor,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            http: proxy_client(&config),
            config,
            sources,
            extractor,
            metrics,
        }
    }
}

// no total timeout, a long segment download is fine. only the connect is bounded
fn proxy_client(config: &AppConfig) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .connect_timeout(config.request_timeout())
        .pool_idle_timeout(Duration::from_secs(90))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
