pub mod api;
pub mod dtos;
pub mod error;
pub mod extractors;
pub mod services;
pub mod utils;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::{Extension, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use once_cell::sync::Lazy;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::AppConfig;
use api::catalog_controller::CatalogController;
use api::extract_controller::ExtractController;
use api::health_controller::{health_endpoint, metrics_endpoint};
use api::proxy_controller::ProxyController;
use services::AppServices;

static STARTED_AT: Lazy<Instant> = Lazy::new(Instant::now);

pub fn get_uptime_seconds() -> u64 {
    STARTED_AT.elapsed().as_secs()
}

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub struct ApplicationServer;

impl ApplicationServer {
    pub async fn serve(config: Arc<AppConfig>, metrics: PrometheusHandle) -> anyhow::Result<()> {
        Lazy::force(&STARTED_AT);

        let services = AppServices::new(config.clone(), metrics);
        let router = Self::router(services);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("error while binding the tcp listener")?;

        info!("routes initialized, listening on port {}", config.port);
        axum::serve(listener, router)
            .await
            .context("error while starting the server")?;

        Ok(())
    }

    /// the full app without the listener, tests drive this with `oneshot`
    pub fn router(services: AppServices) -> Router {
        let cors = Self::cors(&services.config.cors_origin);

        let api = Router::new()
            .nest("/api/v1", CatalogController::app().merge(ExtractController::app()))
            .route("/health", get(health_endpoint))
            .route("/metrics", get(metrics_endpoint))
            .layer(cors);

        // the proxy answers its own preflights with wide open headers, players hit it from
        // anywhere so the configured origins don't apply to it
        Router::new()
            .merge(api)
            .merge(ProxyController::app(&services.config.proxy_path))
            .layer(TraceLayer::new_for_http())
            .layer(Extension(services))
    }

    fn cors(cors_origin: &str) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers(Any);

        if cors_origin.trim() == "*" {
            return layer.allow_origin(Any);
        }

        let origins: Vec<HeaderValue> = cors_origin
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("ignoring invalid cors origin {:?}", o);
                    None
                }
            })
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}
