use axum::Extension;
use axum::Json;
use chrono::Utc;
use tracing::warn;

use crate::server::dtos::health_dto::{
    BrowserHealth, HealthResponse, HealthStatus, ServiceHealthDetails,
};
use crate::server::services::AppServices;
use crate::server::{get_app_version, get_uptime_seconds};

/// health endpoint, the only hard dependency is chrome and even without it the catalog and the
/// proxy keep working so that's degraded and not down
pub async fn health_endpoint(Extension(services): Extension<AppServices>) -> Json<HealthResponse> {
    let browser_health = check_browser_health(&services);

    Json(HealthResponse {
        status: browser_health.status,
        timestamp: Utc::now(),
        uptime_seconds: get_uptime_seconds(),
        version: get_app_version().to_string(),
        environment: format!("{:?}", services.config.cargo_env).to_lowercase(),
        services: ServiceHealthDetails {
            browser: browser_health,
            sources: services.sources.ids(),
        },
    })
}

fn check_browser_health(services: &AppServices) -> BrowserHealth {
    let available = services.extractor.browser_available();
    if !available {
        warn!("health check: no chrome executable, slow path extraction will fail");
    }
    BrowserHealth {
        status: if available {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        },
        available,
    }
}

pub async fn metrics_endpoint(Extension(services): Extension<AppServices>) -> String {
    services.metrics.render()
}
