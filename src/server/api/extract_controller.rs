use axum::{Extension, Json, Router, extract::Query, routing::get};
use serde::Deserialize;
use tracing::info;

use crate::extractor::StreamDescriptor;
use crate::server::error::{AppResult, Error};
use crate::server::services::AppServices;

#[derive(Deserialize)]
struct ExtractQuery {
    url: Option<String>,
}

pub struct ExtractController;

impl ExtractController {
    pub fn app() -> Router {
        Router::new().route("/extract", get(Self::extract))
    }

    /// a failed extraction is still a 200, the descriptor carries the error and the caller moves
    /// on to its next server
    async fn extract(
        Extension(services): Extension<AppServices>,
        Query(query): Query<ExtractQuery>,
    ) -> AppResult<Json<StreamDescriptor>> {
        let url = query
            .url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::BadRequest("Missing url parameter".to_string()))?;

        let descriptor = services.extractor.extract_stream(&url).await;
        let outcome = if descriptor.is_resolved() { "resolved" } else { "failed" };
        metrics::counter!("extractions_total", "outcome" => outcome).increment(1);
        info!("extraction {} for {}", outcome, url);

        Ok(Json(descriptor))
    }
}
