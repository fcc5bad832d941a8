use axum::{
    Extension, Json, Router,
    extract::{Path, Query},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{
    CatalogItem, DynCatalogSource, EpisodeServers, HomePage, SearchPage, SeriesDetails,
};
use crate::server::error::{AppResult, Error};
use crate::server::services::AppServices;

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    page: Option<u32>,
}

#[derive(Deserialize)]
struct SuggestionsQuery {
    q: Option<String>,
}

#[derive(Deserialize)]
struct DetailsQuery {
    id: Option<String>,
}

#[derive(Deserialize)]
struct EpisodeQuery {
    url: Option<String>,
}

#[derive(Serialize)]
struct SourcesResponse {
    sources: Vec<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolvedServer {
    embed_url: String,
}

fn required(value: Option<String>, name: &str) -> AppResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::BadRequest(format!("Missing {} parameter", name)))
}

pub struct CatalogController;

impl CatalogController {
    pub fn app() -> Router {
        Router::new()
            .route("/sources", get(Self::sources))
            .route("/sources/{source}/home", get(Self::home))
            .route("/sources/{source}/search", get(Self::search))
            .route("/sources/{source}/suggestions", get(Self::suggestions))
            .route("/sources/{source}/details", get(Self::details))
            .route("/sources/{source}/episode", get(Self::episode))
            .route("/sources/{source}/servers/{server_id}", get(Self::server))
    }

    fn source(services: &AppServices, id: &str) -> AppResult<DynCatalogSource> {
        services
            .sources
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("Unknown source {}", id)))
    }

    async fn sources(Extension(services): Extension<AppServices>) -> Json<SourcesResponse> {
        Json(SourcesResponse {
            sources: services.sources.ids(),
        })
    }

    async fn home(
        Extension(services): Extension<AppServices>,
        Path(source): Path<String>,
    ) -> AppResult<Json<HomePage>> {
        let source = Self::source(&services, &source)?;
        Ok(Json(source.home().await?))
    }

    async fn search(
        Extension(services): Extension<AppServices>,
        Path(source): Path<String>,
        Query(query): Query<SearchQuery>,
    ) -> AppResult<Json<SearchPage>> {
        let source = Self::source(&services, &source)?;
        let q = required(query.q, "q")?;
        let page = query.page.unwrap_or(1).max(1);
        debug!("{} search {:?} page {}", source.id(), q, page);
        Ok(Json(source.search(&q, page).await?))
    }

    // typed live, an empty box just gets an empty list back
    async fn suggestions(
        Extension(services): Extension<AppServices>,
        Path(source): Path<String>,
        Query(query): Query<SuggestionsQuery>,
    ) -> AppResult<Json<Vec<CatalogItem>>> {
        let source = Self::source(&services, &source)?;
        let q = query.q.unwrap_or_default();
        if q.trim().is_empty() {
            return Ok(Json(Vec::new()));
        }
        Ok(Json(source.suggestions(q.trim()).await))
    }

    async fn details(
        Extension(services): Extension<AppServices>,
        Path(source): Path<String>,
        Query(query): Query<DetailsQuery>,
    ) -> AppResult<Json<SeriesDetails>> {
        let source = Self::source(&services, &source)?;
        let id = required(query.id, "id")?;
        Ok(Json(source.details(&id).await?))
    }

    async fn episode(
        Extension(services): Extension<AppServices>,
        Path(source): Path<String>,
        Query(query): Query<EpisodeQuery>,
    ) -> AppResult<Json<EpisodeServers>> {
        let source = Self::source(&services, &source)?;
        let url = required(query.url, "url")?;
        Ok(Json(source.episode(&url).await?))
    }

    async fn server(
        Extension(services): Extension<AppServices>,
        Path((source, server_id)): Path<(String, String)>,
    ) -> AppResult<Json<ResolvedServer>> {
        let source = Self::source(&services, &source)?;
        let embed_url = source.resolve_server(&server_id).await?;
        Ok(Json(ResolvedServer { embed_url }))
    }
}
