use serde::{Deserialize, Serialize};

/// everything in here is rebuilt from live html on every request and nothing is ever stored.
///
/// fields are optional and defaulted on purpose, sources drop bits of markup all the time and a
/// missing poster should never cost us the whole listing

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub poster: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    // tv, movie, ova... whatever the source calls it
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    // "EP 12", "HD", "2019"... free form badge text
    #[serde(default)]
    pub episodes: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub items: Vec<CatalogItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HomePage {
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u32,
    pub has_next_page: bool,
    #[serde(default)]
    pub total_pages: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub results: Vec<CatalogItem>,
    pub pagination: Pagination,
}

/// the id is the source's own url path segment (or query id), we never hand out our own ids so
/// the same episode is the same key across requests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeRef {
    pub episode_id: String,
    pub number: Option<u32>,
    #[serde(default)]
    pub title: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub season: u32,
    pub episodes: Vec<EpisodeRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesDetails {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub poster: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub seasons: Vec<Season>,
}

/// either `embed_url` is there already or `id` has to go through `resolve_server` first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescriptor {
    pub id: String,
    pub name: String,
    // sub / dub / raw or a language code, depends on the source
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub embed_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeServers {
    #[serde(default)]
    pub title: Option<String>,
    pub servers: Vec<ServerDescriptor>,
}
