// zoro-style anime catalogs. listing pages are server rendered, anything per-episode comes from
// the /ajax/v2 endpoints as json with an html string inside
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::html::{
    attr_of, first_number, image_of, own_text, record_family, selector, slug_from_url, text_of,
};
use super::{
    CatalogItem, CatalogSource, EpisodeRef, EpisodeServers, HomePage, Pagination, ScrapeError,
    ScrapeResult, SearchPage, Season, Section, SeriesDetails, ServerDescriptor, SourceClient,
    bounded_suggestions,
};

const SOURCE: &str = "zoro";
/// enclosing server blocks are tagged `servers-sub`, `servers-dub`, `servers-raw`
const SERVER_GROUP_PREFIX: &str = "servers-";

static PAGE_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]page=(\d+)").expect("static regex"));
static TRAILING_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"-(\d+)$").expect("static regex"));

/// every /ajax endpoint wraps its markup like this
#[derive(Debug, Deserialize)]
struct FragmentEnvelope {
    #[serde(default)]
    html: String,
}

#[derive(Debug, Deserialize)]
struct SourceLink {
    #[serde(default)]
    link: Option<String>,
}

pub struct ZoroSource {
    client: SourceClient,
    suggestions_timeout: Duration,
}

impl ZoroSource {
    pub fn new(client: SourceClient, suggestions_timeout: Duration) -> Self {
        Self {
            client,
            suggestions_timeout,
        }
    }

    fn search_path(query: &str, page: u32) -> String {
        format!(
            "/search?keyword={}&page={}",
            urlencoding::encode(query.trim()),
            page
        )
    }

    async fn fetch_suggestions(&self, query: &str) -> ScrapeResult<Vec<CatalogItem>> {
        let path = format!(
            "/ajax/search/suggest?keyword={}",
            urlencoding::encode(query.trim())
        );
        let envelope: FragmentEnvelope = self.client.get_json(&path).await?;
        Ok(parse_suggestions(&envelope.html))
    }
}

#[async_trait]
impl CatalogSource for ZoroSource {
    fn id(&self) -> &'static str {
        SOURCE
    }

    async fn home(&self) -> ScrapeResult<HomePage> {
        let html = self.client.get_html("/home").await?;
        let home = parse_home(&html);
        info!("{} home parsed into {} sections", SOURCE, home.sections.len());
        Ok(home)
    }

    async fn search(&self, query: &str, page: u32) -> ScrapeResult<SearchPage> {
        let page = page.max(1);
        let html = self
            .client
            .get_html(&Self::search_path(query, page))
            .await?;
        Ok(parse_search(&html, page))
    }

    async fn suggestions(&self, query: &str) -> Vec<CatalogItem> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        bounded_suggestions(SOURCE, self.suggestions_timeout, self.fetch_suggestions(query)).await
    }

    async fn details(&self, id: &str) -> ScrapeResult<SeriesDetails> {
        let path = if id.starts_with("http") || id.starts_with('/') {
            id.to_string()
        } else {
            format!("/{}", id)
        };
        let html = self.client.get_html(&path).await?;
        let parsed = parse_details(&html);

        let mut details = parsed.details;
        if details
            .seasons
            .first()
            .is_some_and(|s| !s.episodes.is_empty())
        {
            return Ok(details);
        }

        // nothing inline (the usual case), the list comes from the fragment endpoint
        let Some(anime_id) = parsed
            .anime_id
            .or_else(|| TRAILING_ID.captures(&slug_from_url(id)).map(|c| c[1].to_string()))
        else {
            debug!("no anime id on {}, returning details without episodes", id);
            return Ok(details);
        };

        // best effort like any lazy load, the series page itself already parsed fine
        let episodes = match self
            .client
            .get_json::<FragmentEnvelope>(&format!("/ajax/v2/episode/list/{}", anime_id))
            .await
        {
            Ok(envelope) => parse_episode_list(&envelope.html),
            Err(e) => {
                warn!("episode list for anime {} failed: {}", anime_id, e);
                Vec::new()
            }
        };
        details.seasons = vec![Season {
            season: 1,
            episodes,
        }];

        Ok(details)
    }

    async fn episode(&self, url: &str) -> ScrapeResult<EpisodeServers> {
        let episode_id = episode_id_from_url(url);
        let envelope: FragmentEnvelope = self
            .client
            .get_json(&format!(
                "/ajax/v2/episode/servers?episodeId={}",
                urlencoding::encode(&episode_id)
            ))
            .await?;
        Ok(parse_servers(&envelope.html))
    }

    async fn resolve_server(&self, server_id: &str) -> ScrapeResult<String> {
        if server_id.is_empty() || !server_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ScrapeError::InvalidServerId(server_id.to_string()));
        }
        let path = format!("/ajax/v2/episode/sources?id={}", server_id);
        let source: SourceLink = self.client.get_json(&path).await?;
        source
            .link
            .filter(|l| !l.is_empty())
            .ok_or_else(|| ScrapeError::Decode {
                url: self.client.absolute(&path),
                reason: format!("no link for server {}", server_id),
            })
    }
}

/// `/watch/one-piece-100?ep=2142` -> `2142`, anything without `ep=` falls back to the path
pub fn episode_id_from_url(url: &str) -> String {
    url.split_once('?')
        .and_then(|(_, query)| {
            query
                .split('&')
                .find_map(|pair| pair.strip_prefix("ep="))
                .map(str::to_string)
        })
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| slug_from_url(url))
}

fn film_card(element: ElementRef<'_>) -> Option<CatalogItem> {
    let url =
        attr_of(element, ".film-name a", "href").or_else(|| attr_of(element, "a[href]", "href"))?;
    let title = attr_of(element, ".film-name a", "title")
        .or_else(|| text_of(element, ".film-name"))
        .or_else(|| attr_of(element, "img", "alt"))?;

    Some(CatalogItem {
        id: slug_from_url(&url),
        title,
        poster: image_of(element),
        url: Some(url),
        kind: text_of(element, ".fd-infor .fdi-item"),
        episodes: text_of(element, ".tick-sub").or_else(|| text_of(element, ".tick-eps")),
        quality: text_of(element, ".tick-quality"),
    })
}

fn spotlight(slide: ElementRef<'_>) -> Option<CatalogItem> {
    // second button is the detail page, first one jumps straight into the player
    let url = attr_of(slide, ".desi-buttons a.btn-secondary", "href")
        .or_else(|| attr_of(slide, "a[href]", "href"))?;
    let title = text_of(slide, ".desi-head-title")?;
    Some(CatalogItem {
        id: slug_from_url(&url),
        title,
        poster: image_of(slide),
        url: Some(url),
        kind: text_of(slide, ".sc-detail .scd-item"),
        episodes: text_of(slide, ".tick-sub"),
        quality: text_of(slide, ".tick-quality"),
    })
}

fn trending(slide: ElementRef<'_>) -> Option<CatalogItem> {
    let url = attr_of(slide, "a.film-poster", "href")
        .or_else(|| attr_of(slide, "a[href]", "href"))?;
    let title = text_of(slide, ".film-title").or_else(|| attr_of(slide, "img", "alt"))?;
    Some(CatalogItem {
        id: slug_from_url(&url),
        title,
        poster: image_of(slide),
        url: Some(url),
        ..Default::default()
    })
}

fn genre(link: ElementRef<'_>) -> Option<CatalogItem> {
    let url = link.value().attr("href")?.to_string();
    Some(CatalogItem {
        id: slug_from_url(&url),
        title: own_text(link)?,
        url: Some(url),
        ..Default::default()
    })
}

fn collect_section(
    document: &Html,
    family: &'static str,
    css: &str,
    parse: fn(ElementRef<'_>) -> Option<CatalogItem>,
) -> Option<Section> {
    let items: Vec<CatalogItem> = document.select(&selector(css)).filter_map(parse).collect();
    record_family(SOURCE, family, items.len());
    (!items.is_empty()).then(|| Section {
        name: family.to_string(),
        items,
    })
}

pub fn parse_home(html: &str) -> HomePage {
    let document = Html::parse_document(html);

    let sections: Vec<Section> = [
        collect_section(&document, "spotlight", "#slider .swiper-slide", spotlight),
        collect_section(&document, "trending", "#trending-home .swiper-slide", trending),
        collect_section(
            &document,
            "top_airing",
            "#anime-featured .anif-block-01 li",
            film_card,
        ),
        collect_section(&document, "genres", "#sidebar_subs_genre a.nav-link", genre),
    ]
    .into_iter()
    .flatten()
    .collect();

    if !sections.is_empty() {
        return HomePage { sections };
    }

    HomePage {
        sections: collect_section(&document, "latest", ".flw-item", film_card)
            .into_iter()
            .collect(),
    }
}

pub fn parse_search(html: &str, requested_page: u32) -> SearchPage {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let results: Vec<CatalogItem> = root
        .select(&selector(".film_list-wrap .flw-item"))
        .filter_map(film_card)
        .collect();
    record_family(SOURCE, "search", results.len());

    let current_page = text_of(root, ".pagination .page-item.active")
        .and_then(|t| first_number(&t))
        .unwrap_or(requested_page);

    let total_pages = attr_of(root, ".pagination a[title=Last]", "href")
        .and_then(|href| PAGE_PARAM.captures(&href).and_then(|c| c[1].parse().ok()))
        .or_else(|| {
            // no "last" link when we're already on it, the highest numbered item is the total
            root.select(&selector(".pagination .page-item a"))
                .filter_map(own_text)
                .filter_map(|t| t.parse::<u32>().ok())
                .max()
        });

    let has_next_page = root
        .select(&selector(".pagination a[title=Next]"))
        .next()
        .is_some()
        || total_pages.is_some_and(|total| current_page < total);

    SearchPage {
        results,
        pagination: Pagination {
            current_page,
            has_next_page,
            total_pages,
        },
    }
}

pub fn parse_suggestions(fragment_html: &str) -> Vec<CatalogItem> {
    let fragment = Html::parse_fragment(fragment_html);
    let items: Vec<CatalogItem> = fragment
        .select(&selector("a.nav-item"))
        .filter(|a| !a.value().classes().any(|c| c == "nav-bottom"))
        .filter_map(|a| {
            let url = a.value().attr("href")?.to_string();
            let title = text_of(a, ".film-name")?;
            Some(CatalogItem {
                id: slug_from_url(&url),
                title,
                poster: image_of(a),
                url: Some(url),
                // "Aug 1, 2020 · TV · 24m", the middle bare text is the type
                kind: a
                    .select(&selector(".film-infor"))
                    .next()
                    .and_then(|infor| {
                        infor
                            .children()
                            .filter_map(|child| child.value().as_text())
                            .map(|t| t.trim().to_string())
                            .find(|t| !t.is_empty())
                    }),
                ..Default::default()
            })
        })
        .collect();
    record_family(SOURCE, "suggestions", items.len());
    items
}

#[derive(Debug, Default)]
pub struct ParsedDetails {
    pub details: SeriesDetails,
    pub anime_id: Option<String>,
}

pub fn parse_details(html: &str) -> ParsedDetails {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let title = text_of(root, ".anisc-detail .film-name");
    let poster = root
        .select(&selector(".anisc-poster"))
        .next()
        .and_then(image_of);
    let description = text_of(root, ".anisc-detail .film-description .text")
        .or_else(|| text_of(root, ".anisc-detail .film-description"));
    let anime_id = attr_of(root, "#wrapper[data-id]", "data-id");

    let inline = root
        .select(&selector("#episodes-content a.ep-item"))
        .filter_map(episode_link)
        .collect::<Vec<_>>();

    let seasons = if inline.is_empty() {
        Vec::new()
    } else {
        vec![Season {
            season: 1,
            episodes: inline,
        }]
    };

    ParsedDetails {
        details: SeriesDetails {
            title,
            poster,
            description,
            seasons,
        },
        anime_id,
    }
}

fn episode_link(a: ElementRef<'_>) -> Option<EpisodeRef> {
    let url = a.value().attr("href")?.to_string();
    Some(EpisodeRef {
        episode_id: episode_id_from_url(&url),
        number: a
            .value()
            .attr("data-number")
            .and_then(|n| n.trim().parse().ok()),
        title: a
            .value()
            .attr("title")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| text_of(a, ".ep-name")),
        url,
    })
}

pub fn parse_episode_list(fragment_html: &str) -> Vec<EpisodeRef> {
    let fragment = Html::parse_fragment(fragment_html);
    let episodes: Vec<EpisodeRef> = fragment
        .select(&selector("a.ep-item"))
        .filter_map(episode_link)
        .collect();
    record_family(SOURCE, "episodes", episodes.len());
    episodes
}

/// category is whatever trails `servers-` on the enclosing block's class list
pub fn server_group(block: ElementRef<'_>) -> Option<String> {
    block
        .value()
        .classes()
        .find_map(|class| class.strip_prefix(SERVER_GROUP_PREFIX))
        .filter(|group| !group.is_empty())
        .map(str::to_string)
}

pub fn parse_servers(fragment_html: &str) -> EpisodeServers {
    let fragment = Html::parse_fragment(fragment_html);
    let root = fragment.root_element();

    let mut servers = Vec::new();
    for block in root.select(&selector(".ps_-block")) {
        let category = server_group(block);
        for item in block.select(&selector(".server-item[data-id]")) {
            let Some(id) = item.value().attr("data-id") else {
                continue;
            };
            servers.push(ServerDescriptor {
                id: id.to_string(),
                name: own_text(item).unwrap_or_else(|| format!("Server {}", id)),
                category: category
                    .clone()
                    .or_else(|| item.value().attr("data-type").map(str::to_string)),
                embed_url: None,
            });
        }
    }
    record_family(SOURCE, "servers", servers.len());

    EpisodeServers {
        title: text_of(root, ".server-notice b"),
        servers,
    }
}
