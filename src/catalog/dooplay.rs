// wordpress catalogs running the dooplay theme (or one of its many forks). everything is server
// rendered except the player, which sits behind admin-ajax, and on some installs the older seasons
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::html::{
    attr_of, first_number, image_of, last_number, own_text, record_family, selector, slug_from_url,
    text_of,
};
use super::{
    CatalogItem, CatalogSource, EpisodeRef, EpisodeServers, HomePage, Pagination, ScrapeError,
    ScrapeResult, SearchPage, Season, Section, SeriesDetails, ServerDescriptor, SourceClient,
    bounded_suggestions,
};

const SOURCE: &str = "dooplay";
const AJAX_PATH: &str = "/wp-admin/admin-ajax.php";
/// admin-ajax action that renders one season's episode list
pub const SEASON_SWITCH_ACTION: &str = "dooplay_season_episodes";
/// admin-ajax action that hands out the player embed
pub const PLAYER_ACTION: &str = "doo_player_ajax";

static IFRAME_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<iframe[^>]+src=["']([^"']+)["']"#).expect("static regex"));
static POST_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:[?&]p=|postid-)(\d+)").expect("static regex"));

pub struct DooplaySource {
    client: SourceClient,
    suggestions_timeout: Duration,
}

impl DooplaySource {
    pub fn new(client: SourceClient, suggestions_timeout: Duration) -> Self {
        Self {
            client,
            suggestions_timeout,
        }
    }

    fn details_path(id: &str) -> String {
        if id.starts_with("http://") || id.starts_with("https://") || id.contains('/') {
            id.to_string()
        } else {
            format!("/tvshows/{}/", id)
        }
    }

    fn search_path(query: &str, page: u32) -> String {
        let q = urlencoding::encode(query.trim());
        if page <= 1 {
            format!("/?s={}", q)
        } else {
            format!("/page/{}/?s={}", page, q)
        }
    }

    async fn fetch_season(&self, post_id: &str, season: u32) -> Vec<EpisodeRef> {
        let season_str = season.to_string();
        let form = [
            ("action", SEASON_SWITCH_ACTION),
            ("post", post_id),
            ("season", season_str.as_str()),
        ];

        match self.client.post_form(AJAX_PATH, &form).await {
            Ok(fragment) => {
                let episodes = parse_season_fragment(&fragment);
                debug!(
                    "season {} of post {} lazy loaded with {} episodes",
                    season,
                    post_id,
                    episodes.len()
                );
                episodes
            }
            Err(e) => {
                // best effort, an empty season is better than failing the whole details page
                warn!("season switch for post {} season {} failed: {}", post_id, season, e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl CatalogSource for DooplaySource {
    fn id(&self) -> &'static str {
        SOURCE
    }

    async fn home(&self) -> ScrapeResult<HomePage> {
        let html = self.client.get_html("/").await?;
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
        bounded_suggestions(SOURCE, self.suggestions_timeout, async {
            Ok(self.search(query, 1).await?.results)
        })
        .await
    }

    async fn details(&self, id: &str) -> ScrapeResult<SeriesDetails> {
        let html = self.client.get_html(&Self::details_path(id)).await?;
        let parsed = parse_details(&html);

        let mut details = parsed.details;
        let missing: Vec<usize> = details
            .seasons
            .iter()
            .enumerate()
            .filter(|(_, s)| s.episodes.is_empty())
            .map(|(i, _)| i)
            .collect();

        if missing.is_empty() {
            return Ok(details);
        }

        let Some(post_id) = parsed.post_id else {
            warn!(
                "{} seasons without inline episodes but no post id on {}",
                missing.len(),
                id
            );
            return Ok(details);
        };

        info!(
            "{} of {} seasons not inlined for post {}, switching seasons",
            missing.len(),
            details.seasons.len(),
            post_id
        );

        let fetched = join_all(
            missing
                .iter()
                .map(|&i| self.fetch_season(&post_id, details.seasons[i].season)),
        )
        .await;

        for (i, episodes) in missing.into_iter().zip(fetched) {
            details.seasons[i].episodes = episodes;
        }

        Ok(details)
    }

    async fn episode(&self, url: &str) -> ScrapeResult<EpisodeServers> {
        let html = self.client.get_html(url).await?;
        Ok(parse_servers(&html))
    }

    async fn resolve_server(&self, server_id: &str) -> ScrapeResult<String> {
        let mut parts = server_id.splitn(3, ':');
        let (Some(post), Some(nume), Some(kind)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ScrapeError::InvalidServerId(server_id.to_string()));
        };

        let form = [
            ("action", PLAYER_ACTION),
            ("post", post),
            ("nume", nume),
            ("type", kind),
        ];
        let body = self.client.post_form(AJAX_PATH, &form).await?;

        parse_player_response(&body).ok_or_else(|| ScrapeError::Decode {
            url: self.client.absolute(AJAX_PATH),
            reason: format!("no embed url for server {}", server_id),
        })
    }
}

fn card(article: ElementRef<'_>) -> Option<CatalogItem> {
    let url = attr_of(article, "a[href]", "href")?;
    let title = text_of(article, ".data h3")
        .or_else(|| text_of(article, "h3"))
        .or_else(|| attr_of(article, "img", "alt"))?;

    let classes = article.value().classes().collect::<Vec<_>>();
    let kind = if classes.contains(&"tvshows") {
        Some("tv".to_string())
    } else if classes.contains(&"movies") {
        Some("movie".to_string())
    } else {
        None
    };

    Some(CatalogItem {
        id: slug_from_url(&url),
        title,
        poster: image_of(article),
        url: Some(url),
        kind,
        episodes: text_of(article, ".data span"),
        quality: text_of(article, ".quality"),
    })
}

fn ranked(item: ElementRef<'_>) -> Option<CatalogItem> {
    let url = attr_of(item, ".title a", "href").or_else(|| attr_of(item, "a[href]", "href"))?;
    let title = text_of(item, ".title a").or_else(|| attr_of(item, "img", "alt"))?;
    Some(CatalogItem {
        id: slug_from_url(&url),
        title,
        poster: image_of(item),
        url: Some(url),
        kind: None,
        episodes: None,
        quality: text_of(item, ".rating"),
    })
}

fn genre(link: ElementRef<'_>) -> Option<CatalogItem> {
    let url = link.value().attr("href")?.to_string();
    let title = own_text(link)?;
    Some(CatalogItem {
        id: slug_from_url(&url),
        title,
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
    if items.is_empty() {
        None
    } else {
        Some(Section {
            name: family.to_string(),
            items,
        })
    }
}

pub fn parse_home(html: &str) -> HomePage {
    let document = Html::parse_document(html);

    let sections: Vec<Section> = [
        collect_section(&document, "spotlight", "#slider-movies-tvshows article.item", card),
        collect_section(&document, "trending", "#featured-titles article.item", card),
        collect_section(&document, "top_rated", ".top-imdb-list .top-imdb-item", ranked),
        collect_section(&document, "genres", "nav.genres li a", genre),
    ]
    .into_iter()
    .flatten()
    .collect();

    if !sections.is_empty() {
        return HomePage { sections };
    }

    // primary family found nothing, try the plain content cards before giving up
    HomePage {
        sections: collect_section(&document, "latest", "article.item", card)
            .into_iter()
            .collect(),
    }
}

pub fn parse_search(html: &str, requested_page: u32) -> SearchPage {
    let document = Html::parse_document(html);

    let results: Vec<CatalogItem> = document
        .select(&selector(".result-item article"))
        .filter_map(|article| {
            let url = attr_of(article, ".details .title a", "href")
                .or_else(|| attr_of(article, ".thumbnail a", "href"))?;
            let title = text_of(article, ".details .title a")
                .or_else(|| attr_of(article, "img", "alt"))?;
            let kind = article
                .select(&selector(".thumbnail span"))
                .next()
                .and_then(|span| span.value().classes().next())
                .map(|class| match class {
                    "tvshows" => "tv".to_string(),
                    "movies" => "movie".to_string(),
                    other => other.to_string(),
                });
            Some(CatalogItem {
                id: slug_from_url(&url),
                title,
                poster: image_of(article),
                url: Some(url),
                kind,
                episodes: text_of(article, ".meta .year"),
                quality: None,
            })
        })
        .collect();
    record_family(SOURCE, "search", results.len());

    let current_page = text_of(document.root_element(), ".pagination span.current")
        .and_then(|t| first_number(&t))
        .unwrap_or(requested_page);

    let total_pages = document
        .select(&selector(".pagination span"))
        .filter_map(own_text)
        .find(|t| t.contains(" of "))
        .and_then(|t| last_number(&t));

    let has_next_link = document
        .select(&selector(".pagination a.arrow_pag #nextpagination"))
        .next()
        .is_some();

    let has_next_page = match total_pages {
        Some(total) => current_page < total,
        None => has_next_link,
    };

    SearchPage {
        results,
        pagination: Pagination {
            current_page,
            has_next_page,
            total_pages,
        },
    }
}

/// what the series page gives us before any season switching happens
#[derive(Debug, Default)]
pub struct ParsedDetails {
    pub details: SeriesDetails,
    pub post_id: Option<String>,
}

fn episode_entry(li: ElementRef<'_>) -> Option<EpisodeRef> {
    let url = attr_of(li, ".episodiotitle a", "href").or_else(|| attr_of(li, "a[href]", "href"))?;
    Some(EpisodeRef {
        episode_id: slug_from_url(&url),
        number: text_of(li, ".numerando").and_then(|n| last_number(&n)),
        title: text_of(li, ".episodiotitle a"),
        url,
    })
}

pub fn parse_details(html: &str) -> ParsedDetails {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let title = text_of(root, ".sheader .data h1").or_else(|| text_of(root, "h1"));
    let poster = root
        .select(&selector(".sheader .poster"))
        .next()
        .and_then(image_of);
    let description = text_of(root, "#info .wp-content").or_else(|| text_of(root, ".wp-content"));

    let post_id = attr_of(root, "link[rel=shortlink]", "href")
        .or_else(|| attr_of(root, "body", "class"))
        .and_then(|s| POST_ID.captures(&s).map(|c| c[1].to_string()))
        .or_else(|| attr_of(root, "[data-post]", "data-post"));

    // every .se-c is one entry of the season selector, the inline list may be empty when the
    // theme only renders the newest season
    let seasons: Vec<Season> = root
        .select(&selector("#seasons .se-c"))
        .enumerate()
        .map(|(index, block)| {
            let season = text_of(block, ".se-q .se-t")
                .and_then(|t| first_number(&t))
                .unwrap_or(index as u32 + 1);
            let episodes = block
                .select(&selector("ul.episodios li"))
                .filter_map(episode_entry)
                .collect();
            Season { season, episodes }
        })
        .collect();
    record_family(SOURCE, "seasons", seasons.len());

    ParsedDetails {
        details: SeriesDetails {
            title,
            poster,
            description,
            seasons,
        },
        post_id,
    }
}

/// the season switch endpoint answers with a bare `<ul class="episodios">` fragment
pub fn parse_season_fragment(html: &str) -> Vec<EpisodeRef> {
    let fragment = Html::parse_fragment(html);
    let episodes: Vec<EpisodeRef> = fragment
        .select(&selector("ul.episodios li"))
        .filter_map(episode_entry)
        .collect();
    record_family(SOURCE, "season_fragment", episodes.len());
    episodes
}

pub fn parse_servers(html: &str) -> EpisodeServers {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let servers: Vec<ServerDescriptor> = root
        .select(&selector("li.dooplay_player_option"))
        .filter_map(|li| {
            let el = li.value();
            let post = el.attr("data-post")?;
            let nume = el.attr("data-nume")?;
            // the trailer is a player option too
            if nume == "trailer" {
                return None;
            }
            let kind = el.attr("data-type").unwrap_or("tv");

            // flags live at .../flags/en.png, the file stem is the language
            let category = attr_of(li, ".flag img", "src").map(|src| {
                slug_from_url(&src)
                    .rsplit_once('.')
                    .map(|(stem, _)| stem.to_string())
                    .unwrap_or_else(|| slug_from_url(&src))
            });

            Some(ServerDescriptor {
                id: format!("{}:{}:{}", post, nume, kind),
                name: text_of(li, ".title")
                    .or_else(|| text_of(li, ".server"))
                    .unwrap_or_else(|| format!("Server {}", nume)),
                category,
                embed_url: None,
            })
        })
        .collect();
    record_family(SOURCE, "servers", servers.len());

    EpisodeServers {
        title: text_of(root, ".epih1").or_else(|| text_of(root, "h1")),
        servers,
    }
}

#[derive(Deserialize)]
struct PlayerResponse {
    #[serde(default)]
    embed_url: Option<String>,
}

/// `embed_url` is either the url itself or a whole iframe tag depending on the theme version
pub fn parse_player_response(body: &str) -> Option<String> {
    let response: PlayerResponse = serde_json::from_str(body).ok()?;
    let embed = response.embed_url?.trim().to_string();
    if embed.is_empty() {
        return None;
    }
    if embed.starts_with('<') {
        return IFRAME_SRC.captures(&embed).map(|c| c[1].to_string());
    }
    Some(embed)
}
