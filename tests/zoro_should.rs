use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use reelgate::catalog::zoro::{
    ZoroSource, episode_id_from_url, parse_details, parse_episode_list, parse_home, parse_search,
    parse_servers, parse_suggestions,
};
use reelgate::catalog::{CatalogSource, ScrapeError, SourceClient};

const HOME: &str = r#"<html><body>
<div id="slider"><div class="swiper-wrapper">
  <div class="swiper-slide"><div class="deslide-item">
    <div class="desi-head-title dynamic-name">One Piece</div>
    <div class="sc-detail"><div class="scd-item">TV</div></div>
    <div class="desi-buttons">
      <a class="btn btn-primary" href="/watch/one-piece-100">Watch now</a>
      <a class="btn btn-secondary" href="/one-piece-100">Detail</a>
    </div>
    <img class="film-poster-img" data-src="https://img.example/op.jpg">
  </div></div>
</div></div>
<div id="trending-home"><div class="swiper-slide"><div class="item">
  <div class="film-title dynamic-name">Naruto</div>
  <a class="film-poster" href="/naruto-677"><img data-src="https://img.example/n.jpg" alt="Naruto"></a>
</div></div></div>
<div id="sidebar_subs_genre"><ul><li><a class="nav-link" href="/genre/action">Action</a></li></ul></div>
</body></html>"#;

const SEARCH: &str = r#"<html><body>
<div class="film_list-wrap">
  <div class="flw-item">
    <div class="film-poster"><div class="tick-sub">12</div><img data-src="https://img.example/x.jpg" alt="X"><a href="/watch/title-x-1" class="film-poster-ahref"></a></div>
    <div class="film-detail">
      <h3 class="film-name"><a href="/title-x-1" title="Title X">Title X</a></h3>
      <div class="fd-infor"><span class="fdi-item">TV</span></div>
    </div>
  </div>
</div>
<ul class="pagination">
  <li class="page-item active"><a class="page-link">1</a></li>
  <li class="page-item"><a class="page-link" href="/search?keyword=x&page=2">2</a></li>
  <li class="page-item"><a class="page-link" title="Next" href="/search?keyword=x&page=2">&rsaquo;</a></li>
  <li class="page-item"><a class="page-link" title="Last" href="/search?keyword=x&page=5">&raquo;</a></li>
</ul>
</body></html>"#;

const DETAILS: &str = r#"<html><body>
<div id="wrapper" data-id="100">
  <div class="anisc-poster"><img class="film-poster-img" src="https://img.example/op.jpg"></div>
  <div class="anisc-detail">
    <h2 class="film-name dynamic-name">One Piece</h2>
    <div class="film-description m-hide"><div class="text">Pirates.</div></div>
  </div>
</div>
</body></html>"#;

const EPISODES: &str = r#"<div class="ss-list">
  <a title="Romance Dawn" class="ssl-item ep-item" data-number="1" data-id="2142" href="/watch/one-piece-100?ep=2142"><div class="ep-name">Romance Dawn</div></a>
  <a title="" class="ssl-item ep-item" data-number="2" data-id="2143" href="/watch/one-piece-100?ep=2143"><div class="ep-name">Enter the Great Swordsman</div></a>
</div>"#;

const SERVERS: &str = r#"<div class="server-notice"><strong>You are watching <b>Episode 1</b></strong></div>
<div class="ps_-block ps_-block-sub servers-sub"><div class="ps__-list">
  <div class="item server-item" data-type="sub" data-id="661" data-server-id="4"><a class="btn">HD-1</a></div>
  <div class="item server-item" data-type="sub" data-id="662" data-server-id="1"><a class="btn">HD-2</a></div>
</div></div>
<div class="ps_-block ps_-block-dub servers-dub"><div class="ps__-list">
  <div class="item server-item" data-type="dub" data-id="771" data-server-id="4"><a class="btn">HD-1</a></div>
</div></div>"#;

fn suggestion(slug: &str, title: &str) -> String {
    format!(
        r#"<a href="/{slug}" class="nav-item"><div class="film-poster"><img data-src="https://img.example/{slug}.jpg"></div><div class="srp-detail"><h3 class="film-name">{title}</h3><div class="film-infor"><span>Oct 20, 1999</span><i class="dot"></i>TV<i class="dot"></i><span>24m</span></div></div></a>"#
    )
}

#[test]
fn test_episode_id_comes_from_the_ep_param() {
    assert_eq!(episode_id_from_url("/watch/one-piece-100?ep=2142"), "2142");
    assert_eq!(episode_id_from_url("https://x/watch/a-1?foo=1&ep=9"), "9");
    assert_eq!(episode_id_from_url("https://x/watch/one-piece-100"), "one-piece-100");
    assert_eq!(episode_id_from_url("/watch/one-piece-100?ep="), "one-piece-100");
}

#[test]
fn test_home_reads_every_family() {
    let home = parse_home(HOME);
    let names: Vec<&str> = home.sections.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["spotlight", "trending", "genres"]);

    let spotlight = &home.sections[0].items[0];
    // the detail button, not the watch one
    assert_eq!(spotlight.id, "one-piece-100");
    assert_eq!(spotlight.kind.as_deref(), Some("TV"));
    assert_eq!(spotlight.poster.as_deref(), Some("https://img.example/op.jpg"));

    assert_eq!(home.sections[1].items[0].id, "naruto-677");
    assert_eq!(home.sections[2].items[0].title, "Action");
}

#[test]
fn test_home_without_sections_is_empty() {
    assert!(parse_home("<html><body></body></html>").sections.is_empty());
}

#[test]
fn test_search_reads_cards_and_last_page() {
    let page = parse_search(SEARCH, 1);
    assert_eq!(page.results.len(), 1);

    let item = &page.results[0];
    assert_eq!(item.id, "title-x-1");
    assert_eq!(item.title, "Title X");
    assert_eq!(item.kind.as_deref(), Some("TV"));
    assert_eq!(item.episodes.as_deref(), Some("12"));

    assert_eq!(page.pagination.current_page, 1);
    assert_eq!(page.pagination.total_pages, Some(5));
    assert!(page.pagination.has_next_page);
}

#[test]
fn test_search_on_the_last_page_has_no_next() {
    let html = r#"<ul class="pagination">
        <li class="page-item"><a class="page-link" href="/search?keyword=x&page=1">1</a></li>
        <li class="page-item active"><a class="page-link">2</a></li>
    </ul>"#;
    let page = parse_search(html, 2);
    assert_eq!(page.pagination.current_page, 2);
    assert_eq!(page.pagination.total_pages, Some(2));
    assert!(!page.pagination.has_next_page);
}

#[test]
fn test_suggestions_skip_the_view_all_link() {
    let html = format!(
        r#"{}<a href="/search?keyword=one" class="nav-item nav-bottom">View all results</a>"#,
        suggestion("one-piece-100", "One Piece")
    );
    let items = parse_suggestions(&html);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "one-piece-100");
    assert_eq!(items[0].title, "One Piece");
    assert_eq!(items[0].kind.as_deref(), Some("TV"));
}

#[test]
fn test_details_without_inline_episodes_expose_the_anime_id() {
    let parsed = parse_details(DETAILS);
    assert_eq!(parsed.anime_id.as_deref(), Some("100"));
    assert_eq!(parsed.details.title.as_deref(), Some("One Piece"));
    assert_eq!(parsed.details.description.as_deref(), Some("Pirates."));
    assert!(parsed.details.seasons.is_empty());
}

#[test]
fn test_episode_list_fragment() {
    let episodes = parse_episode_list(EPISODES);
    assert_eq!(episodes.len(), 2);
    assert_eq!(episodes[0].episode_id, "2142");
    assert_eq!(episodes[0].number, Some(1));
    assert_eq!(episodes[0].title.as_deref(), Some("Romance Dawn"));
    // empty title attribute falls back to the name element
    assert_eq!(
        episodes[1].title.as_deref(),
        Some("Enter the Great Swordsman")
    );
}

#[test]
fn test_servers_take_their_category_from_the_block() {
    let servers = parse_servers(SERVERS);
    assert_eq!(servers.title.as_deref(), Some("Episode 1"));

    let summary: Vec<(&str, &str, Option<&str>)> = servers
        .servers
        .iter()
        .map(|s| (s.id.as_str(), s.name.as_str(), s.category.as_deref()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("661", "HD-1", Some("sub")),
            ("662", "HD-2", Some("sub")),
            ("771", "HD-1", Some("dub")),
        ]
    );
}

#[derive(Deserialize)]
struct ServersQuery {
    #[serde(rename = "episodeId")]
    episode_id: String,
}

#[derive(Deserialize)]
struct SuggestQuery {
    keyword: String,
}

async fn suggest(Query(query): Query<SuggestQuery>) -> Json<Value> {
    if query.keyword == "slow" {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    let html: String = (0..7)
        .map(|i| suggestion(&format!("show-{}", i), &format!("Show {}", i)))
        .collect();
    Json(json!({ "status": true, "html": html }))
}

async fn spawn_site() -> SocketAddr {
    let site = Router::new()
        .route("/one-piece-100", get(|| async { DETAILS }))
        .route(
            "/bleach-200",
            get(|| async { DETAILS.replace(r#"data-id="100""#, r#"data-id="200""#) }),
        )
        .route(
            "/ajax/v2/episode/list/200",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        )
        .route(
            "/ajax/v2/episode/list/100",
            get(|| async { Json(json!({ "status": true, "html": EPISODES })) }),
        )
        .route(
            "/ajax/v2/episode/servers",
            get(|Query(q): Query<ServersQuery>| async move {
                let html = if q.episode_id == "2142" { SERVERS } else { "" };
                Json(json!({ "status": true, "html": html }))
            }),
        )
        .route(
            "/ajax/v2/episode/sources",
            get(|| async {
                Json(json!({ "type": "iframe", "link": "https://megacloud.tv/embed-2/e-1/abc?k=1" }))
            }),
        )
        .route("/ajax/search/suggest", get(suggest));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, site).await.unwrap();
    });
    addr
}

fn source(addr: SocketAddr, suggestions_timeout: Duration) -> ZoroSource {
    ZoroSource::new(
        SourceClient::new(
            &format!("http://{}", addr),
            "test-agent",
            Duration::from_secs(5),
        ),
        suggestions_timeout,
    )
}

#[tokio::test]
async fn test_details_fetch_the_episode_list() {
    let addr = spawn_site().await;
    let details = source(addr, Duration::from_secs(1))
        .details("one-piece-100")
        .await
        .unwrap();

    assert_eq!(details.seasons.len(), 1);
    assert_eq!(details.seasons[0].season, 1);
    assert_eq!(details.seasons[0].episodes.len(), 2);
}

#[tokio::test]
async fn test_failed_episode_list_keeps_the_details() {
    let addr = spawn_site().await;
    let details = source(addr, Duration::from_secs(1))
        .details("bleach-200")
        .await
        .unwrap();

    assert_eq!(details.title.as_deref(), Some("One Piece"));
    assert_eq!(details.description.as_deref(), Some("Pirates."));
    assert_eq!(details.seasons.len(), 1);
    assert!(details.seasons[0].episodes.is_empty());
}

#[tokio::test]
async fn test_episode_servers_come_from_the_episode_id() {
    let addr = spawn_site().await;
    let servers = source(addr, Duration::from_secs(1))
        .episode("/watch/one-piece-100?ep=2142")
        .await
        .unwrap();
    assert_eq!(servers.servers.len(), 3);
}

#[tokio::test]
async fn test_server_resolves_to_its_link() {
    let addr = spawn_site().await;
    let embed = source(addr, Duration::from_secs(1))
        .resolve_server("661")
        .await
        .unwrap();
    assert_eq!(embed, "https://megacloud.tv/embed-2/e-1/abc?k=1");
}

#[tokio::test]
async fn test_server_id_with_path_characters_is_rejected() {
    let addr = spawn_site().await;
    let result = source(addr, Duration::from_secs(1))
        .resolve_server("../list/100")
        .await;
    assert!(matches!(result, Err(ScrapeError::InvalidServerId(_))));
}

#[tokio::test]
async fn test_suggestions_are_capped() {
    let addr = spawn_site().await;
    let items = source(addr, Duration::from_secs(1)).suggestions("show").await;
    assert_eq!(items.len(), 5);
    assert_eq!(items[0].id, "show-0");
}

#[tokio::test]
async fn test_slow_suggestions_give_up_quietly() {
    let addr = spawn_site().await;
    let items = source(addr, Duration::from_millis(50))
        .suggestions("slow")
        .await;
    assert!(items.is_empty());
}
