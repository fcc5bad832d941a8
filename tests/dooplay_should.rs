use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::routing::{get, post};
use axum::{Form, Router};
use futures::StreamExt;

use reelgate::catalog::dooplay::{
    DooplaySource, parse_details, parse_home, parse_player_response, parse_search,
    parse_season_fragment, parse_servers,
};
use reelgate::catalog::{CatalogSource, ScrapeError, SourceClient};

const HOME: &str = r#"<html><body>
<div id="slider-movies-tvshows">
  <article class="item tvshows">
    <div class="poster"><img src="data:image/gif;base64,R0lG" data-src="https://img.example/a.jpg" alt="Alpha"></div>
    <a href="https://site.example/tvshows/alpha/"></a>
    <div class="data"><h3>Alpha</h3><span>2021</span></div>
  </article>
</div>
<div id="featured-titles">
  <article class="item movies">
    <a href="https://site.example/movies/beta/"><img src="https://img.example/b.jpg" alt="Beta"></a>
    <div class="data"><h3>Beta</h3></div>
    <span class="quality">HD</span>
  </article>
</div>
<nav class="genres"><ul><li><a href="https://site.example/genre/drama/">Drama</a></li></ul></nav>
</body></html>"#;

const SEARCH: &str = r#"<html><body>
<div class="result-item"><article>
  <div class="image"><div class="thumbnail animation-2">
    <a href="https://site.example/tvshows/alpha/"><img src="https://img.example/a.jpg" alt="Alpha"><span class="tvshows">TV</span></a>
  </div></div>
  <div class="details">
    <div class="title"><a href="https://site.example/tvshows/alpha/">Alpha</a></div>
    <div class="meta"><span class="year">2021</span></div>
  </div>
</article></div>
<div class="result-item"><article>
  <div class="image"><div class="thumbnail"><a href="https://site.example/movies/beta/"><img src="https://img.example/b.jpg" alt="Beta"><span class="movies">Movie</span></a></div></div>
  <div class="details"><div class="title"><a href="https://site.example/movies/beta/">Beta</a></div></div>
</article></div>
<div class="pagination"><span>Page 1 of 3</span><span class="current">1</span><a class="inactive" href="/page/2/?s=a">2</a></div>
</body></html>"#;

const DETAILS: &str = r#"<html><head><link rel="shortlink" href="https://site.example/?p=4242"></head><body>
<div class="sheader">
  <div class="poster"><img src="https://img.example/p.jpg"></div>
  <div class="data"><h1>Alpha</h1></div>
</div>
<div id="info"><div class="wp-content"><p>A   long
  story.</p></div></div>
<div id="seasons">
  <div class="se-c"><div class="se-q"><span class="se-t">1</span></div><div class="se-a"><ul class="episodios">
    <li><div class="numerando">1 - 1</div><div class="episodiotitle"><a href="https://site.example/episodes/alpha-1x1/">Pilot</a></div></li>
    <li><div class="numerando">1 - 2</div><div class="episodiotitle"><a href="https://site.example/episodes/alpha-1x2/">Second</a></div></li>
  </ul></div></div>
  <div class="se-c"><div class="se-q"><span class="se-t">2</span></div><div class="se-a"><ul class="episodios"></ul></div></div>
</div>
</body></html>"#;

const SEASON_TWO: &str = r#"<ul class="episodios">
  <li><div class="numerando">2 - 1</div><div class="episodiotitle"><a href="https://site.example/episodes/alpha-2x1/">Return</a></div></li>
</ul>"#;

const SERVERS: &str = r#"<html><body>
<h1 class="epih1">Alpha 1x1</h1>
<ul id="playeroptionsul">
  <li id="player-option-trailer" class="dooplay_player_option" data-type="tv" data-post="4242" data-nume="trailer"><span class="title">Trailer</span></li>
  <li class="dooplay_player_option" data-type="tv" data-post="4242" data-nume="1">
    <span class="title">VidSrc</span><span class="server">vidsrc.to</span>
    <span class="flag"><img src="https://site.example/wp-content/themes/dooplay/assets/img/flags/en.png"></span>
  </li>
  <li class="dooplay_player_option" data-type="tv" data-post="4242" data-nume="2"><span class="server">filemoon.sx</span></li>
</ul>
</body></html>"#;

#[test]
fn test_home_sections_come_from_each_family() {
    let home = parse_home(HOME);
    let names: Vec<&str> = home.sections.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["spotlight", "trending", "genres"]);

    let alpha = &home.sections[0].items[0];
    assert_eq!(alpha.id, "alpha");
    assert_eq!(alpha.title, "Alpha");
    assert_eq!(alpha.kind.as_deref(), Some("tv"));
    assert_eq!(alpha.poster.as_deref(), Some("https://img.example/a.jpg"));

    let beta = &home.sections[1].items[0];
    assert_eq!(beta.kind.as_deref(), Some("movie"));
    assert_eq!(beta.quality.as_deref(), Some("HD"));

    assert_eq!(home.sections[2].items[0].id, "drama");
}

#[test]
fn test_home_without_sections_is_empty_not_an_error() {
    let home = parse_home("<html><body><p>maintenance</p></body></html>");
    assert!(home.sections.is_empty());
    assert_eq!(serde_json::to_value(&home).unwrap(), serde_json::json!({"sections": []}));
}

#[test]
fn test_home_falls_back_to_plain_cards() {
    let html = r#"<div class="content"><article class="item"><a href="/tvshows/gamma/"><img src="g.jpg"></a><div class="data"><h3>Gamma</h3></div></article></div>"#;
    let home = parse_home(html);
    assert_eq!(home.sections.len(), 1);
    assert_eq!(home.sections[0].name, "latest");
    assert_eq!(home.sections[0].items[0].id, "gamma");
}

#[test]
fn test_search_reads_results_and_pagination() {
    let page = parse_search(SEARCH, 1);
    assert_eq!(page.results.len(), 2);
    assert_eq!(page.results[0].kind.as_deref(), Some("tv"));
    assert_eq!(page.results[1].kind.as_deref(), Some("movie"));
    assert_eq!(page.pagination.current_page, 1);
    assert_eq!(page.pagination.total_pages, Some(3));
    assert!(page.pagination.has_next_page);
}

#[test]
fn test_search_without_pagination_is_a_last_page() {
    let page = parse_search("<html><body></body></html>", 2);
    assert!(page.results.is_empty());
    assert_eq!(page.pagination.current_page, 2);
    assert!(!page.pagination.has_next_page);
    assert_eq!(page.pagination.total_pages, None);
}

#[test]
fn test_details_keep_empty_seasons_and_the_post_id() {
    let parsed = parse_details(DETAILS);
    assert_eq!(parsed.post_id.as_deref(), Some("4242"));

    let details = parsed.details;
    assert_eq!(details.title.as_deref(), Some("Alpha"));
    assert_eq!(details.poster.as_deref(), Some("https://img.example/p.jpg"));
    assert_eq!(details.description.as_deref(), Some("A long story."));
    assert_eq!(details.seasons.len(), 2);
    assert_eq!(details.seasons[0].episodes.len(), 2);
    assert_eq!(details.seasons[0].episodes[1].episode_id, "alpha-1x2");
    assert_eq!(details.seasons[0].episodes[1].number, Some(2));
    assert_eq!(details.seasons[1].season, 2);
    assert!(details.seasons[1].episodes.is_empty());
}

#[test]
fn test_season_fragment_is_parsed() {
    let episodes = parse_season_fragment(SEASON_TWO);
    assert_eq!(episodes.len(), 1);
    assert_eq!(episodes[0].title.as_deref(), Some("Return"));
    assert_eq!(episodes[0].number, Some(1));
}

#[test]
fn test_servers_skip_the_trailer() {
    let servers = parse_servers(SERVERS);
    assert_eq!(servers.title.as_deref(), Some("Alpha 1x1"));
    assert_eq!(servers.servers.len(), 2);

    let first = &servers.servers[0];
    assert_eq!(first.id, "4242:1:tv");
    assert_eq!(first.name, "VidSrc");
    assert_eq!(first.category.as_deref(), Some("en"));
    assert!(first.embed_url.is_none());

    let second = &servers.servers[1];
    assert_eq!(second.name, "filemoon.sx");
    assert_eq!(second.category, None);
}

#[test]
fn test_player_response_unwraps_iframes() {
    let plain = r#"{"embed_url":"https://vidsrc.to/embed/tv/1","type":"iframe"}"#;
    assert_eq!(
        parse_player_response(plain).as_deref(),
        Some("https://vidsrc.to/embed/tv/1")
    );

    let tagged = r#"{"embed_url":"<iframe class=\"metaframe\" src=\"https://filemoon.sx/e/abc\" frameborder=\"0\"></iframe>","type":"iframe"}"#;
    assert_eq!(
        parse_player_response(tagged).as_deref(),
        Some("https://filemoon.sx/e/abc")
    );

    assert_eq!(parse_player_response(r#"{"embed_url":""}"#), None);
    assert_eq!(parse_player_response("<html>nope</html>"), None);
}

async fn admin_ajax(Form(form): Form<HashMap<String, String>>) -> String {
    match form.get("action").map(String::as_str) {
        Some("dooplay_season_episodes") if form.get("season").map(String::as_str) == Some("2") => {
            SEASON_TWO.to_string()
        }
        Some("doo_player_ajax") => {
            r#"{"embed_url":"<iframe src='https://vidsrc.to/embed/tv/4242/1/1'></iframe>","type":"iframe"}"#
                .to_string()
        }
        _ => String::new(),
    }
}

// headers and the first chunk go out right away, the rest comes far too late
async fn stalling_page() -> Body {
    let chunks = futures::stream::iter([0u64, 2_000]).then(|delay| async move {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok::<_, std::io::Error>(format!("<p>after {}ms</p>", delay))
    });
    Body::from_stream(chunks)
}

async fn spawn_site() -> SocketAddr {
    let site = Router::new()
        .route("/", get(|| async { "<html><body>under maintenance</body></html>" }))
        .route("/tvshows/alpha/", get(|| async { DETAILS }))
        .route("/wp-admin/admin-ajax.php", post(admin_ajax))
        .route("/stalls/", get(stalling_page));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, site).await.unwrap();
    });
    addr
}

fn source(addr: SocketAddr) -> DooplaySource {
    DooplaySource::new(
        SourceClient::new(
            &format!("http://{}", addr),
            "test-agent",
            Duration::from_secs(5),
        ),
        Duration::from_secs(1),
    )
}

#[tokio::test]
async fn test_details_switch_seasons_that_were_not_inlined() {
    let addr = spawn_site().await;

    let details = source(addr).details("alpha").await.unwrap();

    assert_eq!(details.seasons.len(), 2);
    assert_eq!(details.seasons[0].episodes.len(), 2);
    assert_eq!(details.seasons[1].episodes.len(), 1);
    assert_eq!(details.seasons[1].episodes[0].episode_id, "alpha-2x1");
}

#[tokio::test]
async fn test_home_of_an_empty_site_is_empty() {
    let addr = spawn_site().await;
    let home = source(addr).home().await.unwrap();
    assert!(home.sections.is_empty());
}

#[tokio::test]
async fn test_server_id_resolves_through_the_player_endpoint() {
    let addr = spawn_site().await;
    let embed = source(addr).resolve_server("4242:1:tv").await.unwrap();
    assert_eq!(embed, "https://vidsrc.to/embed/tv/4242/1/1");
}

#[tokio::test]
async fn test_malformed_server_id_is_rejected_before_any_request() {
    let addr = spawn_site().await;
    let result = source(addr).resolve_server("4242").await;
    assert!(matches!(result, Err(ScrapeError::InvalidServerId(_))));
}

#[tokio::test]
async fn test_missing_page_is_a_status_error() {
    let addr = spawn_site().await;
    let result = source(addr).details("nope").await;
    assert!(matches!(result, Err(ScrapeError::Status { .. })));
}

#[tokio::test]
async fn test_blank_suggestion_query_is_empty() {
    let addr = spawn_site().await;
    assert!(source(addr).suggestions("   ").await.is_empty());
}

#[tokio::test]
async fn test_body_stall_is_a_timeout() {
    let addr = spawn_site().await;
    let client = SourceClient::new(
        &format!("http://{}", addr),
        "test-agent",
        Duration::from_millis(300),
    );

    let result = client.get_html("/stalls/").await;

    // status already came back 200, only the body read times out
    assert!(matches!(result, Err(ScrapeError::Timeout(_))));
}
