// small selector helpers shared by the source parsers
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Selector};

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("static regex"));

/// only ever called with literals, a typo here is a bug that every test catches
pub fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// trimmed, whitespace-collapsed text of the first match, `None` when missing or empty
pub fn text_of(element: ElementRef<'_>, css: &str) -> Option<String> {
    element.select(&selector(css)).next().and_then(own_text)
}

pub fn own_text(element: ElementRef<'_>) -> Option<String> {
    let text = element
        .text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() { None } else { Some(text) }
}

pub fn attr_of(element: ElementRef<'_>, css: &str, attr: &str) -> Option<String> {
    element
        .select(&selector(css))
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// lazy loaders put the real image in data-src and a gif in src
pub fn image_of(element: ElementRef<'_>) -> Option<String> {
    let img = if element.value().name() == "img" {
        Some(element)
    } else {
        element.select(&selector("img")).next()
    }?;

    ["data-src", "data-lazy-src", "data-original", "src"]
        .iter()
        .filter_map(|attr| img.value().attr(attr))
        .map(str::trim)
        .find(|src| !src.is_empty() && !src.starts_with("data:"))
        .map(str::to_string)
}

/// "https://x/anime/one-piece-100/" -> "one-piece-100"
pub fn slug_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_string()
}

pub fn first_number(text: &str) -> Option<u32> {
    NUMBER.find(text).and_then(|m| m.as_str().parse().ok())
}

pub fn last_number(text: &str) -> Option<u32> {
    NUMBER
        .find_iter(text)
        .last()
        .and_then(|m| m.as_str().parse().ok())
}

/// drift signal for selector families, a family that keeps hitting zero means the source changed
/// its markup, not that the catalog is empty
pub fn record_family(source: &'static str, family: &'static str, found: usize) {
    if found == 0 {
        metrics::counter!("catalog_selector_empty_total", "source" => source, "family" => family)
            .increment(1);
    } else {
        metrics::counter!("catalog_selector_hits_total", "source" => source, "family" => family)
            .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn slug_ignores_trailing_slash_and_query() {
        assert_eq!(slug_from_url("https://x/anime/one-piece-100/"), "one-piece-100");
        assert_eq!(slug_from_url("/watch/one-piece-100?ep=2142"), "one-piece-100");
        assert_eq!(slug_from_url(""), "");
    }

    #[test]
    fn numbers_are_pulled_out_of_labels() {
        assert_eq!(first_number("Season 3"), Some(3));
        assert_eq!(last_number("Page 1 of 12"), Some(12));
        assert_eq!(first_number("Specials"), None);
    }

    #[test]
    fn image_prefers_lazy_attribute() {
        let doc = Html::parse_fragment(
            r#"<div><img src="data:image/gif;base64,R0lG" data-src="https://cdn/p.jpg"></div>"#,
        );
        let root = doc.root_element();
        assert_eq!(image_of(root).as_deref(), Some("https://cdn/p.jpg"));
    }

    #[test]
    fn text_is_collapsed() {
        let doc = Html::parse_fragment("<div><h2>  One \n  Piece </h2><p> </p></div>");
        let root = doc.root_element();
        assert_eq!(text_of(root, "h2").as_deref(), Some("One Piece"));
        assert_eq!(text_of(root, "p"), None);
    }
}
