use once_cell::sync::Lazy;
use regex::Regex;

static MANIFEST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.m3u8(?:$|[?#])").expect("static regex"));
static MEDIA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(?:mp4|webm|mkv|mov)(?:$|[?#])").expect("static regex"));
// json-escaped paths (`https:\/\/cdn\/x.m3u8`) are what usually sits in the rendered page
static MANIFEST_IN_HTML: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?:(?:\\?/){2}[^\s"'<>]+?\.m3u8[^\s"'<>\\]*"#).expect("static regex")
});

/// ad networks love serving mp4 prerolls, none of those are the stream
const EXCLUDED: &[&str] = &[
    "/ads/",
    "/ad/",
    "preroll",
    "/vast",
    "doubleclick",
    "googlesyndication",
    "adserver",
    "blank.mp4",
    "intro.mp4",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestVerdict {
    /// image/font/stylesheet, dropped to save bandwidth
    Block,
    /// the url is what we came for, grab it and drop the request
    Capture,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Hls,
    Mp4,
}

fn is_excluded(lower: &str) -> bool {
    EXCLUDED.iter().any(|needle| lower.contains(needle))
}

pub fn is_manifest_url(url: &str) -> bool {
    MANIFEST.is_match(url)
}

pub fn is_stream_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    if is_excluded(&lower) {
        return false;
    }
    MANIFEST.is_match(&lower) || MEDIA.is_match(&lower)
}

pub fn classify_request(url: &str, heavy_asset: bool) -> RequestVerdict {
    if is_stream_url(url) {
        RequestVerdict::Capture
    } else if heavy_asset {
        RequestVerdict::Block
    } else {
        RequestVerdict::Continue
    }
}

pub fn media_kind(url: &str) -> MediaKind {
    if MANIFEST.is_match(url) {
        MediaKind::Hls
    } else {
        MediaKind::Mp4
    }
}

/// last resort once the network capture came up empty
pub fn find_manifest_in_html(html: &str) -> Option<String> {
    MANIFEST_IN_HTML
        .find_iter(html)
        .map(|m| m.as_str().replace("\\/", "/"))
        .find(|candidate| !is_excluded(&candidate.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifests_and_media_are_captured() {
        assert_eq!(
            classify_request("https://cdn.x/hls/master.m3u8?token=1", false),
            RequestVerdict::Capture
        );
        assert_eq!(
            classify_request("https://cdn.x/v/movie.MP4", false),
            RequestVerdict::Capture
        );
    }

    #[test]
    fn ad_media_is_not_captured() {
        assert_eq!(
            classify_request("https://adserver.x/preroll/15s.mp4", false),
            RequestVerdict::Continue
        );
    }

    #[test]
    fn heavy_assets_are_blocked() {
        assert_eq!(
            classify_request("https://cdn.x/poster.jpg", true),
            RequestVerdict::Block
        );
        assert_eq!(
            classify_request("https://cdn.x/player.js", false),
            RequestVerdict::Continue
        );
    }

    #[test]
    fn segments_are_not_streams() {
        assert!(!is_stream_url("https://cdn.x/hls/seg-001.ts"));
    }

    #[test]
    fn escaped_manifest_is_found_in_html() {
        let html = r#"<script>var cfg = {"file":"https:\/\/cdn.x\/hls\/master.m3u8?t=9","image":"x.jpg"};</script>"#;
        assert_eq!(
            find_manifest_in_html(html).as_deref(),
            Some("https://cdn.x/hls/master.m3u8?t=9")
        );
    }

    #[test]
    fn kind_follows_extension() {
        assert_eq!(media_kind("https://x/a.m3u8"), MediaKind::Hls);
        assert_eq!(media_kind("https://x/a.mp4?x=1"), MediaKind::Mp4);
    }
}
