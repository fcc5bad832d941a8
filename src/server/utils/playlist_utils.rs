use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use url::Url;

static KEY_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"URI="([^"]*)""#).expect("static regex"));

const KEY_DIRECTIVE: &str = "#EXT-X-KEY";

/// points every segment, sub playlist and key of an hls manifest back at the proxy.
///
/// line order and line count are kept as is, hls is positional. a line that can't be resolved
/// against `base_url` is left alone instead of dropped, a broken reference is better than
/// shifting every segment after it
pub fn rewrite_playlist(text: &str, base_url: &Url, proxy_path: &str) -> String {
    text.split('\n')
        .map(|line| rewrite_line(line, base_url, proxy_path))
        .collect::<Vec<_>>()
        .join("\n")
}

fn rewrite_line(line: &str, base_url: &Url, proxy_path: &str) -> String {
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return line.to_string();
    }
    if trimmed.starts_with(KEY_DIRECTIVE) {
        return rewrite_key_line(line, base_url, proxy_path);
    }
    if trimmed.starts_with('#') || targets_proxy(trimmed, proxy_path) {
        return line.to_string();
    }

    match base_url.join(trimmed) {
        Ok(resolved) => proxied(resolved.as_str(), proxy_path),
        Err(e) => {
            debug!("leaving unresolvable line {:?} alone: {}", trimmed, e);
            line.to_string()
        }
    }
}

// players won't fetch a key cross origin, so the key goes through the proxy as well
fn rewrite_key_line(line: &str, base_url: &Url, proxy_path: &str) -> String {
    let Some(captures) = KEY_URI.captures(line) else {
        return line.to_string();
    };
    let (Some(whole), Some(uri)) = (captures.get(0), captures.get(1)) else {
        return line.to_string();
    };
    if uri.as_str().is_empty() || targets_proxy(uri.as_str(), proxy_path) {
        return line.to_string();
    }

    match base_url.join(uri.as_str()) {
        Ok(resolved) => format!(
            "{}URI=\"{}\"{}",
            &line[..whole.start()],
            proxied(resolved.as_str(), proxy_path),
            &line[whole.end()..]
        ),
        Err(e) => {
            debug!("leaving unresolvable key uri {:?} alone: {}", uri.as_str(), e);
            line.to_string()
        }
    }
}

pub fn proxied(resolved: &str, proxy_path: &str) -> String {
    format!("{}?url={}", proxy_path, urlencoding::encode(resolved))
}

/// true for references that already go through the proxy, relative or absolute
pub fn targets_proxy(reference: &str, proxy_path: &str) -> bool {
    if reference.starts_with(&format!("{}?url=", proxy_path)) {
        return true;
    }
    match Url::parse(reference) {
        Ok(url) => url.path() == proxy_path && url.query_pairs().any(|(k, _)| k == "url"),
        Err(_) => false,
    }
}
