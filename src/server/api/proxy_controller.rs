// the delivery proxy. segments are streamed straight through, only manifests get buffered since
// they need rewriting and are tiny anyway
use std::collections::BTreeMap;
use std::io::{Read, Write};

use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    middleware::map_response,
    response::{IntoResponse, Response},
    routing::get,
};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use futures::StreamExt;
use tracing::{debug, error, warn};
use url::Url;

use crate::server::{
    error::{AppResult, Error},
    extractors::ProxyTarget,
    utils::playlist_utils::rewrite_playlist,
};

// a manifest bigger than this is not a manifest
const MAX_MANIFEST_BYTES: usize = 8 * 1024 * 1024;

const EXPOSED_HEADERS: &str = "Content-Length, Content-Type, Content-Range, Accept-Ranges";

/// cdn host suffix -> (referer, origin) the cdn expects to see
const HOST_PROFILES: &[(&str, &str, &str)] = &[
    ("megacloud.tv", "https://megacloud.tv/", "https://megacloud.tv"),
    ("megacloud.blog", "https://megacloud.blog/", "https://megacloud.blog"),
    ("netmagcdn.com", "https://megacloud.tv/", "https://megacloud.tv"),
    ("vidsrc.to", "https://vidsrc.to/", "https://vidsrc.to"),
    ("vidsrc.me", "https://vidsrc.me/", "https://vidsrc.me"),
    ("embedsu.com", "https://embed.su/", "https://embed.su"),
    ("streamwish.to", "https://streamwish.to/", "https://streamwish.to"),
    ("filemoon.sx", "https://filemoon.sx/", "https://filemoon.sx"),
];

/// Supported compression encodings
#[derive(Debug, Clone, Copy, PartialEq)]
enum ContentEncoding {
    Zstd,
    Gzip,
    None,
}

impl ContentEncoding {
    /// the client's Accept-Encoding, identity only has to be respected (apple's player sends it)
    fn from_accept_encoding(accept_encoding: Option<&str>) -> Self {
        match accept_encoding {
            Some(v) => {
                if v == "identity" || v.starts_with("identity,") {
                    return Self::None;
                }
                if v.contains("zstd") {
                    Self::Zstd
                } else if v.contains("gzip") {
                    Self::Gzip
                } else {
                    Self::None
                }
            }
            None => Self::None,
        }
    }

    fn from_content_encoding(content_encoding: Option<&str>) -> Option<Self> {
        match content_encoding.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("identity") => Some(Self::None),
            Some("gzip") | Some("x-gzip") => Some(Self::Gzip),
            Some("zstd") => Some(Self::Zstd),
            _ => None,
        }
    }

    fn as_header_value(&self) -> Option<&'static str> {
        match self {
            Self::Zstd => Some("zstd"),
            Self::Gzip => Some("gzip"),
            Self::None => None,
        }
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        match self {
            Self::Zstd => zstd::encode_all(data, 3),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Self::None => Ok(data.to_vec()),
        }
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        match self {
            Self::Zstd => zstd::decode_all(data),
            Self::Gzip => {
                let mut decoder = GzDecoder::new(data);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
            Self::None => Ok(data.to_vec()),
        }
    }
}

/// what we let upstream compress with: only encodings the client takes AND we can undo, so a
/// streamed body can be relayed as is and a manifest can still be rewritten
fn upstream_accept_encoding(client: Option<&str>) -> &'static str {
    let client = client.unwrap_or("").to_ascii_lowercase();
    match (client.contains("gzip"), client.contains("zstd")) {
        _ if client.trim() == "identity" => "identity",
        (true, true) => "zstd, gzip",
        (true, false) => "gzip",
        (false, true) => "zstd",
        (false, false) => "identity",
    }
}

/// the referer/origin pair a resource's host wants. known cdns get their embed site, anything
/// else gets its own origin
pub fn host_profile(url: &Url) -> (String, String) {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    for (suffix, referer, origin) in HOST_PROFILES {
        if host == *suffix || host.ends_with(&format!(".{}", suffix)) {
            return (referer.to_string(), origin.to_string());
        }
    }
    let origin = url.origin().ascii_serialization();
    (format!("{}/", origin), origin)
}

pub fn upstream_headers(
    url: &Url,
    user_agent: &str,
    custom: &BTreeMap<String, String>,
    client_headers: &HeaderMap,
) -> HeaderMap {
    let (referer, origin) = host_profile(url);
    let mut defaults: Vec<(HeaderName, String)> = vec![
        (header::USER_AGENT, user_agent.to_string()),
        (header::ACCEPT, "*/*".to_string()),
        (header::ACCEPT_LANGUAGE, "en-US,en;q=0.9".to_string()),
        (header::REFERER, referer),
        (header::ORIGIN, origin),
        (
            header::ACCEPT_ENCODING,
            upstream_accept_encoding(
                client_headers
                    .get(header::ACCEPT_ENCODING)
                    .and_then(|v| v.to_str().ok()),
            )
            .to_string(),
        ),
    ];
    // seeking in mp4 and partial segment fetches
    if let Some(range) = client_headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        defaults.push((header::RANGE, range.to_string()));
    }

    let mut headers = HeaderMap::new();
    for (name, value) in defaults {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }

    // caller supplied headers win over everything above
    for (name, value) in custom {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!("skipping unusable custom header {:?}", name),
        }
    }
    headers
}

pub struct ProxyController;

impl ProxyController {
    pub fn app(proxy_path: &str) -> Router {
        // on every response including errors and rejections, players read the 4xx/5xx bodies
        Router::new()
            .route(
                proxy_path,
                get(Self::proxy_get).options(Self::proxy_options),
            )
            .layer(map_response(Self::with_cors))
    }

    async fn with_cors(mut response: Response) -> Response {
        Self::cors_headers(response.headers_mut());
        response
    }

    fn cors_headers(headers: &mut HeaderMap) {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(EXPOSED_HEADERS),
        );
    }

    fn is_manifest(content_type: &str, url: &Url, first_chunk: Option<&[u8]>) -> bool {
        content_type.to_ascii_lowercase().contains("mpegurl")
            || url.path().to_ascii_lowercase().ends_with(".m3u8")
            || first_chunk.is_some_and(|chunk| chunk.starts_with(b"#EXTM3U"))
    }

    async fn proxy_get(target: ProxyTarget, headers: HeaderMap) -> AppResult<Response> {
        let ProxyTarget {
            url,
            headers: custom,
            services,
        } = target;
        debug!("proxying {}", url);

        let request_headers =
            upstream_headers(&url, &services.config.user_agent, &custom, &headers);

        // no retries here, the player has other servers to fall back on
        let upstream = services
            .http
            .get(url.as_str())
            .headers(request_headers)
            .send()
            .await
            .map_err(|e| {
                error!("upstream {} unreachable: {}", url, e);
                metrics::counter!("proxy_upstream_failures_total").increment(1);
                Error::InternalServerErrorWithContext(format!("Upstream request failed: {}", e))
            })?;

        let status = upstream.status();
        let final_url = upstream.url().clone();
        let upstream_headers = upstream.headers().clone();
        let content_type = upstream_headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        debug!("upstream answered {} ({})", status, content_type);

        let mut body = Box::pin(upstream.bytes_stream());

        if !status.is_success() {
            // relayed as is, the caller decides what a 403 from the cdn means
            warn!("upstream {} answered {}, relaying", final_url, status);
            return Self::relay(status, &upstream_headers, Body::from_stream(body));
        }

        let encoding = ContentEncoding::from_content_encoding(
            upstream_headers
                .get(header::CONTENT_ENCODING)
                .and_then(|v| v.to_str().ok()),
        );

        // sniffing only works on plain bytes, compressed bodies have to be known by type or path
        let mut first: Option<Bytes> = None;
        let mut manifest = Self::is_manifest(&content_type, &final_url, None);
        if !manifest && encoding == Some(ContentEncoding::None) {
            first = match body.next().await {
                Some(Ok(chunk)) => Some(chunk),
                Some(Err(e)) => {
                    error!("reading upstream body failed: {}", e);
                    return Err(Error::InternalServerErrorWithContext(format!(
                        "Failed to read upstream response: {}",
                        e
                    )));
                }
                None => None,
            };
            manifest = Self::is_manifest(&content_type, &final_url, first.as_deref());
        }

        match (manifest, encoding) {
            (true, Some(encoding)) => {
                let mut raw = first.map(|b| b.to_vec()).unwrap_or_default();
                while let Some(chunk) = body.next().await {
                    let chunk = chunk.map_err(|e| {
                        error!("reading manifest failed: {}", e);
                        Error::InternalServerErrorWithContext(format!(
                            "Failed to read upstream response: {}",
                            e
                        ))
                    })?;
                    if raw.len() + chunk.len() > MAX_MANIFEST_BYTES {
                        return Err(Error::BadGateway("Manifest too large".to_string()));
                    }
                    raw.extend_from_slice(&chunk);
                }

                let decompressed = encoding.decompress(&raw).map_err(|e| {
                    error!("failed to decompress {:?} manifest: {}", encoding, e);
                    Error::BadGateway("Failed to decompress manifest".to_string())
                })?;
                let text = String::from_utf8(decompressed).map_err(|e| {
                    error!("manifest is not utf-8: {}", e);
                    Error::BadGateway("Invalid manifest encoding".to_string())
                })?;

                // relative references are relative to where the redirects ended up
                let rewritten =
                    rewrite_playlist(&text, &final_url, &services.config.proxy_path);
                debug!(
                    "rewrote manifest {} ({} -> {} bytes)",
                    final_url,
                    text.len(),
                    rewritten.len()
                );
                Self::build_m3u8_response(status, &rewritten, &headers)
            }
            (true, None) => {
                warn!("manifest from {} uses an encoding we can't undo", final_url);
                Err(Error::BadGateway(
                    "Unsupported manifest content encoding".to_string(),
                ))
            }
            (false, _) => {
                let head = futures::stream::iter(first.into_iter().map(Ok::<Bytes, reqwest::Error>));
                Self::relay(status, &upstream_headers, Body::from_stream(head.chain(body)))
            }
        }
    }

    fn relay(status: StatusCode, upstream: &HeaderMap, body: Body) -> AppResult<Response> {
        let mut response_headers = HeaderMap::new();
        for name in [
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::CONTENT_RANGE,
            header::ACCEPT_RANGES,
            header::CONTENT_ENCODING,
        ] {
            if let Some(value) = upstream.get(&name) {
                response_headers.insert(name, value.clone());
            }
        }

        let mut response = Response::builder().status(status);
        if let Some(headers) = response.headers_mut() {
            headers.extend(response_headers);
        }
        response.body(body).map_err(|e| {
            error!("failed to build relayed response: {}", e);
            Error::InternalServerError
        })
    }

    /// build m3u8 response with proper headers and optional compression
    fn build_m3u8_response(
        status: StatusCode,
        processed_body: &str,
        headers: &HeaderMap,
    ) -> AppResult<Response> {
        let encoding = ContentEncoding::from_accept_encoding(
            headers
                .get(header::ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok()),
        );

        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/vnd.apple.mpegurl"),
        );
        response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let response_body = encoding.compress(processed_body.as_bytes()).map_err(|e| {
            error!("Failed to compress response with {:?}: {}", encoding, e);
            Error::InternalServerErrorWithContext("Failed to compress response".to_string())
        })?;
        if let Some(enc_header) = encoding.as_header_value() {
            debug!(
                "compressed manifest with {:?} from {} to {} bytes",
                encoding,
                processed_body.len(),
                response_body.len()
            );
            response_headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(enc_header));
        }
        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(response_body.len()));

        Ok((status, response_headers, response_body).into_response())
    }

    async fn proxy_options() -> StatusCode {
        StatusCode::NO_CONTENT
    }
}
