use std::collections::BTreeMap;

use axum::Extension;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use tracing::{debug, error};
use url::Url;

use crate::server::error::Error;
use crate::server::services::AppServices;

#[derive(Deserialize)]
struct ProxyQuery {
    url: Option<String>,
    // percent encoded json object, merged over the host's default headers
    headers: Option<String>,
}

/// the resource the proxy was asked for plus the caller's header overrides
pub struct ProxyTarget {
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub services: AppServices,
}

impl<S> FromRequestParts<S> for ProxyTarget
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(services): Extension<AppServices> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|err| Error::InternalServerErrorWithContext(err.to_string()))?;

        let Query(query): Query<ProxyQuery> = Query::from_request_parts(parts, state)
            .await
            .map_err(|e| Error::BadRequest(e.body_text()))?;

        let raw = query
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::BadRequest("Missing url parameter".to_string()))?;
        let url = decode_target(raw.trim())?;

        let headers = match query.headers.as_deref().map(str::trim) {
            None | Some("") => BTreeMap::new(),
            Some(json) => serde_json::from_str::<BTreeMap<String, String>>(json).map_err(|e| {
                debug!("rejecting headers {:?}: {}", json, e);
                Error::BadRequest("headers must be a json object of strings".to_string())
            })?,
        };

        Ok(ProxyTarget {
            url,
            headers,
            services,
        })
    }
}

/// plain urls come in already percent decoded by the query extractor, anything else is tried as
/// url safe base64 which is what older clients send
pub fn decode_target(raw: &str) -> Result<Url, Error> {
    let candidate = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        URL_SAFE_NO_PAD
            .decode(raw.trim_end_matches('='))
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| {
                error!("url parameter is neither a url nor base64: {}", raw);
                Error::BadRequest("Invalid url parameter".to_string())
            })?
    };

    let url = Url::parse(&candidate)
        .map_err(|_| Error::BadRequest("Invalid url parameter".to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::BadRequest("Invalid url parameter".to_string()));
    }
    Ok(url)
}
