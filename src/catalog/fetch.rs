use std::time::Duration;

use reqwest::header;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

/// transport failures are errors, a page that parses into nothing is not (that's an empty list)
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("request to {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("{0} timed out")]
    Timeout(String),
    #[error("malformed server id: {0}")]
    InvalidServerId(String),
}

pub type ScrapeResult<T> = Result<T, ScrapeError>;

/// thin reqwest wrapper every source shares, one per source so each keeps its own base url
#[derive(Clone)]
pub struct SourceClient {
    http: reqwest::Client,
    base_url: String,
}

impl SourceClient {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// turns `/foo`, `foo` or `//cdn/foo` into something fetchable, full urls are left alone
    pub fn absolute(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else if let Some(rest) = path_or_url.strip_prefix("//") {
            format!("https://{}", rest)
        } else if path_or_url.starts_with('/') {
            format!("{}{}", self.base_url, path_or_url)
        } else {
            format!("{}/{}", self.base_url, path_or_url)
        }
    }

    pub async fn get_html(&self, path_or_url: &str) -> ScrapeResult<String> {
        let url = self.absolute(path_or_url);
        debug!("GET {}", url);

        let request = self
            .http
            .get(&url)
            .header(header::ACCEPT, "text/html,application/xhtml+xml,*/*;q=0.8")
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(header::REFERER, format!("{}/", self.base_url));

        Self::read_text(request, url).await
    }

    /// the fragment endpoints want to see an xhr and answer with json wrapped html
    pub async fn get_json<T: DeserializeOwned>(&self, path_or_url: &str) -> ScrapeResult<T> {
        let url = self.absolute(path_or_url);
        debug!("GET (xhr) {}", url);

        let request = self
            .http
            .get(&url)
            .header(header::ACCEPT, "application/json, text/javascript, */*; q=0.01")
            .header("X-Requested-With", "XMLHttpRequest")
            .header(header::REFERER, format!("{}/", self.base_url));

        let body = Self::read_text(request, url.clone()).await?;
        serde_json::from_str(&body).map_err(|e| {
            error!("failed to decode json from {}: {}", url, e);
            ScrapeError::Decode {
                url,
                reason: e.to_string(),
            }
        })
    }

    /// urlencoded POST, mostly wordpress admin-ajax
    pub async fn post_form(&self, path_or_url: &str, form: &[(&str, &str)]) -> ScrapeResult<String> {
        let url = self.absolute(path_or_url);
        debug!("POST {} ({} fields)", url, form.len());

        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form.iter())
            .finish();

        let request = self
            .http
            .post(&url)
            .header(
                header::CONTENT_TYPE,
                "application/x-www-form-urlencoded; charset=UTF-8",
            )
            .header("X-Requested-With", "XMLHttpRequest")
            .header(header::ORIGIN, self.base_url.clone())
            .header(header::REFERER, format!("{}/", self.base_url))
            .body(body);

        Self::read_text(request, url).await
    }

    async fn read_text(request: reqwest::RequestBuilder, url: String) -> ScrapeResult<String> {
        let response = request.send().await.map_err(|e| {
            error!("request to {} failed: {}", url, e);
            if e.is_timeout() {
                ScrapeError::Timeout(url.clone())
            } else {
                ScrapeError::Fetch {
                    url: url.clone(),
                    source: e,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            error!("{} answered with {}", url, status);
            return Err(ScrapeError::Status { url, status });
        }

        // the client timeout covers the whole exchange, a stall mid-body lands here
        response.text().await.map_err(|e| {
            error!("failed to read body of {}: {}", url, e);
            if e.is_timeout() {
                ScrapeError::Timeout(url)
            } else {
                ScrapeError::Fetch { url, source: e }
            }
        })
    }
}
