pub mod chrome;
pub mod patterns;
pub mod payload;
pub mod popup;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AppConfig;
use chrome::ChromeLauncher;
use patterns::MediaKind;

pub type DynStreamExtractor = Arc<StreamExtractor>;

// first match wins, cloudflare turnstile style widgets first
const CHALLENGE_SELECTORS: &[&str] = &[
    "#challenge-stage input[type=checkbox]",
    ".ctp-checkbox-label input",
    "label.cb-lb input",
    ".cf-turnstile input[type=checkbox]",
    "input[type=checkbox][name*=captcha]",
];

const PLAY_SELECTORS: &[&str] = &[
    ".jw-icon-display",
    ".vjs-big-play-button",
    ".plyr__control--overlaid",
    "button[aria-label*=Play]",
    ".play-button",
    "#play",
    "video",
];

const POINTER_STEPS: u32 = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStream {
    #[serde(default)]
    pub language: String,
    pub link: String,
}

/// what the caller gets back from every extraction, the engine never returns anything else
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamDescriptor {
    Resolved(ResolvedStream),
    Failed(ExtractionFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ResolvedStream {
    Hls {
        file: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    Mp4 {
        file: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    MultiAudioList {
        streams: Vec<AudioStream>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// base64 png of the page as we left it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl StreamDescriptor {
    pub fn is_resolved(&self) -> bool {
        matches!(self, StreamDescriptor::Resolved(_))
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("unsupported host: {0}")]
    UnsupportedHost(String),
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("browser error: {0}")]
    Browser(String),
    #[error("no stream found")]
    NoStream,
    #[error("extraction panicked: {0}")]
    Panicked(String),
}

impl ExtractError {
    fn label(&self) -> &'static str {
        match self {
            ExtractError::InvalidUrl(_) => "invalid url",
            ExtractError::UnsupportedHost(_) => "unsupported host",
            ExtractError::Launch(_) => "browser launch failed",
            ExtractError::Navigation(_) => "navigation failed",
            ExtractError::Browser(_) => "browser error",
            ExtractError::NoStream => "no stream found",
            ExtractError::Panicked(_) => "extraction panicked",
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            ExtractError::InvalidUrl(d)
            | ExtractError::UnsupportedHost(d)
            | ExtractError::Launch(d)
            | ExtractError::Navigation(d)
            | ExtractError::Browser(d)
            | ExtractError::Panicked(d) => Some(d.clone()),
            ExtractError::NoStream => None,
        }
    }

    pub fn into_descriptor(self, screenshot: Option<String>) -> StreamDescriptor {
        StreamDescriptor::Failed(ExtractionFailure {
            error: self.label().to_string(),
            details: self.details(),
            screenshot,
        })
    }
}

/// css pixels in the top level viewport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// one isolated, throwaway browser. everything the interaction heuristics need and nothing more
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), ExtractError>;
    async fn viewport_center(&mut self) -> Result<Point, ExtractError>;
    async fn move_pointer(&mut self, to: Point) -> Result<(), ExtractError>;
    async fn click(&mut self, at: Point) -> Result<(), ExtractError>;
    /// centers of the first element matching any selector, one per frame that had a match
    async fn locate_in_frames(&mut self, selectors: &[&str]) -> Result<Vec<Point>, ExtractError>;
    async fn press_space(&mut self) -> Result<(), ExtractError>;
    /// resolves as soon as the interception caught a media url, or after `window`
    async fn wait_for_capture(&mut self, window: Duration) -> Option<String>;
    async fn html(&mut self) -> Result<String, ExtractError>;
    async fn screenshot(&mut self) -> Result<Vec<u8>, ExtractError>;
    /// consumes the session, so it can't be closed twice
    async fn close(self: Box<Self>) -> Result<(), ExtractError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, ExtractError>;

    fn is_available(&self) -> bool {
        true
    }
}

/// fixed delays for the interaction heuristics, there's no adaptive timeout in here
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub settle: Duration,
    pub challenge_grace: Duration,
    pub play_retry: Duration,
    pub pointer_step: Duration,
    pub interaction_window: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(1500),
            challenge_grace: Duration::from_secs(4),
            play_retry: Duration::from_millis(1500),
            pointer_step: Duration::from_millis(18),
            interaction_window: Duration::from_secs(12),
        }
    }
}

#[derive(Clone)]
pub struct StreamExtractor {
    launcher: Arc<dyn BrowserLauncher>,
    hostile_hosts: Vec<String>,
    user_agent: String,
    timings: Timings,
}

impl StreamExtractor {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        hostile_hosts: Vec<String>,
        user_agent: impl Into<String>,
        timings: Timings,
    ) -> Self {
        Self {
            launcher,
            hostile_hosts,
            user_agent: user_agent.into(),
            timings,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let timings = Timings {
            interaction_window: config.interaction_window(),
            ..Timings::default()
        };
        Self::new(
            Arc::new(ChromeLauncher::from_config(config)),
            config.hostile_host_list(),
            config.user_agent.clone(),
            timings,
        )
    }

    pub fn browser_available(&self) -> bool {
        self.launcher.is_available()
    }

    pub fn is_hostile(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        self.hostile_hosts
            .iter()
            .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
    }

    /// never fails, worst case is a `StreamDescriptor::Failed`
    pub async fn extract_stream(&self, server_url: &str) -> StreamDescriptor {
        let url = match Url::parse(server_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            _ => return ExtractError::InvalidUrl(server_url.to_string()).into_descriptor(None),
        };

        if let Some(streams) = payload::decode_fast_path(&url) {
            info!(
                "decoded {} audio streams from the url of {}",
                streams.len(),
                url.host_str().unwrap_or_default()
            );
            return StreamDescriptor::Resolved(ResolvedStream::MultiAudioList { streams });
        }

        if patterns::is_stream_url(url.as_str()) {
            return self.describe(url.as_str(), &url);
        }

        if !self.is_hostile(&url) {
            let host = url.host_str().unwrap_or_default().to_string();
            debug!("{} is not a known embed host, not launching a browser", host);
            return ExtractError::UnsupportedHost(host).into_descriptor(None);
        }

        self.slow_path(&url).await
    }

    /// the session lives in its own task, a caller that stops waiting (timeout, client gone)
    /// drops the join handle but the close still runs
    async fn slow_path(&self, url: &Url) -> StreamDescriptor {
        let this = self.clone();
        let owned = url.clone();
        match tokio::spawn(async move { this.run_session(&owned).await }).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("extraction task for {} died: {}", url, e);
                ExtractError::Panicked(e.to_string()).into_descriptor(None)
            }
        }
    }

    async fn run_session(&self, url: &Url) -> StreamDescriptor {
        let mut session = match self.launcher.launch().await {
            Ok(session) => session,
            Err(e) => {
                warn!("could not start a browser for {}: {}", url, e);
                return e.into_descriptor(None);
            }
        };

        let outcome = AssertUnwindSafe(self.drive(session.as_mut(), url))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ExtractError::Panicked(panic_message(panic.as_ref()))));

        let descriptor = match outcome {
            Ok(found) => {
                info!("captured stream for {}", url.host_str().unwrap_or_default());
                self.describe(&found, url)
            }
            Err(e) => {
                warn!("extraction failed for {}: {}", url, e);
                let screenshot = best_effort_screenshot(session.as_mut()).await;
                e.into_descriptor(screenshot)
            }
        };

        match AssertUnwindSafe(session.close()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("closing browser session failed: {}", e),
            Err(_) => warn!("closing browser session panicked"),
        }

        descriptor
    }

    async fn drive(&self, session: &mut dyn BrowserSession, url: &Url) -> Result<String, ExtractError> {
        session.navigate(url.as_str()).await?;
        sleep(self.timings.settle).await;

        // some players autoplay, nothing to poke then
        if let Some(found) = session.wait_for_capture(Duration::ZERO).await {
            return Ok(found);
        }

        // blind click, knocks down whatever overlay sits on top of the player
        let center = session.viewport_center().await?;
        if let Err(e) = session.click(center).await {
            debug!("overlay click failed: {}", e);
        }

        let challenge = session
            .locate_in_frames(CHALLENGE_SELECTORS)
            .await
            .unwrap_or_default();
        if let Some(target) = challenge.first().copied() {
            debug!("challenge checkbox at {:?}", target);
            self.human_move(session, center, target).await;
            if let Err(e) = session.click(target).await {
                debug!("challenge click failed: {}", e);
            }
            sleep(self.timings.challenge_grace).await;
        }

        let players = session
            .locate_in_frames(PLAY_SELECTORS)
            .await
            .unwrap_or_default();
        if let Some(play) = players.first().copied() {
            if let Err(e) = session.click(play).await {
                debug!("play click failed: {}", e);
            }
            sleep(self.timings.play_retry).await;
            // the first click usually just opened the ad layer
            if let Err(e) = session.click(play).await {
                debug!("second play click failed: {}", e);
            }
        }
        if let Err(e) = session.press_space().await {
            debug!("space key failed: {}", e);
        }

        if let Some(found) = session
            .wait_for_capture(self.timings.interaction_window)
            .await
        {
            return Ok(found);
        }

        debug!("nothing captured on the wire, scanning the rendered page");
        let html = session.html().await?;
        patterns::find_manifest_in_html(&html).ok_or(ExtractError::NoStream)
    }

    // eased path with a bit of jitter, straight jumps are what get flagged
    async fn human_move(&self, session: &mut dyn BrowserSession, from: Point, to: Point) {
        for step in 1..=POINTER_STEPS {
            let t = step as f64 / POINTER_STEPS as f64;
            let eased = if t < 0.5 {
                2.0 * t * t
            } else {
                1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
            };
            let (jitter_x, jitter_y, pace) = {
                let mut rng = rand::rng();
                (
                    rng.random_range(-1.5..1.5),
                    rng.random_range(-1.5..1.5),
                    rng.random_range(0.5..1.5),
                )
            };
            let last = step == POINTER_STEPS;
            let point = Point {
                x: from.x + (to.x - from.x) * eased + if last { 0.0 } else { jitter_x },
                y: from.y + (to.y - from.y) * eased + if last { 0.0 } else { jitter_y },
            };
            if let Err(e) = session.move_pointer(point).await {
                debug!("pointer move failed: {}", e);
                return;
            }
            sleep(self.timings.pointer_step.mul_f64(pace)).await;
        }
    }

    fn describe(&self, file: &str, embed: &Url) -> StreamDescriptor {
        let origin = embed.origin().ascii_serialization();
        let mut headers = BTreeMap::new();
        headers.insert("Referer".to_string(), format!("{}/", origin));
        headers.insert("Origin".to_string(), origin);
        headers.insert("User-Agent".to_string(), self.user_agent.clone());

        let file = file.to_string();
        StreamDescriptor::Resolved(match patterns::media_kind(&file) {
            MediaKind::Hls => ResolvedStream::Hls { file, headers },
            MediaKind::Mp4 => ResolvedStream::Mp4 { file, headers },
        })
    }
}

async fn best_effort_screenshot(session: &mut dyn BrowserSession) -> Option<String> {
    match AssertUnwindSafe(session.screenshot()).catch_unwind().await {
        Ok(Ok(png)) if !png.is_empty() => Some(STANDARD.encode(png)),
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            debug!("screenshot failed: {}", e);
            None
        }
        Err(_) => {
            debug!("screenshot panicked");
            None
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
