use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::GetBoxModelParams;
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, ResourceType};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, CreateIsolatedWorldParams,
    FrameTree, GetFrameTreeParams,
};
use chromiumoxide::cdp::browser_protocol::target::{CloseTargetParams, EventTargetCreated, TargetId};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::detection::{DetectionOptions, default_executable};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::patterns::{RequestVerdict, classify_request};
use super::popup::{POPUP_GRACE, PopupKiller, TargetCloser};
use super::{BrowserLauncher, BrowserSession, ExtractError, Point};
use crate::config::AppConfig;

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(20);
const CDP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const ISOLATED_WORLD: &str = "__reelgate";

// runs before any page script, covers the cheap checks embed hosts do
const STEALTH_JS: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
window.chrome = window.chrome || { runtime: {} };
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
  window.navigator.permissions.query = (p) =>
    p && p.name === 'notifications'
      ? Promise.resolve({ state: Notification.permission })
      : originalQuery(p);
}
"#;

fn browser_err(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Browser(e.to_string())
}

fn locate_script(selectors: &[&str]) -> String {
    let list = serde_json::to_string(selectors).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(() => {{
  for (const s of {list}) {{
    const el = document.querySelector(s);
    if (!el) continue;
    const r = el.getBoundingClientRect();
    if (r.width > 0 && r.height > 0) return el;
  }}
  return null;
}})()"#
    )
}

pub struct ChromeLauncher {
    executable: Option<PathBuf>,
    headless: bool,
    user_agent: String,
}

impl ChromeLauncher {
    pub fn from_config(config: &AppConfig) -> Self {
        let executable = config
            .chrome_executable
            .clone()
            .or_else(find_chrome);
        match &executable {
            Some(path) => info!("using chrome at {}", path.display()),
            None => warn!("no chrome install found, the slow extraction path will fail"),
        }

        Self {
            executable,
            headless: config.headless,
            user_agent: config.user_agent.clone(),
        }
    }

    fn browser_config(&self, profile_dir: &Path) -> Result<BrowserConfig, ExtractError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1280, 720)
            .request_timeout(CDP_REQUEST_TIMEOUT)
            .user_data_dir(profile_dir)
            // the hostile page checks for a blocked popup and refuses to play if it sees one
            .arg("--disable-popup-blocking")
            .arg("--disable-blink-features=AutomationControlled")
            // keeps iframes in the page's process so interception and frame queries reach them
            .arg("--disable-features=IsolateOrigins,site-per-process")
            .arg("--mute-audio")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg(format!("--user-agent={}", self.user_agent));

        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        if !self.headless {
            builder = builder.with_head();
        }

        builder.build().map_err(ExtractError::Launch)
    }
}

// same lookup the browser config builder falls back to, done up front so health can report it
fn find_chrome() -> Option<PathBuf> {
    match default_executable(DetectionOptions::default()) {
        Ok(path) => Some(path),
        Err(e) => {
            debug!("chrome detection failed: {}", e);
            None
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, ExtractError> {
        // fresh profile every time, sessions never share cookies or cache
        let profile_dir = std::env::temp_dir().join(format!(
            "reelgate-profile-{}",
            rand::random::<u64>()
        ));
        tokio::fs::create_dir_all(&profile_dir)
            .await
            .map_err(|e| ExtractError::Launch(e.to_string()))?;

        let config = match self.browser_config(&profile_dir) {
            Ok(config) => config,
            Err(e) => {
                remove_profile(&profile_dir).await;
                return Err(e);
            }
        };

        let (mut browser, mut handler) = match Browser::launch(config).await {
            Ok(launched) => launched,
            Err(e) => {
                remove_profile(&profile_dir).await;
                return Err(ExtractError::Launch(e.to_string()));
            }
        };
        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        match prepare(&browser, &self.user_agent).await {
            Ok(prepared) => Ok(Box::new(ChromeSession {
                browser,
                page: prepared.page,
                handler: handler_task,
                tasks: prepared.tasks,
                capture: prepared.capture,
                killer: prepared.killer,
                profile_dir,
            })),
            Err(e) => {
                warn!("browser setup failed, tearing it down: {}", e);
                if let Err(close_err) = browser.close().await {
                    debug!("closing half set up browser failed: {}", close_err);
                }
                let _ = browser.wait().await;
                handler_task.abort();
                remove_profile(&profile_dir).await;
                Err(e)
            }
        }
    }

    fn is_available(&self) -> bool {
        self.executable.as_ref().is_some_and(|p| p.exists())
    }
}

struct Prepared {
    page: Page,
    tasks: Vec<JoinHandle<()>>,
    capture: watch::Receiver<Option<String>>,
    killer: PopupKiller,
}

async fn prepare(browser: &Browser, user_agent: &str) -> Result<Prepared, ExtractError> {
    let page = browser.new_page("about:blank").await.map_err(browser_err)?;

    page.execute(SetUserAgentOverrideParams::new(user_agent))
        .await
        .map_err(browser_err)?;
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_JS))
        .await
        .map_err(browser_err)?;

    let mut tasks = Vec::new();
    let (capture_tx, capture) = watch::channel(None);

    // every request stops here first. heavy assets die, media urls are kept and die too
    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(browser_err)?;
    let intercept_page = page.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let heavy = matches!(
                event.resource_type,
                ResourceType::Image | ResourceType::Font | ResourceType::Stylesheet
            );
            let verdict = classify_request(&event.request.url, heavy);
            if verdict == RequestVerdict::Capture {
                let url = event.request.url.clone();
                capture_tx.send_if_modified(|slot| {
                    if slot.is_none() {
                        debug!("captured {}", url);
                        *slot = Some(url);
                        true
                    } else {
                        false
                    }
                });
            }

            let sent = if verdict == RequestVerdict::Continue {
                intercept_page
                    .execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(|_| ())
            } else {
                intercept_page
                    .execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(|_| ())
            };
            if let Err(e) = sent {
                debug!("releasing paused request failed: {}", e);
            }
        }
    }));
    page.execute(fetch::EnableParams {
        patterns: None,
        handle_auth_requests: None,
    })
    .await
    .map_err(browser_err)?;

    let killer = PopupKiller::spawn(
        page.target_id().inner().clone(),
        Arc::new(PageTargetCloser { page: page.clone() }),
        POPUP_GRACE,
    );
    let notifier = killer.notifier();
    let mut created = match browser.event_listener::<EventTargetCreated>().await {
        Ok(created) => created,
        Err(e) => {
            for task in &tasks {
                task.abort();
            }
            killer.shutdown().await;
            return Err(browser_err(e));
        }
    };
    tasks.push(tokio::spawn(async move {
        while let Some(event) = created.next().await {
            if event.target_info.r#type == "page" {
                notifier.target_created(event.target_info.target_id.inner().clone());
            }
        }
    }));

    Ok(Prepared {
        page,
        tasks,
        capture,
        killer,
    })
}

struct PageTargetCloser {
    page: Page,
}

#[async_trait]
impl TargetCloser for PageTargetCloser {
    async fn close_target(&self, target_id: &str) -> anyhow::Result<()> {
        self.page
            .execute(CloseTargetParams::new(TargetId::new(target_id)))
            .await?;
        Ok(())
    }
}

async fn remove_profile(profile_dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(profile_dir).await {
        debug!("could not remove profile {}: {}", profile_dir.display(), e);
    }
}

pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
    capture: watch::Receiver<Option<String>>,
    killer: PopupKiller,
    profile_dir: PathBuf,
}

impl ChromeSession {
    async fn mouse(&self, kind: DispatchMouseEventType, at: Point) -> Result<(), ExtractError> {
        let mut params = DispatchMouseEventParams::new(kind.clone(), at.x, at.y);
        if kind != DispatchMouseEventType::MouseMoved {
            params.button = Some(MouseButton::Left);
            params.click_count = Some(1);
        }
        self.page.execute(params).await.map_err(browser_err)?;
        Ok(())
    }

    fn frames(tree: FrameTree, out: &mut Vec<FrameTree>) {
        let children = tree.child_frames.clone().unwrap_or_default();
        out.push(tree);
        for child in children {
            Self::frames(child, out);
        }
    }

    async fn locate_in_frame(&self, frame: &FrameTree, script: &str) -> Result<Option<Point>, ExtractError> {
        let mut world = CreateIsolatedWorldParams::new(frame.frame.id.clone());
        world.world_name = Some(ISOLATED_WORLD.to_string());
        let context = self
            .page
            .execute(world)
            .await
            .map_err(browser_err)?
            .result
            .execution_context_id;

        let eval = EvaluateParams::builder()
            .expression(script)
            .context_id(context)
            .return_by_value(false)
            .build()
            .map_err(ExtractError::Browser)?;
        let found = self.page.execute(eval).await.map_err(browser_err)?.result;
        let Some(object_id) = found.result.object_id else {
            return Ok(None);
        };

        // same process frames report their boxes in top level coordinates already
        let model = self
            .page
            .execute(GetBoxModelParams {
                node_id: None,
                backend_node_id: None,
                object_id: Some(object_id),
            })
            .await
            .map_err(browser_err)?
            .result
            .model;
        let quad = model.content.inner();
        if quad.len() < 8 {
            return Ok(None);
        }
        Ok(Some(Point {
            x: (quad[0] + quad[2] + quad[4] + quad[6]) / 4.0,
            y: (quad[1] + quad[3] + quad[5] + quad[7]) / 4.0,
        }))
    }

    async fn key(&self, kind: DispatchKeyEventType) -> Result<(), ExtractError> {
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind.clone())
            .key(" ")
            .code("Space")
            .windows_virtual_key_code(32);
        if kind == DispatchKeyEventType::KeyDown {
            builder = builder.text(" ");
        }
        let params = builder.build().map_err(ExtractError::Browser)?;
        self.page.execute(params).await.map_err(browser_err)?;
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), ExtractError> {
        match tokio::time::timeout(NAVIGATION_TIMEOUT, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ExtractError::Navigation(e.to_string())),
            Err(_) => {
                // hostile pages keep loading ads forever, the player is usually up by now
                debug!("load event never came for {}, carrying on", url);
                Ok(())
            }
        }
    }

    async fn viewport_center(&mut self) -> Result<Point, ExtractError> {
        let size: Vec<f64> = self
            .page
            .evaluate("[window.innerWidth, window.innerHeight]")
            .await
            .map_err(browser_err)?
            .into_value()
            .map_err(browser_err)?;
        match size.as_slice() {
            [w, h] => Ok(Point {
                x: w / 2.0,
                y: h / 2.0,
            }),
            _ => Err(ExtractError::Browser("viewport size unreadable".to_string())),
        }
    }

    async fn move_pointer(&mut self, to: Point) -> Result<(), ExtractError> {
        self.mouse(DispatchMouseEventType::MouseMoved, to).await
    }

    async fn click(&mut self, at: Point) -> Result<(), ExtractError> {
        self.mouse(DispatchMouseEventType::MouseMoved, at).await?;
        self.mouse(DispatchMouseEventType::MousePressed, at).await?;
        self.mouse(DispatchMouseEventType::MouseReleased, at).await
    }

    async fn locate_in_frames(&mut self, selectors: &[&str]) -> Result<Vec<Point>, ExtractError> {
        let tree = self
            .page
            .execute(GetFrameTreeParams::default())
            .await
            .map_err(browser_err)?
            .result
            .frame_tree;
        let mut frames = Vec::new();
        Self::frames(tree, &mut frames);

        let script = locate_script(selectors);
        let mut points = Vec::new();
        for frame in &frames {
            // frames come and go while ads rotate, a detached one is not an error
            match self.locate_in_frame(frame, &script).await {
                Ok(Some(point)) => points.push(point),
                Ok(None) => {}
                Err(e) => debug!("frame {:?} skipped: {}", frame.frame.id, e),
            }
        }
        Ok(points)
    }

    async fn press_space(&mut self) -> Result<(), ExtractError> {
        self.key(DispatchKeyEventType::KeyDown).await?;
        self.key(DispatchKeyEventType::KeyUp).await
    }

    async fn wait_for_capture(&mut self, window: Duration) -> Option<String> {
        let mut capture = self.capture.clone();
        match tokio::time::timeout(window, capture.wait_for(|slot| slot.is_some())).await {
            Ok(Ok(found)) => (*found).clone(),
            _ => None,
        }
    }

    async fn html(&mut self) -> Result<String, ExtractError> {
        self.page.content().await.map_err(browser_err)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, ExtractError> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(browser_err)
    }

    async fn close(self: Box<Self>) -> Result<(), ExtractError> {
        let ChromeSession {
            mut browser,
            page,
            handler,
            tasks,
            capture: _,
            killer,
            profile_dir,
        } = *self;

        let report = killer.shutdown().await;
        debug!(
            "popups closed: {}, failed: {}",
            report.closed.len(),
            report.failed.len()
        );
        for task in &tasks {
            task.abort();
        }
        drop(page);

        let closed = browser.close().await.map(|_| ()).map_err(browser_err);
        if let Err(e) = browser.wait().await {
            debug!("waiting on chrome to exit failed: {}", e);
        }
        handler.abort();
        remove_profile(&profile_dir).await;
        closed
    }
}
