// spider_chrome re-exports chromiumoxide API
use super::js;
use super::{
    AutomationDriver, BoundingBox, ElementHandle, ElementSnapshot, Selector, SyntheticEvent,
    WindowHandle,
};
use crate::config::BrowserSettings;
use crate::error::{is_connection_lost, DriverError, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::page::{EventLoadEventFired, NavigateParams};
use chromiumoxide::cdp::browser_protocol::target::CloseTargetParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::layout::Point;
use chromiumoxide::page::Page;
use futures::StreamExt;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

const LAUNCH_HELP: &str = "\n\n\
    Chrome not found. You can:\n\
    - Install Chrome: https://www.google.com/chrome/\n\
    - Ubuntu/Debian: sudo apt install chromium-browser\n\
    - Fedora: sudo dnf install chromium\n\
    - macOS: brew install --cask google-chrome\n\
    - Or specify path: --chrome-path /path/to/chrome\n\
    - Linux sandbox issue? Try: --no-sandbox";

/// [`AutomationDriver`] over the Chrome DevTools Protocol.
pub struct ChromeDriver {
    browser: Browser,
    temp_dir: Option<PathBuf>,
    /// Target id chosen by `switch_to_window`; `None` means "first real page".
    active_target: Mutex<Option<String>>,
    load_timeout: Duration,
}

/// Connection mode for Chrome browser
pub enum ConnectionMode {
    /// Sandboxed mode - launches Chrome using system installation
    Sandboxed {
        chrome_path: Option<String>,
        no_sandbox: bool,
        headless: bool,
    },
    /// Advanced mode - connects to existing Chrome on debug port
    DebugPort(u16),
}

#[derive(Debug, Deserialize)]
struct HitTest {
    x: f64,
    y: f64,
    clear: bool,
    blocker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Wrapped<T> {
    value: Option<T>,
}

impl ChromeDriver {
    /// Launch or attach according to the `browser` config section.
    ///
    /// On CI a launched Chrome is always headless and unsandboxed.
    pub async fn from_settings(settings: &BrowserSettings, load_timeout: Duration) -> Result<Self> {
        let is_ci = running_in_ci();
        let mode = match settings.debug_port {
            Some(port) => ConnectionMode::DebugPort(port),
            None => ConnectionMode::Sandboxed {
                chrome_path: settings.chrome_path.clone(),
                no_sandbox: settings.no_sandbox || is_ci,
                headless: settings.headless || is_ci,
            },
        };
        let mut driver = Self::new(mode).await?;
        driver.load_timeout = load_timeout;
        Ok(driver)
    }

    /// Create new ChromeDriver with specified connection mode
    pub async fn new(mode: ConnectionMode) -> Result<Self> {
        let (browser, temp_dir) = match mode {
            ConnectionMode::Sandboxed {
                chrome_path,
                no_sandbox,
                headless,
            } => {
                // Unique profile directory per instance so parallel sessions
                // never share state.
                let temp_dir = std::env::temp_dir().join(format!(
                    "autoapply-chrome-{}-{:016x}",
                    std::process::id(),
                    rand::random::<u64>()
                ));
                std::fs::create_dir_all(&temp_dir).map_err(|e| {
                    DriverError::LaunchFailed(format!("Failed to create temp directory: {}", e))
                })?;

                let mut config = if headless {
                    BrowserConfig::builder()
                } else {
                    BrowserConfig::builder().with_head()
                };
                config = config.user_data_dir(&temp_dir);

                if no_sandbox {
                    config = config.arg("--no-sandbox");
                }
                if let Some(path) = chrome_path {
                    config = config.chrome_executable(path);
                }

                let config = config
                    .build()
                    .map_err(|e| DriverError::LaunchFailed(format!("{}.{}", e, LAUNCH_HELP)))?;
                let (browser, mut handler) = Browser::launch(config)
                    .await
                    .map_err(|e| DriverError::LaunchFailed(format!("{}.{}", e, LAUNCH_HELP)))?;

                tokio::spawn(async move {
                    while (handler.next().await).is_some() {
                        // Handle browser events
                    }
                });

                info!("Launched Chrome (headless: {})", headless);
                (browser, Some(temp_dir))
            }
            ConnectionMode::DebugPort(port) => {
                let url = format!("http://localhost:{}", port);
                let (browser, mut handler) = Browser::connect(&url).await.map_err(|e| {
                    DriverError::ConnectionFailed(format!(
                        "Failed to connect to Chrome on port {}. \
                             Make sure Chrome is running with --remote-debugging-port={}: {}",
                        port, port, e
                    ))
                })?;

                tokio::spawn(async move {
                    while (handler.next().await).is_some() {
                        // Handle browser events
                    }
                });

                info!("Attached to Chrome on port {}", port);
                (browser, None)
            }
        };

        Ok(Self {
            browser,
            temp_dir,
            active_target: Mutex::new(None),
            load_timeout: Duration::from_secs(30),
        })
    }

    fn selected_target(&self) -> Option<String> {
        match self.active_target.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn select_target(&self, target: Option<String>) {
        match self.active_target.lock() {
            Ok(mut guard) => *guard = target,
            Err(poisoned) => *poisoned.into_inner() = target,
        }
    }

    /// The page chosen by `switch_to_window`, else the first non-chrome:// page.
    async fn get_active_page(&self) -> Result<Page> {
        let pages = self.browser.pages().await.map_err(connection_error)?;

        if let Some(target) = self.selected_target() {
            if let Some(page) = pages.iter().find(|p| p.target_id().inner() == &target) {
                return Ok(page.clone());
            }
            debug!("Selected window {} is gone, falling back", target);
            self.select_target(None);
        }

        for page in pages.iter() {
            if let Ok(Some(url)) = page.url().await {
                if !url.starts_with("chrome://") {
                    return Ok(page.clone());
                }
            }
        }

        if let Some(page) = pages.last() {
            return Ok(page.clone());
        }

        self.browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Other(format!("Failed to create page: {}", e)))
    }

    async fn eval(&self, body: &str, args: Value) -> Result<Value> {
        let page = self.get_active_page().await?;
        let result = page.evaluate(js::script(body, args)).await.map_err(|e| {
            let msg = e.to_string();
            if is_connection_lost(&msg) {
                DriverError::Unavailable(msg)
            } else {
                DriverError::Script(msg)
            }
        })?;
        Ok(result.into_value().unwrap_or(Value::Null))
    }

    /// Run a handle script; `__stale__` becomes `StaleHandle`.
    async fn eval_on<T: DeserializeOwned>(
        &self,
        element: &ElementHandle,
        body: &str,
        mut args: Value,
    ) -> Result<T> {
        if let Some(obj) = args.as_object_mut() {
            obj.insert("handle".to_string(), json!(element.id()));
        }
        let value = self.eval(body, args).await?;
        if value.as_str() == Some(js::STALE) {
            return Err(DriverError::StaleHandle(element.id().to_string()));
        }
        decode(value)
    }

    async fn hit_test(&self, element: &ElementHandle, offset: (f64, f64)) -> Result<HitTest> {
        self.eval_on(
            element,
            js::HIT_TEST,
            json!({"dx": offset.0, "dy": offset.1}),
        )
        .await
    }

    async fn cdp_element(&self, element: &ElementHandle) -> Result<chromiumoxide::element::Element> {
        let page = self.get_active_page().await?;
        page.find_element(format!("[data-autoapply-handle=\"{}\"]", element.id()))
            .await
            .map_err(|_| DriverError::StaleHandle(element.id().to_string()))
    }

    /// Check if the browser is still alive and responsive
    pub async fn is_alive(&self) -> bool {
        match self.browser.pages().await {
            Ok(pages) => {
                if let Some(page) = pages.first() {
                    matches!(
                        tokio::time::timeout(Duration::from_secs(2), page.url()).await,
                        Ok(Ok(_))
                    )
                } else {
                    true
                }
            }
            Err(_) => false,
        }
    }

    /// Close the browser connection
    pub async fn close(mut self) -> Result<()> {
        self.browser
            .close()
            .await
            .map_err(|e| DriverError::Other(e.to_string()))?;
        Ok(())
    }
}

fn running_in_ci() -> bool {
    ["CI", "GITHUB_ACTIONS", "GITLAB_CI", "JENKINS_HOME", "CIRCLECI"]
        .iter()
        .any(|var| std::env::var(var).is_ok())
}

fn connection_error(e: CdpError) -> DriverError {
    let msg = e.to_string();
    if is_connection_lost(&msg) {
        DriverError::Unavailable(
            "Browser connection lost. The browser may have been closed or crashed.".to_string(),
        )
    } else {
        DriverError::CdpError(e)
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| DriverError::Script(format!("Unexpected script result: {}", e)))
}

/// Add https:// when no scheme is given.
fn normalize_url(url: &str) -> String {
    if !url.starts_with("http://")
        && !url.starts_with("https://")
        && !url.starts_with("file://")
        && !url.starts_with("about:")
        && !url.starts_with("data:")
    {
        debug!("Normalizing URL: {} -> https://{}", url, url);
        format!("https://{}", url)
    } else {
        url.to_string()
    }
}

#[async_trait]
impl AutomationDriver for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        let normalized_url = normalize_url(url);
        debug!("Starting navigation to: {}", normalized_url);

        // Close all but the first page so every target starts from one window
        let mut pages = self.browser.pages().await.map_err(connection_error)?;
        for (i, p) in pages.iter().enumerate() {
            if i > 0 {
                debug!("Closing extra page {}", i);
                let _ = p.execute(CloseTargetParams::new(p.target_id().clone())).await;
            }
        }
        self.select_target(None);
        pages = self.browser.pages().await.map_err(connection_error)?;

        let page = match pages.first() {
            Some(page) => page.clone(),
            None => self
                .browser
                .new_page("about:blank")
                .await
                .map_err(|e| DriverError::NavigationFailed(e.to_string()))?,
        };

        let mut load_events = page
            .event_listener::<EventLoadEventFired>()
            .await
            .map_err(connection_error)?;

        let params = NavigateParams::builder()
            .url(&normalized_url)
            .build()
            .map_err(|e| {
                DriverError::NavigationFailed(format!("Invalid URL {}: {}", normalized_url, e))
            })?;

        let response = page.execute(params).await.map_err(|e| {
            let error_str = e.to_string();
            if is_connection_lost(&error_str) {
                DriverError::Unavailable(
                    "Browser connection lost. The browser may have been closed or crashed."
                        .to_string(),
                )
            } else {
                DriverError::NavigationFailed(format!(
                    "Failed to navigate to {}: {}",
                    normalized_url, e
                ))
            }
        })?;

        if let Some(error_text) = response.result.error_text.clone() {
            warn!("Navigation error from browser: {}", error_text);
            return Err(DriverError::NavigationFailed(format!(
                "Navigation error: {}",
                error_text
            )));
        }

        match tokio::time::timeout(self.load_timeout, load_events.next()).await {
            Ok(Some(_)) => debug!("Page load event fired"),
            Ok(None) => warn!("Load event stream closed before the page loaded"),
            Err(_) => {
                return Err(DriverError::NavigationTimeout(format!(
                    "{} did not fire a load event within {}s",
                    normalized_url,
                    self.load_timeout.as_secs()
                )));
            }
        }

        info!("Navigated to {}", normalized_url);
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let page = self.get_active_page().await?;
        page.url()
            .await
            .map_err(connection_error)?
            .ok_or(DriverError::NoPage)
    }

    async fn ready_state(&self) -> Result<String> {
        decode(self.eval(js::READY_STATE, json!({})).await?)
    }

    async fn page_text(&self) -> Result<String> {
        decode(self.eval(js::PAGE_TEXT, json!({})).await?)
    }

    async fn query_all(&self, selector: &Selector) -> Result<Vec<ElementHandle>> {
        let args = match selector {
            Selector::Css(css) => json!({"kind": "css", "value": css}),
            Selector::Text(text) => json!({"kind": "text", "value": text}),
        };
        let ids: Vec<String> = decode(self.eval(js::QUERY, args).await?)?;
        Ok(ids.into_iter().map(ElementHandle).collect())
    }

    async fn query_within(
        &self,
        parent: &ElementHandle,
        selector: &Selector,
    ) -> Result<Vec<ElementHandle>> {
        let args = match selector {
            Selector::Css(css) => json!({"kind": "css", "value": css, "parent": parent.id()}),
            Selector::Text(text) => json!({"kind": "text", "value": text, "parent": parent.id()}),
        };
        let value = self.eval(js::QUERY, args).await?;
        if value.as_str() == Some(js::STALE) {
            return Err(DriverError::StaleHandle(parent.id().to_string()));
        }
        let ids: Vec<String> = decode(value)?;
        Ok(ids.into_iter().map(ElementHandle).collect())
    }

    async fn text(&self, element: &ElementHandle) -> Result<String> {
        self.eval_on(element, js::TEXT, json!({})).await
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        let wrapped: Wrapped<String> = self
            .eval_on(element, js::ATTRIBUTE, json!({"name": name}))
            .await?;
        Ok(wrapped.value)
    }

    async fn tag_name(&self, element: &ElementHandle) -> Result<String> {
        self.eval_on(element, js::TAG_NAME, json!({})).await
    }

    async fn bounding_box(&self, element: &ElementHandle) -> Result<Option<BoundingBox>> {
        let wrapped: Wrapped<BoundingBox> =
            self.eval_on(element, js::BOUNDING_BOX, json!({})).await?;
        Ok(wrapped.value)
    }

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool> {
        self.eval_on(element, js::IS_VISIBLE, json!({})).await
    }

    async fn is_enabled(&self, element: &ElementHandle) -> Result<bool> {
        self.eval_on(element, js::IS_ENABLED, json!({})).await
    }

    async fn computed_style(
        &self,
        element: &ElementHandle,
        property: &str,
    ) -> Result<Option<String>> {
        let wrapped: Wrapped<String> = self
            .eval_on(element, js::COMPUTED_STYLE, json!({"property": property}))
            .await?;
        Ok(wrapped.value)
    }

    async fn has_click_handler(&self, element: &ElementHandle) -> Result<bool> {
        self.eval_on(element, js::HAS_CLICK_HANDLER, json!({})).await
    }

    async fn label_text(&self, element: &ElementHandle) -> Result<String> {
        self.eval_on(element, js::LABEL_TEXT, json!({})).await
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        let hit = self.hit_test(element, (0.0, 0.0)).await?;
        if !hit.clear {
            return Err(DriverError::Obscured(
                hit.blocker.unwrap_or_else(|| "unknown element".to_string()),
            ));
        }
        let target = self.cdp_element(element).await?;
        target.click().await.map_err(connection_error)?;
        Ok(())
    }

    async fn script_click(&self, element: &ElementHandle) -> Result<()> {
        let _: bool = self.eval_on(element, js::SCRIPT_CLICK, json!({})).await?;
        Ok(())
    }

    async fn pointer_click(&self, element: &ElementHandle, offset: (f64, f64)) -> Result<()> {
        let hit = self.hit_test(element, offset).await?;
        if !hit.clear {
            return Err(DriverError::Obscured(
                hit.blocker.unwrap_or_else(|| "unknown element".to_string()),
            ));
        }
        let page = self.get_active_page().await?;
        let point = Point::new(hit.x, hit.y);
        page.move_mouse(point).await.map_err(connection_error)?;
        page.click(point).await.map_err(connection_error)?;
        Ok(())
    }

    async fn hide_obstructions(&self, element: &ElementHandle) -> Result<usize> {
        self.eval_on(element, js::HIDE_OBSTRUCTIONS, json!({})).await
    }

    async fn dispatch_events(
        &self,
        element: &ElementHandle,
        events: &[SyntheticEvent],
    ) -> Result<()> {
        let names: Vec<&str> = events.iter().map(SyntheticEvent::dom_name).collect();
        let _: bool = self
            .eval_on(element, js::DISPATCH_EVENTS, json!({"events": names}))
            .await?;
        Ok(())
    }

    async fn submit_ancestor_form(&self, element: &ElementHandle) -> Result<bool> {
        self.eval_on(element, js::SUBMIT_FORM, json!({})).await
    }

    async fn set_value(&self, element: &ElementHandle, text: &str) -> Result<()> {
        let _: bool = self
            .eval_on(element, js::SET_VALUE, json!({"value": text}))
            .await?;
        Ok(())
    }

    async fn options(&self, element: &ElementHandle) -> Result<Vec<String>> {
        self.eval_on(element, js::OPTIONS, json!({})).await
    }

    async fn select_by_text(&self, element: &ElementHandle, text: &str) -> Result<bool> {
        self.eval_on(element, js::SELECT_BY_TEXT, json!({"text": text}))
            .await
    }

    async fn set_file(&self, element: &ElementHandle, path: &str) -> Result<()> {
        let target = self.cdp_element(element).await?;
        let params: SetFileInputFilesParams = serde_json::from_value(json!({
            "files": [path],
            "backendNodeId": target.backend_node_id,
        }))
        .map_err(|e| DriverError::Other(format!("Invalid file input params: {}", e)))?;
        let page = self.get_active_page().await?;
        page.execute(params).await.map_err(connection_error)?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let page = self.get_active_page().await?;
        page.screenshot(chromiumoxide::page::ScreenshotParams::default())
            .await
            .map_err(|e| DriverError::Other(format!("Failed to take screenshot: {}", e)))
    }

    async fn window_handles(&self) -> Result<Vec<WindowHandle>> {
        let pages = self.browser.pages().await.map_err(connection_error)?;
        Ok(pages
            .iter()
            .map(|p| WindowHandle(p.target_id().inner().clone()))
            .collect())
    }

    async fn active_window(&self) -> Result<Option<WindowHandle>> {
        let page = self.get_active_page().await?;
        Ok(Some(WindowHandle(page.target_id().inner().clone())))
    }

    async fn switch_to_window(&self, window: &WindowHandle) -> Result<()> {
        let pages = self.browser.pages().await.map_err(connection_error)?;
        if !pages.iter().any(|p| p.target_id().inner() == &window.0) {
            return Err(DriverError::Other(format!("No such window: {}", window.0)));
        }
        self.select_target(Some(window.0.clone()));
        debug!("Switched to window {}", window.0);
        Ok(())
    }

    async fn close_window(&self) -> Result<()> {
        let page = self.get_active_page().await?;
        page.execute(CloseTargetParams::new(page.target_id().clone()))
            .await
            .map_err(connection_error)?;
        self.select_target(None);
        Ok(())
    }

    async fn describe(&self, element: &ElementHandle) -> Result<ElementSnapshot> {
        self.eval_on(element, js::DESCRIBE, json!({})).await
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        if let Some(temp_dir) = &self.temp_dir {
            if temp_dir.exists() {
                let _ = std::fs::remove_dir_all(temp_dir);
            }
        }
    }
}
