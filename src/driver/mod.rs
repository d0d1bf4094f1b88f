//! UI automation driver abstraction.
//!
//! The engine never holds a live DOM reference across operations. It keeps
//! immutable [`Locator`] values and asks the driver for a fresh
//! [`ElementHandle`] right before each interaction.

pub mod chrome;
mod js;
pub mod locator;

pub use locator::{css_attr_value, Locator, Selector};

use crate::error::{AutomationError, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque reference to a DOM node at one point in time.
///
/// Handles go stale when the document changes; driver operations on a stale
/// handle fail with `DriverError::StaleHandle`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle(pub String);

impl ElementHandle {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Browser tab / window identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowHandle(pub String);

/// Element rectangle in document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Manhattan distance between the top-left corners.
    pub fn manhattan_distance(&self, x: f64, y: f64) -> f64 {
        (self.x - x).abs() + (self.y - y).abs()
    }

    /// Distance from this box's center to the nearest point of `other`.
    pub fn distance_to(&self, other: &BoundingBox) -> f64 {
        let (cx, cy) = self.center();
        let dx = if cx < other.x {
            other.x - cx
        } else if cx > other.x + other.width {
            cx - (other.x + other.width)
        } else {
            0.0
        };
        let dy = if cy < other.y {
            other.y - cy
        } else if cy > other.y + other.height {
            cy - (other.y + other.height)
        } else {
            0.0
        };
        (dx * dx + dy * dy).sqrt()
    }
}

/// Events fired, in order, by the synthetic click fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyntheticEvent {
    MouseOver,
    MouseEnter,
    MouseMove,
    MouseDown,
    Focus,
    MouseUp,
    Click,
}

impl SyntheticEvent {
    /// hover → enter → move → down → focus → up → click
    pub const CLICK_SEQUENCE: [SyntheticEvent; 7] = [
        SyntheticEvent::MouseOver,
        SyntheticEvent::MouseEnter,
        SyntheticEvent::MouseMove,
        SyntheticEvent::MouseDown,
        SyntheticEvent::Focus,
        SyntheticEvent::MouseUp,
        SyntheticEvent::Click,
    ];

    pub fn dom_name(&self) -> &'static str {
        match self {
            SyntheticEvent::MouseOver => "mouseover",
            SyntheticEvent::MouseEnter => "mouseenter",
            SyntheticEvent::MouseMove => "mousemove",
            SyntheticEvent::MouseDown => "mousedown",
            SyntheticEvent::Focus => "focus",
            SyntheticEvent::MouseUp => "mouseup",
            SyntheticEvent::Click => "click",
        }
    }
}

/// Everything the analyzer and locator read from one element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub tag: String,
    pub input_type: Option<String>,
    pub text: String,
    pub id: Option<String>,
    pub name: Option<String>,
    pub class: Option<String>,
    pub aria_label: Option<String>,
    pub title: Option<String>,
    pub placeholder: Option<String>,
    pub href: Option<String>,
    pub required: bool,
    pub bbox: Option<BoundingBox>,
    pub visible: bool,
    pub enabled: bool,
}

impl ElementSnapshot {
    /// Visible text, falling back to accessible labels.
    pub fn display_text(&self) -> String {
        if !self.text.trim().is_empty() {
            return self.text.trim().to_string();
        }
        self.aria_label
            .as_deref()
            .or(self.title.as_deref())
            .unwrap_or("")
            .trim()
            .to_string()
    }
}

/// Browser state captured around an interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    pub windows: Vec<WindowHandle>,
    pub active_window: Option<WindowHandle>,
}

/// Navigation, DOM query and element interaction primitives.
///
/// A driver session is not shareable across concurrent interactions: DOM and
/// tab state are global to the session, so callers serialize their use.
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// Navigate the active window and wait for the load event.
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// `document.readyState` of the active window.
    async fn ready_state(&self) -> Result<String>;

    /// Visible text of the whole document.
    async fn page_text(&self) -> Result<String>;

    async fn query_all(&self, selector: &Selector) -> Result<Vec<ElementHandle>>;

    /// Like [`query_all`](Self::query_all) but restricted to descendants of `parent`.
    async fn query_within(
        &self,
        parent: &ElementHandle,
        selector: &Selector,
    ) -> Result<Vec<ElementHandle>>;

    async fn text(&self, element: &ElementHandle) -> Result<String>;

    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>>;

    async fn tag_name(&self, element: &ElementHandle) -> Result<String>;

    async fn bounding_box(&self, element: &ElementHandle) -> Result<Option<BoundingBox>>;

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool>;

    async fn is_enabled(&self, element: &ElementHandle) -> Result<bool>;

    async fn computed_style(&self, element: &ElementHandle, property: &str)
        -> Result<Option<String>>;

    /// Whether an interaction handler is attached (inline, property or marker attribute).
    async fn has_click_handler(&self, element: &ElementHandle) -> Result<bool>;

    /// Text of the label associated with a form control.
    async fn label_text(&self, element: &ElementHandle) -> Result<String>;

    /// Native click. Fails with `DriverError::Obscured` when another element
    /// would receive the click.
    async fn click(&self, element: &ElementHandle) -> Result<()>;

    /// `element.click()` dispatched from page script.
    async fn script_click(&self, element: &ElementHandle) -> Result<()>;

    /// Simulated pointer movement onto the element followed by press/release,
    /// aimed at the element center shifted by `offset`.
    async fn pointer_click(&self, element: &ElementHandle, offset: (f64, f64)) -> Result<()>;

    /// Hide fixed/absolute high z-index overlays intersecting the element.
    /// Returns how many were hidden.
    async fn hide_obstructions(&self, element: &ElementHandle) -> Result<usize>;

    async fn dispatch_events(&self, element: &ElementHandle, events: &[SyntheticEvent])
        -> Result<()>;

    /// Submit the closest ancestor form. `false` when there is none.
    async fn submit_ancestor_form(&self, element: &ElementHandle) -> Result<bool>;

    async fn set_value(&self, element: &ElementHandle, text: &str) -> Result<()>;

    /// Visible texts of a selection control's options.
    async fn options(&self, element: &ElementHandle) -> Result<Vec<String>>;

    /// Select the option whose visible text equals `text`. `false` when absent.
    async fn select_by_text(&self, element: &ElementHandle, text: &str) -> Result<bool>;

    /// Assign a local file to a file-type input.
    async fn set_file(&self, element: &ElementHandle, path: &str) -> Result<()>;

    /// PNG screenshot of the active window.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    async fn window_handles(&self) -> Result<Vec<WindowHandle>>;

    async fn active_window(&self) -> Result<Option<WindowHandle>>;

    async fn switch_to_window(&self, window: &WindowHandle) -> Result<()>;

    /// Close the active window. The driver falls back to its first remaining window.
    async fn close_window(&self) -> Result<()>;

    /// Read the fields the analyzer and locator need in one call.
    async fn describe(&self, element: &ElementHandle) -> Result<ElementSnapshot> {
        let tag = self.tag_name(element).await?;
        Ok(ElementSnapshot {
            input_type: self.attribute(element, "type").await?,
            text: self.text(element).await?,
            id: self.attribute(element, "id").await?,
            name: self.attribute(element, "name").await?,
            class: self.attribute(element, "class").await?,
            aria_label: self.attribute(element, "aria-label").await?,
            title: self.attribute(element, "title").await?,
            placeholder: self.attribute(element, "placeholder").await?,
            href: self.attribute(element, "href").await?,
            required: self.attribute(element, "required").await?.is_some(),
            bbox: self.bounding_box(element).await?,
            visible: self.is_visible(element).await?,
            enabled: self.is_enabled(element).await?,
            tag,
        })
    }

    /// Snapshot of URL and windows, taken around an interaction.
    async fn capture_state(&self) -> Result<PageState> {
        Ok(PageState {
            url: self.current_url().await?,
            windows: self.window_handles().await?,
            active_window: self.active_window().await?,
        })
    }
}

/// Navigate to `url` and poll `document.readyState` until `complete`.
///
/// Returns `Ok(false)` if the page is still loading after `timeout`.
pub async fn load_page(
    driver: &dyn AutomationDriver,
    url: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> std::result::Result<bool, AutomationError> {
    driver.navigate(url).await?;
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match driver.ready_state().await {
            Ok(state) if state == "complete" => return Ok(true),
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => debug!("readyState check failed: {}", e),
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(poll_interval).await;
    }
}
