//! In-memory automation driver for integration tests.
//!
//! Pages are registered by URL and loaded into windows on navigation. Each
//! load gets a new document number, and handles embed it, so a handle from a
//! previous document fails with `StaleHandle` the way a real browser does.
//! Only a small CSS subset is understood: selector lists, descendant
//! combinators, tags, `*`, `#id`, `.class` and `[attr]`, `[attr='v']`,
//! `[attr*='v']`, `[attr^='v']`.

#![allow(dead_code)]

use async_trait::async_trait;
use autoapply_webdriver::config::{EngineConfig, Profile};
use autoapply_webdriver::driver::{
    AutomationDriver, BoundingBox, ElementHandle, Selector, SyntheticEvent, WindowHandle,
};
use autoapply_webdriver::error::{DriverError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

/// What happens when an element is clicked by any method.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickEffect {
    /// Load another page in the active window.
    Navigate(String),
    /// Open a page in a new window; focus stays where it was.
    OpenWindow(String),
    /// Swap the visible text of the current document (modal, inline message).
    ReplaceText(String),
}

#[derive(Debug, Clone)]
pub struct FakeElement {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub text: String,
    pub label: String,
    pub options: Vec<String>,
    pub bbox: Option<BoundingBox>,
    pub visible: bool,
    pub enabled: bool,
    pub parent: Option<usize>,
    pub font_weight: Option<String>,
    pub handler: bool,
    pub obscured_by: Option<String>,
    pub on_click: Option<ClickEffect>,
}

/// Start building an element.
pub fn el(tag: &str) -> FakeElement {
    FakeElement {
        tag: tag.to_string(),
        attrs: BTreeMap::new(),
        text: String::new(),
        label: String::new(),
        options: Vec::new(),
        bbox: None,
        visible: true,
        enabled: true,
        parent: None,
        font_weight: None,
        handler: false,
        obscured_by: None,
        on_click: None,
    }
}

impl FakeElement {
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| o.to_string()).collect();
        self
    }

    pub fn at(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.bbox = Some(BoundingBox::new(x, y, width, height));
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn bold(mut self) -> Self {
        self.font_weight = Some("700".to_string());
        self
    }

    pub fn with_handler(mut self) -> Self {
        self.handler = true;
        self
    }

    pub fn obscured_by(mut self, blocker: &str) -> Self {
        self.obscured_by = Some(blocker.to_string());
        self
    }

    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.on_click = Some(effect);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FakePage {
    pub url: String,
    pub text: String,
    pub loads: bool,
    pub elements: Vec<FakeElement>,
}

impl FakePage {
    pub fn new(url: &str, text: &str) -> Self {
        Self {
            url: url.to_string(),
            text: text.to_string(),
            loads: true,
            elements: Vec::new(),
        }
    }

    /// `readyState` never reaches `complete`.
    pub fn never_loads(mut self) -> Self {
        self.loads = false;
        self
    }

    pub fn add(&mut self, element: FakeElement) -> usize {
        self.elements.push(element);
        self.elements.len() - 1
    }

    pub fn add_in(&mut self, parent: usize, mut element: FakeElement) -> usize {
        element.parent = Some(parent);
        self.add(element)
    }
}

/// One recorded click: the element's `id` (or tag) and the driver call that did it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClickRecord {
    pub target: String,
    pub via: &'static str,
}

struct Window {
    id: String,
    doc: u64,
    page: FakePage,
    values: HashMap<usize, String>,
    cleared: bool,
}

struct State {
    pages: HashMap<String, FakePage>,
    windows: Vec<Window>,
    active: usize,
    next_doc: u64,
    next_window: u64,
    unavailable: bool,
    fail_methods: HashSet<&'static str>,
    nav_failures: HashMap<String, u32>,
    kill_on: HashSet<String>,
    failing_queries: Vec<String>,
    stale_uses: u32,
    queries: Vec<String>,
    clicks: Vec<ClickRecord>,
    navigations: Vec<String>,
}

impl State {
    fn load(&mut self, url: &str) -> (u64, FakePage) {
        let page = self
            .pages
            .get(url)
            .cloned()
            .unwrap_or_else(|| FakePage::new(url, ""));
        self.next_doc += 1;
        (self.next_doc, page)
    }

    fn load_into_active(&mut self, url: &str) {
        let (doc, page) = self.load(url);
        let window = &mut self.windows[self.active];
        window.doc = doc;
        window.page = page;
        window.values.clear();
        window.cleared = false;
    }

    fn window(&self) -> &Window {
        &self.windows[self.active]
    }

    fn resolve(&mut self, handle: &ElementHandle) -> Result<usize> {
        if self.stale_uses > 0 {
            self.stale_uses -= 1;
            return Err(DriverError::StaleHandle(handle.id().to_string()));
        }
        let stale = || DriverError::StaleHandle(handle.id().to_string());
        let (doc, idx) = handle.id().split_once(':').ok_or_else(stale)?;
        let doc: u64 = doc.parse().map_err(|_| stale())?;
        let idx: usize = idx.parse().map_err(|_| stale())?;
        let window = self.window();
        if window.doc != doc || idx >= window.page.elements.len() {
            return Err(stale());
        }
        Ok(idx)
    }

    fn element(&mut self, handle: &ElementHandle) -> Result<FakeElement> {
        let idx = self.resolve(handle)?;
        Ok(self.window().page.elements[idx].clone())
    }

    fn handle(&self, idx: usize) -> ElementHandle {
        ElementHandle(format!("{}:{}", self.window().doc, idx))
    }

    fn check_method(&self, method: &'static str) -> Result<()> {
        if self.fail_methods.contains(method) {
            Err(DriverError::Other(format!("{} click rejected", method)))
        } else {
            Ok(())
        }
    }

    fn check_obscured(&self, idx: usize) -> Result<()> {
        let window = self.window();
        match &window.page.elements[idx].obscured_by {
            Some(blocker) if !window.cleared => Err(DriverError::Obscured(blocker.clone())),
            _ => Ok(()),
        }
    }

    fn activate(&mut self, idx: usize, via: &'static str) {
        let element = self.window().page.elements[idx].clone();
        self.clicks.push(ClickRecord {
            target: element
                .attrs
                .get("id")
                .cloned()
                .unwrap_or_else(|| element.tag.clone()),
            via,
        });
        match element.on_click {
            Some(ClickEffect::Navigate(url)) => {
                self.navigations.push(url.clone());
                self.load_into_active(&url);
            }
            Some(ClickEffect::OpenWindow(url)) => {
                let (doc, page) = self.load(&url);
                self.next_window += 1;
                self.windows.push(Window {
                    id: format!("w{}", self.next_window),
                    doc,
                    page,
                    values: HashMap::new(),
                    cleared: false,
                });
            }
            Some(ClickEffect::ReplaceText(text)) => {
                self.windows[self.active].page.text = text;
            }
            None => {}
        }
    }

    fn query(&self, root: Option<usize>, selector: &Selector) -> Result<Vec<usize>> {
        let elements = &self.window().page.elements;
        let in_scope = |idx: usize| root.map_or(true, |r| is_descendant(elements, idx, r));
        match selector {
            Selector::Css(css) => {
                let list = parse_selector_list(css)
                    .ok_or_else(|| DriverError::Script(format!("unsupported selector {}", css)))?;
                Ok((0..elements.len())
                    .filter(|&i| in_scope(i))
                    .filter(|&i| list.iter().any(|complex| matches_complex(elements, i, complex)))
                    .collect())
            }
            Selector::Text(phrase) => {
                let needle = phrase.to_lowercase();
                let hits: Vec<usize> = (0..elements.len())
                    .filter(|&i| in_scope(i))
                    .filter(|&i| {
                        let element = &elements[i];
                        text_of(element).to_lowercase().contains(&needle)
                            || element
                                .attrs
                                .get("aria-label")
                                .is_some_and(|label| label.to_lowercase().contains(&needle))
                    })
                    .collect();
                Ok(hits
                    .iter()
                    .copied()
                    .filter(|&i| !hits.iter().any(|&o| o != i && is_descendant(elements, o, i)))
                    .collect())
            }
        }
    }
}

fn text_of(element: &FakeElement) -> String {
    if !element.text.trim().is_empty() {
        return element.text.trim().to_string();
    }
    element
        .attrs
        .get("value")
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn is_descendant(elements: &[FakeElement], idx: usize, ancestor: usize) -> bool {
    let mut current = elements[idx].parent;
    while let Some(p) = current {
        if p == ancestor {
            return true;
        }
        current = elements[p].parent;
    }
    false
}

#[derive(Debug, Clone)]
enum AttrOp {
    Exists,
    Equals(String),
    Contains(String),
    Prefix(String),
}

#[derive(Debug, Clone, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, AttrOp)>,
}

/// Split on `sep` outside brackets and quotes.
fn split_top(input: &str, sep: impl Fn(char) -> bool) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in input.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => {
                escaped = true;
                current.push(c);
            }
            (Some(q), _) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), _) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (None, '[') => {
                depth += 1;
                current.push(c);
            }
            (None, ']') => {
                depth -= 1;
                current.push(c);
            }
            (None, _) if depth == 0 && sep(c) => {
                if !current.trim().is_empty() {
                    parts.push(current.trim().to_string());
                }
                current.clear();
            }
            (None, _) => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn parse_selector_list(css: &str) -> Option<Vec<Vec<Compound>>> {
    split_top(css, |c| c == ',')
        .iter()
        .map(|complex| {
            split_top(complex, char::is_whitespace)
                .iter()
                .map(|c| parse_compound(c))
                .collect::<Option<Vec<_>>>()
        })
        .collect()
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn parse_compound(input: &str) -> Option<Compound> {
    let chars: Vec<char> = input.chars().collect();
    let mut compound = Compound::default();
    let mut i = 0;
    let read_ident = |i: &mut usize| {
        let start = *i;
        while *i < chars.len() && is_ident(chars[*i]) {
            *i += 1;
        }
        chars[start..*i].iter().collect::<String>()
    };

    if i < chars.len() && chars[i] == '*' {
        i += 1;
    } else if i < chars.len() && is_ident(chars[i]) {
        compound.tag = Some(read_ident(&mut i).to_lowercase());
    }

    while i < chars.len() {
        match chars[i] {
            '#' => {
                i += 1;
                compound.id = Some(read_ident(&mut i));
            }
            '.' => {
                i += 1;
                compound.classes.push(read_ident(&mut i));
            }
            '[' => {
                i += 1;
                let name = read_ident(&mut i);
                if name.is_empty() {
                    return None;
                }
                let op = match chars.get(i)? {
                    ']' => {
                        i += 1;
                        compound.attrs.push((name, AttrOp::Exists));
                        continue;
                    }
                    '=' => {
                        i += 1;
                        '='
                    }
                    c @ ('*' | '^') if chars.get(i + 1) == Some(&'=') => {
                        i += 2;
                        *c
                    }
                    _ => return None,
                };
                let value = read_value(&chars, &mut i)?;
                if chars.get(i) != Some(&']') {
                    return None;
                }
                i += 1;
                let op = match op {
                    '=' => AttrOp::Equals(value),
                    '*' => AttrOp::Contains(value),
                    _ => AttrOp::Prefix(value),
                };
                compound.attrs.push((name, op));
            }
            _ => return None,
        }
    }
    Some(compound)
}

fn read_value(chars: &[char], i: &mut usize) -> Option<String> {
    let mut value = String::new();
    match chars.get(*i)? {
        q @ ('\'' | '"') => {
            let q = *q;
            *i += 1;
            loop {
                let c = *chars.get(*i)?;
                *i += 1;
                if c == q {
                    break;
                }
                if c == '\\' {
                    let next = *chars.get(*i)?;
                    *i += 1;
                    if next == 'a' {
                        value.push('\n');
                        if chars.get(*i) == Some(&' ') {
                            *i += 1;
                        }
                    } else {
                        value.push(next);
                    }
                } else {
                    value.push(c);
                }
            }
        }
        _ => {
            while *i < chars.len() && is_ident(chars[*i]) {
                value.push(chars[*i]);
                *i += 1;
            }
        }
    }
    Some(value)
}

fn matches_compound(element: &FakeElement, compound: &Compound) -> bool {
    if let Some(tag) = &compound.tag {
        if !element.tag.eq_ignore_ascii_case(tag) {
            return false;
        }
    }
    if let Some(id) = &compound.id {
        if element.attrs.get("id") != Some(id) {
            return false;
        }
    }
    let classes: Vec<&str> = element
        .attrs
        .get("class")
        .map(|c| c.split_whitespace().collect())
        .unwrap_or_default();
    if !compound.classes.iter().all(|c| classes.contains(&c.as_str())) {
        return false;
    }
    compound.attrs.iter().all(|(name, op)| {
        let value = element.attrs.get(name);
        match op {
            AttrOp::Exists => value.is_some(),
            AttrOp::Equals(v) => value == Some(v),
            AttrOp::Contains(v) => !v.is_empty() && value.is_some_and(|a| a.contains(v.as_str())),
            AttrOp::Prefix(v) => !v.is_empty() && value.is_some_and(|a| a.starts_with(v.as_str())),
        }
    })
}

fn matches_complex(elements: &[FakeElement], idx: usize, complex: &[Compound]) -> bool {
    let Some((last, ancestors)) = complex.split_last() else {
        return false;
    };
    if !matches_compound(&elements[idx], last) {
        return false;
    }
    let mut current = elements[idx].parent;
    for compound in ancestors.iter().rev() {
        loop {
            let Some(p) = current else {
                return false;
            };
            current = elements[p].parent;
            if matches_compound(&elements[p], compound) {
                break;
            }
        }
    }
    true
}

pub struct FakeDriver {
    state: Mutex<State>,
}

impl FakeDriver {
    /// One blank window, no pages registered.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                pages: HashMap::new(),
                windows: vec![Window {
                    id: "w1".to_string(),
                    doc: 0,
                    page: FakePage::new("about:blank", ""),
                    values: HashMap::new(),
                    cleared: false,
                }],
                active: 0,
                next_doc: 0,
                next_window: 1,
                unavailable: false,
                fail_methods: HashSet::new(),
                nav_failures: HashMap::new(),
                kill_on: HashSet::new(),
                failing_queries: Vec::new(),
                stale_uses: 0,
                queries: Vec::new(),
                clicks: Vec::new(),
                navigations: Vec::new(),
            }),
        }
    }

    /// A driver with `pages` registered and the first one already loaded.
    pub fn with_pages(pages: Vec<FakePage>) -> Self {
        let driver = Self::new();
        let first = pages.first().map(|p| p.url.clone());
        for page in pages {
            driver.add_page(page);
        }
        if let Some(url) = first {
            driver.state.lock().unwrap().load_into_active(&url);
        }
        driver
    }

    pub fn add_page(&self, page: FakePage) {
        self.state
            .lock()
            .unwrap()
            .pages
            .insert(page.url.clone(), page);
    }

    /// Every call fails with `Unavailable` from now on.
    pub fn set_unavailable(&self) {
        self.state.lock().unwrap().unavailable = true;
    }

    /// `native`, `script`, `pointer`, `synthetic` or `form_submit`.
    pub fn fail_method(&self, method: &'static str) {
        self.state.lock().unwrap().fail_methods.insert(method);
    }

    pub fn fail_all_click_methods(&self) {
        for method in ["native", "script", "pointer", "synthetic", "form_submit"] {
            self.fail_method(method);
        }
    }

    /// The next `times` navigations to `url` fail with `NavigationFailed`.
    pub fn fail_navigation(&self, url: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .nav_failures
            .insert(url.to_string(), times);
    }

    /// Navigating to `url` takes the whole session down.
    pub fn kill_on_navigate(&self, url: &str) {
        self.state.lock().unwrap().kill_on.insert(url.to_string());
    }

    /// CSS queries containing `fragment` fail with a script error.
    pub fn fail_queries_containing(&self, fragment: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_queries
            .push(fragment.to_string());
    }

    /// The next `n` handle resolutions report `StaleHandle`.
    pub fn expire_next_handle_uses(&self, n: u32) {
        self.state.lock().unwrap().stale_uses = n;
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn clicks(&self) -> Vec<ClickRecord> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn window_count(&self) -> usize {
        self.state.lock().unwrap().windows.len()
    }

    pub fn active_window_id(&self) -> String {
        self.state.lock().unwrap().window().id.clone()
    }

    pub fn active_url(&self) -> String {
        self.state.lock().unwrap().window().page.url.clone()
    }

    /// Value delivered into the first element matching `css` in the active window.
    pub fn value_of(&self, css: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        let idx = *state.query(None, &Selector::css(css)).ok()?.first()?;
        state.window().values.get(&idx).cloned()
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(DriverError::Unavailable("browser process exited".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl AutomationDriver for FakeDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut state = self.guard()?;
        state.navigations.push(url.to_string());
        if state.kill_on.contains(url) {
            state.unavailable = true;
            return Err(DriverError::Unavailable("browser crashed".to_string()));
        }
        if let Some(remaining) = state.nav_failures.get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DriverError::NavigationFailed(format!(
                    "net::ERR_CONNECTION_RESET at {}",
                    url
                )));
            }
        }
        state.load_into_active(url);
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.guard()?.window().page.url.clone())
    }

    async fn ready_state(&self) -> Result<String> {
        let state = self.guard()?;
        Ok(if state.window().page.loads {
            "complete".to_string()
        } else {
            "loading".to_string()
        })
    }

    async fn page_text(&self) -> Result<String> {
        Ok(self.guard()?.window().page.text.clone())
    }

    async fn query_all(&self, selector: &Selector) -> Result<Vec<ElementHandle>> {
        let mut state = self.guard()?;
        state.queries.push(selector.to_string());
        if let Selector::Css(css) = selector {
            if state.failing_queries.iter().any(|f| css.contains(f.as_str())) {
                return Err(DriverError::Script(format!("query {} threw", css)));
            }
        }
        let found = state.query(None, selector)?;
        Ok(found.into_iter().map(|i| state.handle(i)).collect())
    }

    async fn query_within(
        &self,
        parent: &ElementHandle,
        selector: &Selector,
    ) -> Result<Vec<ElementHandle>> {
        let mut state = self.guard()?;
        state.queries.push(selector.to_string());
        let root = state.resolve(parent)?;
        let found = state.query(Some(root), selector)?;
        Ok(found.into_iter().map(|i| state.handle(i)).collect())
    }

    async fn text(&self, element: &ElementHandle) -> Result<String> {
        let mut state = self.guard()?;
        let idx = state.resolve(element)?;
        let window = state.window();
        let el = &window.page.elements[idx];
        let text = text_of(el);
        Ok(if text.is_empty() {
            window.values.get(&idx).cloned().unwrap_or_default()
        } else {
            text
        })
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        Ok(self.guard()?.element(element)?.attrs.get(name).cloned())
    }

    async fn tag_name(&self, element: &ElementHandle) -> Result<String> {
        Ok(self.guard()?.element(element)?.tag.to_lowercase())
    }

    async fn bounding_box(&self, element: &ElementHandle) -> Result<Option<BoundingBox>> {
        Ok(self.guard()?.element(element)?.bbox)
    }

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool> {
        Ok(self.guard()?.element(element)?.visible)
    }

    async fn is_enabled(&self, element: &ElementHandle) -> Result<bool> {
        let el = self.guard()?.element(element)?;
        Ok(el.enabled && !el.attrs.contains_key("disabled"))
    }

    async fn computed_style(
        &self,
        element: &ElementHandle,
        property: &str,
    ) -> Result<Option<String>> {
        let el = self.guard()?.element(element)?;
        Ok(match property {
            "font-weight" => Some(el.font_weight.unwrap_or_else(|| "400".to_string())),
            _ => None,
        })
    }

    async fn has_click_handler(&self, element: &ElementHandle) -> Result<bool> {
        let el = self.guard()?.element(element)?;
        Ok(el.handler
            || ["onclick", "ng-click", "data-action"]
                .iter()
                .any(|a| el.attrs.contains_key(*a)))
    }

    async fn label_text(&self, element: &ElementHandle) -> Result<String> {
        Ok(self.guard()?.element(element)?.label)
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        let mut state = self.guard()?;
        let idx = state.resolve(element)?;
        state.check_method("native")?;
        state.check_obscured(idx)?;
        state.activate(idx, "native");
        Ok(())
    }

    async fn script_click(&self, element: &ElementHandle) -> Result<()> {
        let mut state = self.guard()?;
        let idx = state.resolve(element)?;
        state.check_method("script")?;
        state.activate(idx, "script");
        Ok(())
    }

    async fn pointer_click(&self, element: &ElementHandle, _offset: (f64, f64)) -> Result<()> {
        let mut state = self.guard()?;
        let idx = state.resolve(element)?;
        state.check_method("pointer")?;
        state.check_obscured(idx)?;
        state.activate(idx, "pointer");
        Ok(())
    }

    async fn hide_obstructions(&self, element: &ElementHandle) -> Result<usize> {
        let mut state = self.guard()?;
        let idx = state.resolve(element)?;
        let obscured = state.window().page.elements[idx].obscured_by.is_some();
        let active = state.active;
        let window = &mut state.windows[active];
        if obscured && !window.cleared {
            window.cleared = true;
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn dispatch_events(
        &self,
        element: &ElementHandle,
        events: &[SyntheticEvent],
    ) -> Result<()> {
        let mut state = self.guard()?;
        let idx = state.resolve(element)?;
        state.check_method("synthetic")?;
        if events.contains(&SyntheticEvent::Click) {
            state.activate(idx, "synthetic");
        }
        Ok(())
    }

    async fn submit_ancestor_form(&self, element: &ElementHandle) -> Result<bool> {
        let mut state = self.guard()?;
        let idx = state.resolve(element)?;
        state.check_method("form_submit")?;
        let elements = &state.window().page.elements;
        let form = (0..elements.len())
            .find(|&f| elements[f].tag == "form" && is_descendant(elements, idx, f));
        match form {
            Some(_) => {
                state.activate(idx, "form_submit");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_value(&self, element: &ElementHandle, text: &str) -> Result<()> {
        let mut state = self.guard()?;
        let idx = state.resolve(element)?;
        let active = state.active;
        state.windows[active].values.insert(idx, text.to_string());
        Ok(())
    }

    async fn options(&self, element: &ElementHandle) -> Result<Vec<String>> {
        Ok(self.guard()?.element(element)?.options)
    }

    async fn select_by_text(&self, element: &ElementHandle, text: &str) -> Result<bool> {
        let mut state = self.guard()?;
        let idx = state.resolve(element)?;
        if !state.window().page.elements[idx]
            .options
            .iter()
            .any(|o| o == text)
        {
            return Ok(false);
        }
        let active = state.active;
        state.windows[active].values.insert(idx, text.to_string());
        Ok(true)
    }

    async fn set_file(&self, element: &ElementHandle, path: &str) -> Result<()> {
        let mut state = self.guard()?;
        let idx = state.resolve(element)?;
        if state.window().page.elements[idx].attrs.get("type").map(String::as_str) != Some("file") {
            return Err(DriverError::Other("not a file input".to_string()));
        }
        let active = state.active;
        state.windows[active].values.insert(idx, path.to_string());
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let state = self.guard()?;
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(state.window().page.url.as_bytes());
        Ok(png)
    }

    async fn window_handles(&self) -> Result<Vec<WindowHandle>> {
        Ok(self
            .guard()?
            .windows
            .iter()
            .map(|w| WindowHandle(w.id.clone()))
            .collect())
    }

    async fn active_window(&self) -> Result<Option<WindowHandle>> {
        Ok(Some(WindowHandle(self.guard()?.window().id.clone())))
    }

    async fn switch_to_window(&self, window: &WindowHandle) -> Result<()> {
        let mut state = self.guard()?;
        let idx = state
            .windows
            .iter()
            .position(|w| w.id == window.0)
            .ok_or_else(|| DriverError::Other(format!("no window {}", window.0)))?;
        state.active = idx;
        Ok(())
    }

    async fn close_window(&self) -> Result<()> {
        let mut state = self.guard()?;
        let active = state.active;
        state.windows.remove(active);
        if state.windows.is_empty() {
            state.next_window += 1;
            let id = format!("w{}", state.next_window);
            state.windows.push(Window {
                id,
                doc: 0,
                page: FakePage::new("about:blank", ""),
                values: HashMap::new(),
                cleared: false,
            });
        }
        state.active = 0;
        Ok(())
    }
}

/// Engine config for tests: in-memory patterns, no proofs.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        pattern_store_path: None,
        proof_dir: None,
        ..Default::default()
    }
}

pub fn test_profile() -> Profile {
    Profile {
        first_name: Some("Ada".to_string()),
        last_name: Some("Lovelace".to_string()),
        email: Some("a@b.com".to_string()),
        phone: Some("+44 20 7946 0958".to_string()),
        resume_path: Some(PathBuf::from("/home/ada/resume.pdf")),
        ..Default::default()
    }
}

/// Application page with a form (first name, email, resume, a hidden token)
/// and a "Submit application" button that triggers `submit`. A top-level
/// "Apply" link sits above the form.
pub fn application_page(url: &str, submit: ClickEffect) -> FakePage {
    let mut page = FakePage::new(
        url,
        "Senior Rust Engineer. Apply for this job. First name Email Resume",
    );
    page.add(
        el("a")
            .attr("href", "#apply")
            .attr("class", "btn")
            .text("Apply")
            .at(20.0, 20.0, 120.0, 40.0),
    );
    let form = page.add(el("form").attr("id", "application").at(0.0, 100.0, 600.0, 400.0));
    page.add_in(
        form,
        el("input")
            .attr("type", "text")
            .attr("id", "first_name")
            .attr("name", "first_name")
            .label("First name")
            .at(20.0, 120.0, 300.0, 30.0),
    );
    page.add_in(
        form,
        el("input")
            .attr("type", "email")
            .attr("id", "email")
            .attr("name", "email")
            .label("Email *")
            .at(20.0, 170.0, 300.0, 30.0),
    );
    page.add_in(
        form,
        el("input")
            .attr("type", "file")
            .attr("id", "resume")
            .attr("name", "resume")
            .label("Resume/CV")
            .at(20.0, 220.0, 300.0, 30.0),
    );
    page.add_in(
        form,
        el("input")
            .attr("type", "hidden")
            .attr("name", "csrf_token")
            .hidden(),
    );
    page.add_in(
        form,
        el("button")
            .attr("id", "submit-application")
            .attr("type", "submit")
            .text("Submit application")
            .at(20.0, 400.0, 180.0, 40.0)
            .on_click(submit),
    );
    page
}

pub fn thanks_page(url: &str) -> FakePage {
    FakePage::new(
        url,
        "Thank you for applying! Your application submitted successfully.",
    )
}
