//! Page and form inspection.
//!
//! [`PageAnalyzer::analyze`] navigates to a URL, waits for the document to
//! finish loading and reports the fields, forms, SSO buttons and submit
//! controls it finds.

mod purpose;

pub use purpose::{
    detect_sso_provider, infer_purpose, is_submit_text, looks_required, FieldPurpose,
    SSO_PROVIDERS, SUBMIT_VERBS,
};

use crate::config::EngineConfig;
use crate::driver::{
    load_page, AutomationDriver, BoundingBox, ElementHandle, ElementSnapshot, Locator, Selector,
};
use crate::error::{AutomationError, DriverError};
use crate::pattern::domain_of;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const FIELD_SELECTOR: &str = "input, textarea, select";
const CLICKABLE_SELECTOR: &str =
    "button, a, input[type='submit'], input[type='button'], [role='button']";
const SKIPPED_INPUT_TYPES: &[&str] = &["hidden", "submit", "button", "image", "reset"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Email,
    Tel,
    Url,
    Textarea,
    Select,
    File,
    Checkbox,
    Radio,
}

impl FieldKind {
    pub fn from_element(tag: &str, input_type: Option<&str>) -> Self {
        match tag.to_lowercase().as_str() {
            "textarea" => FieldKind::Textarea,
            "select" => FieldKind::Select,
            _ => match input_type.map(str::to_lowercase).as_deref() {
                Some("email") => FieldKind::Email,
                Some("tel") => FieldKind::Tel,
                Some("url") => FieldKind::Url,
                Some("file") => FieldKind::File,
                Some("checkbox") => FieldKind::Checkbox,
                Some("radio") => FieldKind::Radio,
                _ => FieldKind::Text,
            },
        }
    }
}

/// One fillable field found during analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub purpose: FieldPurpose,
    pub kind: FieldKind,
    pub locator: Locator,
    pub required: bool,
    pub visible: bool,
    pub enabled: bool,
    pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDescriptor {
    pub locator: Locator,
    pub bbox: Option<BoundingBox>,
    pub field_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsoOption {
    pub provider: String,
    pub locator: Locator,
    pub text: String,
}

/// A control whose text names a submit action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitControl {
    pub locator: Locator,
    pub text: String,
    pub bbox: Option<BoundingBox>,
    /// Distance to the nearest form, 0 when inside one; `None` without forms.
    pub form_distance: Option<f64>,
    pub visible: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub url: String,
    pub fields: Vec<FieldDescriptor>,
    pub forms: Vec<FormDescriptor>,
    pub sso_options: Vec<SsoOption>,
    /// Ranked, closest to a form first.
    pub submit_candidates: Vec<SubmitControl>,
    /// Action links pointing at another host.
    pub external_targets: Vec<String>,
    pub complexity_score: f64,
}

impl PageAnalysis {
    pub fn has_sso(&self) -> bool {
        !self.sso_options.is_empty()
    }

    pub fn has_form(&self) -> bool {
        !self.forms.is_empty() || !self.fields.is_empty()
    }

    /// Best visible, enabled submit control.
    pub fn best_submit(&self) -> Option<&SubmitControl> {
        self.submit_candidates
            .iter()
            .find(|c| c.visible && c.enabled)
    }

    pub fn required_count(&self) -> usize {
        self.fields.iter().filter(|f| f.required).count()
    }

    pub fn file_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| f.kind == FieldKind::File)
            .count()
    }
}

/// `clamp(0, 1, 0.1*fields - 0.2*sso + 0.05*required + 0.15*files)`
pub fn complexity_score(fields: usize, has_sso: bool, required: usize, files: usize) -> f64 {
    let sso = if has_sso { 1.0 } else { 0.0 };
    (0.1 * fields as f64 - 0.2 * sso + 0.05 * required as f64 + 0.15 * files as f64)
        .clamp(0.0, 1.0)
}

pub struct PageAnalyzer {
    driver: Arc<dyn AutomationDriver>,
    load_timeout: Duration,
    poll_interval: Duration,
}

impl PageAnalyzer {
    pub fn new(driver: Arc<dyn AutomationDriver>, config: &EngineConfig) -> Self {
        Self {
            driver,
            load_timeout: config.page_load_timeout(),
            poll_interval: config.load_poll_interval(),
        }
    }

    /// Navigate to `url` and analyze the loaded page.
    ///
    /// A page that never reaches `complete` within the load timeout yields an
    /// empty analysis rather than an error.
    pub async fn analyze(&self, url: &str) -> Result<PageAnalysis, AutomationError> {
        info!("Analyzing {}", url);
        let loaded = load_page(
            self.driver.as_ref(),
            url,
            self.load_timeout,
            self.poll_interval,
        )
        .await?;
        if !loaded {
            warn!("{} did not finish loading, returning empty analysis", url);
            return Ok(PageAnalysis {
                url: url.to_string(),
                ..Default::default()
            });
        }
        self.inspect(url).await
    }

    /// Analyze the page currently loaded, without navigating.
    pub async fn inspect(&self, url: &str) -> Result<PageAnalysis, AutomationError> {
        let forms = self.collect_forms().await?;
        let fields = self.collect_fields().await?;

        let clickables = self.snapshots(&Selector::css(CLICKABLE_SELECTOR)).await?;
        let sso_options = detect_sso(&clickables);
        let submit_candidates = rank_submit_controls(&clickables, &forms);
        let external_targets = external_targets(url, &clickables);

        let has_sso = !sso_options.is_empty();
        let required = fields.iter().filter(|f| f.required).count();
        let files = fields.iter().filter(|f| f.kind == FieldKind::File).count();
        let complexity = complexity_score(fields.len(), has_sso, required, files);

        info!(
            "{}: {} field(s), {} form(s), {} submit candidate(s), sso: {}",
            url,
            fields.len(),
            forms.len(),
            submit_candidates.len(),
            has_sso
        );

        Ok(PageAnalysis {
            url: url.to_string(),
            fields,
            forms,
            sso_options,
            submit_candidates,
            external_targets,
            complexity_score: complexity,
        })
    }

    /// Describe every match of `selector`, dropping elements that went stale.
    async fn snapshots(
        &self,
        selector: &Selector,
    ) -> Result<Vec<(ElementHandle, ElementSnapshot)>, AutomationError> {
        let handles = self.driver.query_all(selector).await?;
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            match self.driver.describe(&handle).await {
                Ok(snapshot) => out.push((handle, snapshot)),
                Err(DriverError::StaleHandle(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(out)
    }

    async fn collect_forms(&self) -> Result<Vec<FormDescriptor>, AutomationError> {
        let mut forms = Vec::new();
        for (handle, snapshot) in self.snapshots(&Selector::css("form")).await? {
            let field_count = match self
                .driver
                .query_within(&handle, &Selector::css(FIELD_SELECTOR))
                .await
            {
                Ok(inner) => inner.len(),
                Err(DriverError::StaleHandle(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            forms.push(FormDescriptor {
                locator: Locator::from_snapshot(&snapshot),
                bbox: snapshot.bbox,
                field_count,
            });
        }
        Ok(forms)
    }

    async fn collect_fields(&self) -> Result<Vec<FieldDescriptor>, AutomationError> {
        let mut fields = Vec::new();
        let mut seen = HashSet::new();
        for (handle, snapshot) in self.snapshots(&Selector::css(FIELD_SELECTOR)).await? {
            let input_type = snapshot.input_type.as_deref().map(str::to_lowercase);
            if snapshot.tag == "input"
                && input_type
                    .as_deref()
                    .is_some_and(|t| SKIPPED_INPUT_TYPES.contains(&t))
            {
                continue;
            }
            let name = snapshot
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .or_else(|| snapshot.id.clone().filter(|i| !i.trim().is_empty()));
            let Some(name) = name else {
                continue;
            };
            if !seen.insert(name.clone()) {
                continue;
            }

            let label = match self.driver.label_text(&handle).await {
                Ok(label) => label,
                Err(DriverError::StaleHandle(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            let purpose = infer_purpose(
                snapshot.name.as_deref().unwrap_or(""),
                snapshot.id.as_deref().unwrap_or(""),
                snapshot.placeholder.as_deref().unwrap_or(""),
                &label,
            );
            let kind = FieldKind::from_element(&snapshot.tag, input_type.as_deref());
            debug!("Field {} ({:?}) -> {:?}", name, kind, purpose);

            fields.push(FieldDescriptor {
                name,
                purpose,
                kind,
                locator: Locator::from_snapshot(&snapshot),
                required: snapshot.required || looks_required(&label),
                visible: snapshot.visible,
                enabled: snapshot.enabled,
                bbox: snapshot.bbox,
            });
        }
        Ok(fields)
    }
}

/// One option per provider, first match wins.
fn detect_sso(clickables: &[(ElementHandle, ElementSnapshot)]) -> Vec<SsoOption> {
    let mut options: Vec<SsoOption> = Vec::new();
    for (_, snapshot) in clickables {
        if !snapshot.visible {
            continue;
        }
        let text = snapshot.display_text();
        let class = snapshot.class.as_deref().unwrap_or("");
        if let Some(provider) = detect_sso_provider(&text, class) {
            if options.iter().all(|o| o.provider != provider) {
                options.push(SsoOption {
                    provider: provider.to_string(),
                    locator: Locator::from_snapshot(snapshot),
                    text,
                });
            }
        }
    }
    options
}

/// Submit-verb controls ordered by distance to the nearest form, then document order.
fn rank_submit_controls(
    clickables: &[(ElementHandle, ElementSnapshot)],
    forms: &[FormDescriptor],
) -> Vec<SubmitControl> {
    let form_boxes: Vec<BoundingBox> = forms.iter().filter_map(|f| f.bbox).collect();
    let mut controls: Vec<SubmitControl> = clickables
        .iter()
        .filter_map(|(_, snapshot)| {
            let text = snapshot.display_text();
            if !is_submit_text(&text) {
                return None;
            }
            let form_distance = match (snapshot.bbox, form_boxes.is_empty()) {
                (_, true) => None,
                (Some(b), false) => form_boxes
                    .iter()
                    .map(|f| b.distance_to(f))
                    .min_by(|a, b| a.total_cmp(b)),
                (None, false) => Some(f64::MAX),
            };
            Some(SubmitControl {
                locator: Locator::from_snapshot(snapshot),
                text,
                bbox: snapshot.bbox,
                form_distance,
                visible: snapshot.visible,
                enabled: snapshot.enabled,
            })
        })
        .collect();
    // stable: equal distances keep document order
    controls.sort_by(|a, b| {
        let da = a.form_distance.unwrap_or(0.0);
        let db = b.form_distance.unwrap_or(0.0);
        da.total_cmp(&db)
    });
    controls
}

fn external_targets(page_url: &str, clickables: &[(ElementHandle, ElementSnapshot)]) -> Vec<String> {
    let page_host = domain_of(page_url);
    let mut targets = Vec::new();
    for (_, snapshot) in clickables {
        let Some(href) = snapshot.href.as_deref() else {
            continue;
        };
        if !is_submit_text(&snapshot.display_text()) {
            continue;
        }
        let Some(host) = domain_of(href) else {
            continue;
        };
        if page_host.as_deref() != Some(host.as_str()) && !targets.iter().any(|t| t == href) {
            targets.push(href.to_string());
        }
    }
    targets
}
