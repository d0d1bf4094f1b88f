//! Multi-strategy discovery and ranking of actionable controls.
//!
//! Used when there is no stored pattern and no form to analyze: five
//! independent passes propose candidates, which are validated, de-duplicated
//! and ranked. An empty result is a valid answer.

mod vocabulary;

pub use vocabulary::Vocabulary;

use crate::driver::{AutomationDriver, BoundingBox, ElementHandle, Locator, Selector};
use crate::error::{AutomationError, DriverError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

const CLICKABLE: &str =
    "button, a, [role='button'], input[type='submit'], input[type='button']";
const CONTAINERS: &str = "[class*='job'], [class*='card'], [class*='listing'], \
     [class*='position'], [data-job], article";
const HANDLER_CANDIDATES: &str = "[onclick], [ng-click], [data-action], [role='button'], \
     div[tabindex], span[tabindex]";
const ATTRIBUTES: &[&str] = &[
    "class",
    "id",
    "data-action",
    "data-track",
    "data-event",
    "aria-label",
];

/// Plausible button envelope, in CSS pixels.
const MIN_WIDTH: f64 = 20.0;
const MAX_WIDTH: f64 = 600.0;
const MIN_HEIGHT: f64 = 10.0;
const MAX_HEIGHT: f64 = 150.0;
const MAX_TEXT_LEN: usize = 200;

/// Typical call-to-action size, earns the size-fit bonus.
const FIT_WIDTH: (f64, f64) = (80.0, 300.0);
const FIT_HEIGHT: (f64, f64) = (25.0, 60.0);

const PRIMARY_HIT: f64 = 10.0;
const SECONDARY_HIT: f64 = 5.0;
const SIZE_FIT_BONUS: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Text,
    Attribute,
    Visual,
    DomStructure,
    EventListener,
}

impl DetectionMethod {
    fn bonus(&self) -> f64 {
        match self {
            DetectionMethod::Text => 3.0,
            DetectionMethod::EventListener => 2.0,
            DetectionMethod::Attribute | DetectionMethod::DomStructure => 1.0,
            DetectionMethod::Visual => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub locator: Locator,
    pub text: String,
    pub bbox: Option<BoundingBox>,
    pub method: DetectionMethod,
    pub score: f64,
    /// Discovery order, used as the final tie-breaker.
    pub order: usize,
    pub visible: bool,
    pub enabled: bool,
    /// Extra points from style hints (visual pass only).
    #[serde(default)]
    pub style_bonus: f64,
}

impl Candidate {
    fn dedupe_key(&self) -> (String, i64, i64) {
        let text: String = self
            .text
            .trim()
            .to_lowercase()
            .chars()
            .take(15)
            .collect();
        let (x, y) = self
            .bbox
            .map(|b| (b.x.round() as i64, b.y.round() as i64))
            .unwrap_or((0, 0));
        (text, x, y)
    }
}

/// Visible, enabled, button-sized and with 1..=200 characters of text.
pub fn validate(candidate: &Candidate) -> bool {
    if !candidate.visible || !candidate.enabled {
        return false;
    }
    let Some(b) = candidate.bbox else {
        return false;
    };
    let len = candidate.text.trim().chars().count();
    (MIN_WIDTH..=MAX_WIDTH).contains(&b.width)
        && (MIN_HEIGHT..=MAX_HEIGHT).contains(&b.height)
        && (1..=MAX_TEXT_LEN).contains(&len)
}

/// Keep the first candidate per `(text[:15], x, y)`. Idempotent and order-preserving.
pub fn dedupe(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.dedupe_key()))
        .collect()
}

/// Score and sort, highest first; ties keep discovery order.
pub fn rank(mut candidates: Vec<Candidate>, vocabulary: &Vocabulary) -> Vec<Candidate> {
    for c in candidates.iter_mut() {
        c.score = score(c, vocabulary);
    }
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.order.cmp(&b.order)));
    candidates
}

fn score(candidate: &Candidate, vocabulary: &Vocabulary) -> f64 {
    let (primary, secondary) = vocabulary.hits(&candidate.text);
    let mut score = primary as f64 * PRIMARY_HIT + secondary as f64 * SECONDARY_HIT;
    if let Some(b) = candidate.bbox {
        if (FIT_WIDTH.0..=FIT_WIDTH.1).contains(&b.width)
            && (FIT_HEIGHT.0..=FIT_HEIGHT.1).contains(&b.height)
        {
            score += SIZE_FIT_BONUS;
        }
    }
    score + candidate.method.bonus() + candidate.style_bonus
}

pub struct CandidateLocator {
    driver: Arc<dyn AutomationDriver>,
    vocabulary: Vocabulary,
}

impl CandidateLocator {
    pub fn new(driver: Arc<dyn AutomationDriver>) -> Self {
        Self::with_vocabulary(driver, Vocabulary::default())
    }

    pub fn with_vocabulary(driver: Arc<dyn AutomationDriver>, vocabulary: Vocabulary) -> Self {
        Self { driver, vocabulary }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Validated, de-duplicated, ranked candidates under `root` (whole page if `None`).
    pub async fn locate(
        &self,
        root: Option<&ElementHandle>,
    ) -> Result<Vec<Candidate>, AutomationError> {
        let discovered = self.discover(root).await?;
        let total = discovered.len();
        let valid: Vec<_> = discovered.into_iter().filter(validate).collect();
        let ranked = rank(dedupe(valid), &self.vocabulary);
        info!(
            "Candidate search: {} discovered, {} after validation and dedupe",
            total,
            ranked.len()
        );
        Ok(ranked)
    }

    /// Best candidate, if any.
    pub async fn find_best(
        &self,
        root: Option<&ElementHandle>,
    ) -> Result<Option<Candidate>, AutomationError> {
        Ok(self.locate(root).await?.into_iter().next())
    }

    /// Run all five passes. A pass that fails with a non-fatal error is skipped.
    pub async fn discover(
        &self,
        root: Option<&ElementHandle>,
    ) -> Result<Vec<Candidate>, AutomationError> {
        let mut out = Vec::new();
        for method in [
            DetectionMethod::Text,
            DetectionMethod::Attribute,
            DetectionMethod::Visual,
            DetectionMethod::DomStructure,
            DetectionMethod::EventListener,
        ] {
            let before = out.len();
            let result = match method {
                DetectionMethod::Text => self.text_pass(root, &mut out).await,
                DetectionMethod::Attribute => self.attribute_pass(root, &mut out).await,
                DetectionMethod::Visual => self.visual_pass(root, &mut out).await,
                DetectionMethod::DomStructure => self.structure_pass(root, &mut out).await,
                DetectionMethod::EventListener => self.listener_pass(root, &mut out).await,
            };
            match result {
                Ok(()) => debug!("{:?} pass: {} candidate(s)", method, out.len() - before),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => warn!("{:?} pass failed: {}", method, e),
            }
        }
        Ok(out)
    }

    async fn query(
        &self,
        root: Option<&ElementHandle>,
        selector: &Selector,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        match root {
            Some(parent) => self.driver.query_within(parent, selector).await,
            None => self.driver.query_all(selector).await,
        }
    }

    /// Describe `handle` as a candidate; `None` if it went stale.
    async fn candidate(
        &self,
        handle: &ElementHandle,
        method: DetectionMethod,
        order: usize,
    ) -> Result<Option<Candidate>, DriverError> {
        let snapshot = match self.driver.describe(handle).await {
            Ok(s) => s,
            Err(DriverError::StaleHandle(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(Candidate {
            locator: Locator::from_snapshot(&snapshot),
            text: snapshot.display_text(),
            bbox: snapshot.bbox,
            method,
            score: 0.0,
            order,
            visible: snapshot.visible,
            enabled: snapshot.enabled,
            style_bonus: 0.0,
        }))
    }

    async fn text_pass(
        &self,
        root: Option<&ElementHandle>,
        out: &mut Vec<Candidate>,
    ) -> Result<(), DriverError> {
        for phrase in self.vocabulary.all() {
            for handle in self.query(root, &Selector::text(phrase)).await? {
                if let Some(c) = self.candidate(&handle, DetectionMethod::Text, out.len()).await? {
                    out.push(c);
                }
            }
        }
        Ok(())
    }

    async fn attribute_pass(
        &self,
        root: Option<&ElementHandle>,
        out: &mut Vec<Candidate>,
    ) -> Result<(), DriverError> {
        let selector = self.attribute_selector();
        for handle in self.query(root, &Selector::css(selector)).await? {
            if let Some(c) = self
                .candidate(&handle, DetectionMethod::Attribute, out.len())
                .await?
            {
                out.push(c);
            }
        }
        Ok(())
    }

    fn attribute_selector(&self) -> String {
        let mut parts = Vec::new();
        for token in self.vocabulary.attribute_tokens() {
            for attr in ATTRIBUTES {
                parts.push(format!("[{}*='{}']", attr, token));
            }
        }
        parts.join(", ")
    }

    async fn visual_pass(
        &self,
        root: Option<&ElementHandle>,
        out: &mut Vec<Candidate>,
    ) -> Result<(), DriverError> {
        for handle in self.query(root, &Selector::css(CLICKABLE)).await? {
            let Some(mut c) = self.candidate(&handle, DetectionMethod::Visual, out.len()).await?
            else {
                continue;
            };
            if !self.vocabulary.matches(&c.text) {
                continue;
            }
            if let Some(weight) = self.driver.computed_style(&handle, "font-weight").await? {
                let bold = weight == "bold"
                    || weight == "bolder"
                    || weight.parse::<u32>().is_ok_and(|w| w >= 600);
                if bold {
                    c.style_bonus += 1.0;
                }
            }
            out.push(c);
        }
        Ok(())
    }

    async fn structure_pass(
        &self,
        root: Option<&ElementHandle>,
        out: &mut Vec<Candidate>,
    ) -> Result<(), DriverError> {
        for container in self.query(root, &Selector::css(CONTAINERS)).await? {
            let inner = match self
                .driver
                .query_within(&container, &Selector::css(CLICKABLE))
                .await
            {
                Ok(inner) => inner,
                Err(DriverError::StaleHandle(_)) => continue,
                Err(e) => return Err(e),
            };
            for handle in inner {
                if let Some(c) = self
                    .candidate(&handle, DetectionMethod::DomStructure, out.len())
                    .await?
                {
                    if self.vocabulary.matches(&c.text) {
                        out.push(c);
                    }
                }
            }
        }
        Ok(())
    }

    async fn listener_pass(
        &self,
        root: Option<&ElementHandle>,
        out: &mut Vec<Candidate>,
    ) -> Result<(), DriverError> {
        for handle in self.query(root, &Selector::css(HANDLER_CANDIDATES)).await? {
            match self.driver.has_click_handler(&handle).await {
                Ok(true) => {}
                Ok(false) | Err(DriverError::StaleHandle(_)) => continue,
                Err(e) => return Err(e),
            }
            if let Some(c) = self
                .candidate(&handle, DetectionMethod::EventListener, out.len())
                .await?
            {
                if self.vocabulary.matches(&c.text) {
                    out.push(c);
                }
            }
        }
        Ok(())
    }
}
