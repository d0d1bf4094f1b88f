//! Executes planned steps against the live page.
//!
//! Every operation starts by re-acquiring a fresh handle from an immutable
//! [`Locator`]; handles are never kept between steps.

mod click;

pub use click::ClickMethod;

use crate::analyzer::FieldPurpose;
use crate::config::EngineConfig;
use crate::driver::{AutomationDriver, ElementHandle, Locator, Selector};
use crate::error::{AutomationError, DriverError};
use crate::pattern::{AutomationPattern, Step, StepAction, ValueSource};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A value delivered into a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    /// Local file for a file-type control.
    File(PathBuf),
}

/// Caller-side source of field values. The engine never generates them.
pub trait ValueProvider: Send + Sync {
    fn pull_value(&self, purpose: FieldPurpose) -> Option<FieldValue>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Filled,
    Skipped { reason: String },
    Clicked { method: ClickMethod },
    Waited,
}

pub struct InteractionExecutor {
    driver: Arc<dyn AutomationDriver>,
    values: Arc<dyn ValueProvider>,
    reacquire_radius: f64,
}

impl InteractionExecutor {
    pub fn new(
        driver: Arc<dyn AutomationDriver>,
        values: Arc<dyn ValueProvider>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            driver,
            values,
            reacquire_radius: config.reacquire_radius_px,
        }
    }

    /// Query that treats non-fatal driver errors as "no match".
    async fn try_query(&self, selector: &Selector) -> Result<Vec<ElementHandle>, AutomationError> {
        match self.driver.query_all(selector).await {
            Ok(handles) => Ok(handles),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                debug!("Query {} failed: {}", selector, e);
                Ok(Vec::new())
            }
        }
    }

    /// Among `handles`, the one whose top-left corner is nearest `position`
    /// and within `radius`. `radius: None` accepts any distance.
    async fn nearest(
        &self,
        handles: Vec<ElementHandle>,
        position: (f64, f64),
        radius: Option<f64>,
    ) -> Result<Option<ElementHandle>, AutomationError> {
        let mut best: Option<(f64, ElementHandle)> = None;
        for handle in handles {
            let bbox = match self.driver.bounding_box(&handle).await {
                Ok(Some(b)) => b,
                Ok(None) | Err(DriverError::StaleHandle(_)) => continue,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(_) => continue,
            };
            let (dx, dy) = (bbox.x - position.0, bbox.y - position.1);
            let distance = (dx * dx + dy * dy).sqrt();
            if radius.is_some_and(|r| distance > r) {
                continue;
            }
            if best.as_ref().map_or(true, |(d, _)| distance < *d) {
                best = Some((distance, handle));
            }
        }
        Ok(best.map(|(_, h)| h))
    }

    /// Fresh handle for `locator`: selector, then element id, then text near
    /// the recorded position.
    pub async fn reacquire(&self, locator: &Locator) -> Result<ElementHandle, AutomationError> {
        let mut matches = self.try_query(&locator.selector).await?;
        if !matches.is_empty() {
            if let (true, Some(pos)) = (matches.len() > 1, locator.position) {
                if let Some(handle) = self.nearest(matches.clone(), pos, None).await? {
                    return Ok(handle);
                }
            }
            return Ok(matches.swap_remove(0));
        }

        if let Some(id) = locator.element_id.as_deref() {
            let by_id = Selector::css(format!("[id={}]", crate::driver::css_attr_value(id)));
            if let Some(handle) = self.try_query(&by_id).await?.into_iter().next() {
                debug!("Re-acquired {} by id", locator);
                return Ok(handle);
            }
        }

        if let Some(text) = locator.text.as_deref() {
            let by_text = self.try_query(&Selector::text(text)).await?;
            let found = match locator.position {
                Some(pos) => self.nearest(by_text, pos, Some(self.reacquire_radius)).await?,
                None => by_text.into_iter().next(),
            };
            if let Some(handle) = found {
                debug!("Re-acquired {} by text", locator);
                return Ok(handle);
            }
        }

        Err(AutomationError::ElementNotFound(locator.to_string()))
    }

    /// Deliver `value` into the field at `locator`.
    pub async fn fill(&self, locator: &Locator, value: &FieldValue) -> Result<(), AutomationError> {
        let handle = self.reacquire(locator).await?;
        match self.fill_handle(&handle, value).await {
            Err(DriverError::StaleHandle(_)) => {
                debug!("Handle for {} went stale, retrying once", locator);
                let handle = self.reacquire(locator).await?;
                Ok(self.fill_handle(&handle, value).await?)
            }
            other => Ok(other?),
        }
    }

    async fn fill_handle(&self, handle: &ElementHandle, value: &FieldValue) -> Result<(), DriverError> {
        let tag = self.driver.tag_name(handle).await?;
        let input_type = self
            .driver
            .attribute(handle, "type")
            .await?
            .map(|t| t.to_lowercase());

        if tag == "select" {
            let FieldValue::Text(text) = value else {
                return Err(DriverError::Other("file value for a selection control".to_string()));
            };
            return self.select_option(handle, text).await;
        }

        match (input_type.as_deref(), value) {
            (Some("file"), FieldValue::File(path)) => {
                self.driver.set_file(handle, &path.to_string_lossy()).await
            }
            (Some("file"), FieldValue::Text(path)) => self.driver.set_file(handle, path).await,
            (_, FieldValue::Text(text)) => self.driver.set_value(handle, text).await,
            (_, FieldValue::File(path)) => Err(DriverError::Other(format!(
                "file {} given for a non-file field",
                path.display()
            ))),
        }
    }

    /// Exact visible text first, then case-insensitive substring.
    async fn select_option(&self, handle: &ElementHandle, text: &str) -> Result<(), DriverError> {
        if self.driver.select_by_text(handle, text).await? {
            return Ok(());
        }
        let needle = text.to_lowercase();
        let options = self.driver.options(handle).await?;
        if let Some(option) = options
            .iter()
            .find(|o| o.to_lowercase().contains(&needle))
        {
            if self.driver.select_by_text(handle, option).await? {
                return Ok(());
            }
        }
        Err(DriverError::ElementNotFound(format!("option matching '{}'", text)))
    }

    /// Run the click chain on `locator`. Returns the method that worked.
    pub async fn click(&self, locator: &Locator) -> Result<ClickMethod, AutomationError> {
        let mut handle = self.reacquire(locator).await?;
        let mut attempts = 0;
        for method in ClickMethod::CHAIN {
            attempts += 1;
            let mut result = click::attempt(self.driver.as_ref(), &handle, method).await;
            if matches!(result, Err(DriverError::StaleHandle(_))) {
                handle = self.reacquire(locator).await?;
                result = click::attempt(self.driver.as_ref(), &handle, method).await;
            }
            match result {
                Ok(true) => {
                    info!("Clicked {} via {:?}", locator, method);
                    return Ok(method);
                }
                Ok(false) => debug!("{:?} not applicable to {}", method, locator),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => debug!("{:?} click on {} failed: {}", method, locator, e),
            }
        }
        warn!("Click chain exhausted for {}", locator);
        Err(AutomationError::ClickChainExhausted {
            target: locator.to_string(),
            attempts,
        })
    }

    /// Run one step. Fill failures become `Skipped`; click failures propagate.
    pub async fn execute_step(&self, step: &Step) -> Result<StepOutcome, AutomationError> {
        match step.action {
            StepAction::Fill => {
                let value = match &step.value_source {
                    ValueSource::Profile(purpose) => self.values.pull_value(*purpose),
                    ValueSource::Literal(text) => Some(FieldValue::Text(text.clone())),
                    ValueSource::Unset => None,
                };
                let Some(value) = value else {
                    return Ok(StepOutcome::Skipped {
                        reason: format!("no value for {}", step.locator),
                    });
                };
                match self.fill(&step.locator, &value).await {
                    Ok(()) => {
                        debug!("Filled {}", step.locator);
                        self.settle(step.wait_after_ms).await;
                        Ok(StepOutcome::Filled)
                    }
                    Err(e) if e.is_fatal() => Err(e),
                    Err(e) => {
                        warn!("Skipping field {}: {}", step.locator, e);
                        Ok(StepOutcome::Skipped {
                            reason: e.to_string(),
                        })
                    }
                }
            }
            StepAction::Click => {
                let method = self.click(&step.locator).await?;
                self.settle(step.wait_after_ms).await;
                Ok(StepOutcome::Clicked { method })
            }
            StepAction::Wait => {
                self.settle(step.wait_after_ms).await;
                Ok(StepOutcome::Waited)
            }
        }
    }

    pub async fn execute_steps(&self, steps: &[Step]) -> Result<Vec<StepOutcome>, AutomationError> {
        let mut outcomes = Vec::with_capacity(steps.len());
        for step in steps {
            outcomes.push(self.execute_step(step).await?);
        }
        Ok(outcomes)
    }

    /// Check a stored pattern against the current page before replaying it.
    ///
    /// Stale when any click target is missing, or when the pattern has fill
    /// steps and none of them resolve.
    pub async fn validate_pattern(&self, pattern: &AutomationPattern) -> Result<(), AutomationError> {
        for step in pattern.click_steps() {
            match self.reacquire(&step.locator).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => {
                    return Err(AutomationError::PatternStale(format!(
                        "{}: click target {} not found",
                        pattern.domain, step.locator
                    )))
                }
            }
        }

        let mut fills = 0;
        let mut resolved = 0;
        for step in pattern.fill_steps() {
            fills += 1;
            match self.reacquire(&step.locator).await {
                Ok(_) => resolved += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => debug!("Fill target {} not found", step.locator),
            }
        }
        if fills > 0 && resolved == 0 {
            return Err(AutomationError::PatternStale(format!(
                "{}: none of {} fill targets found",
                pattern.domain, fills
            )));
        }
        Ok(())
    }

    async fn settle(&self, wait_ms: u64) {
        if wait_ms > 0 {
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
    }
}
