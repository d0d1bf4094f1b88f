//! Learned, per-domain automation recipes.

mod store;

pub use store::{domain_of, PatternRecord, PatternStore};

use crate::analyzer::{FieldPurpose, PageAnalysis};
use crate::driver::Locator;
use crate::outcome::{default_failure_indicators, default_success_indicators};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Initial confidence of a freshly learned pattern.
pub const INITIAL_CONFIDENCE: f64 = 0.7;

/// Outcomes needed before confidence follows the observed success rate.
pub const CONFIDENCE_BLEND_MIN_USAGE: u32 = 5;

/// Settle delay after the submit click of a learned pattern.
pub const SUBMIT_WAIT_MS: u64 = 3000;

/// Key of the submit control in `field_selectors`.
pub const SUBMIT_KEY: &str = "submit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    FormFill,
    Sso,
    Redirect,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Fill,
    Click,
    Wait,
}

/// Where a fill step takes its value from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "value", rename_all = "snake_case")]
pub enum ValueSource {
    Profile(FieldPurpose),
    Literal(String),
    Unset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub action: StepAction,
    pub locator: Locator,
    pub value_source: ValueSource,
    #[serde(default)]
    pub wait_after_ms: u64,
}

impl Step {
    pub fn fill(locator: Locator, value_source: ValueSource) -> Self {
        Self {
            action: StepAction::Fill,
            locator,
            value_source,
            wait_after_ms: 0,
        }
    }

    pub fn click(locator: Locator, wait_after_ms: u64) -> Self {
        Self {
            action: StepAction::Click,
            locator,
            value_source: ValueSource::Unset,
            wait_after_ms,
        }
    }
}

/// A reusable recipe keyed by domain.
///
/// `confidence_score` and `success_rate` only change through
/// [`record_outcome`](AutomationPattern::record_outcome).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationPattern {
    pub domain: String,
    pub site_name: String,
    pub pattern_type: PatternType,
    pub field_selectors: BTreeMap<String, Locator>,
    pub steps: Vec<Step>,
    pub success_indicators: BTreeSet<String>,
    pub failure_indicators: BTreeSet<String>,
    pub confidence_score: f64,
    pub usage_count: u32,
    pub success_rate: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutomationPattern {
    /// Synthesize a pattern from a successful analysis.
    ///
    /// Type is `sso` when SSO options exist, else `redirect` when there is no
    /// form but an external target, else `form_fill`. Fill steps are ordered
    /// required first, then top-to-bottom, then left-to-right, and are
    /// followed by exactly one click on `submit`.
    pub fn from_analysis(url: &str, analysis: &PageAnalysis, submit: &Locator) -> Self {
        let domain = domain_of(url).unwrap_or_else(|| url.to_lowercase());
        let pattern_type = if !analysis.sso_options.is_empty() {
            PatternType::Sso
        } else if analysis.forms.is_empty()
            && analysis.fields.is_empty()
            && !analysis.external_targets.is_empty()
        {
            PatternType::Redirect
        } else {
            PatternType::FormFill
        };

        let mut fields: Vec<_> = analysis.fields.iter().collect();
        fields.sort_by(|a, b| {
            let pos = |f: &crate::analyzer::FieldDescriptor| {
                f.bbox.map(|b| (b.y, b.x)).unwrap_or((f64::MAX, f64::MAX))
            };
            let (ay, ax) = pos(a);
            let (by, bx) = pos(b);
            b.required
                .cmp(&a.required)
                .then(ay.total_cmp(&by))
                .then(ax.total_cmp(&bx))
        });

        let mut field_selectors = BTreeMap::new();
        let mut steps = Vec::with_capacity(fields.len() + 1);
        for field in fields {
            field_selectors.insert(field.name.clone(), field.locator.clone());
            let source = match field.purpose {
                FieldPurpose::Other => ValueSource::Unset,
                purpose => ValueSource::Profile(purpose),
            };
            steps.push(Step::fill(field.locator.clone(), source));
        }
        field_selectors.insert(SUBMIT_KEY.to_string(), submit.clone());
        steps.push(Step::click(submit.clone(), SUBMIT_WAIT_MS));

        let now = Utc::now();
        Self {
            site_name: domain.trim_start_matches("www.").to_string(),
            domain,
            pattern_type,
            field_selectors,
            steps,
            success_indicators: default_success_indicators(),
            failure_indicators: default_failure_indicators(),
            confidence_score: INITIAL_CONFIDENCE,
            usage_count: 0,
            success_rate: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold one observed outcome into the running statistics.
    pub fn record_outcome(&mut self, success: bool) {
        self.usage_count += 1;
        let n = f64::from(self.usage_count);
        let hit = if success { 1.0 } else { 0.0 };
        self.success_rate = ((self.success_rate * (n - 1.0) + hit) / n).clamp(0.0, 1.0);
        if self.usage_count >= CONFIDENCE_BLEND_MIN_USAGE {
            self.confidence_score =
                (0.3 * self.confidence_score + 0.7 * self.success_rate).clamp(0.0, 1.0);
        }
        self.updated_at = Utc::now();
    }

    /// Take the recipe of `learned` while keeping identity and statistics.
    pub fn replace_recipe(&mut self, learned: AutomationPattern) {
        self.pattern_type = learned.pattern_type;
        self.field_selectors = learned.field_selectors;
        self.steps = learned.steps;
        self.updated_at = Utc::now();
    }

    pub fn click_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.action == StepAction::Click)
    }

    pub fn fill_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.action == StepAction::Fill)
    }
}
