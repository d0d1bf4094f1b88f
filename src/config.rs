//! Engine configuration and the caller-supplied applicant profile.

use crate::analyzer::FieldPurpose;
use crate::executor::{FieldValue, ValueProvider};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the Chrome driver is launched or attached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub no_sandbox: bool,
    pub chrome_path: Option<String>,
    /// Attach to an already-running Chrome instead of launching one.
    pub debug_port: Option<u16>,
}

/// Batch and interaction tuning. Every field has a default, so an empty
/// JSON object is a valid config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub time_budget_minutes: u64,
    pub max_applications: usize,
    /// Lower bound of the high tier. The medium tier starts at 0.4.
    pub min_confidence_threshold: f64,
    /// Stored patterns at or above this confidence are replayed without analysis.
    pub replay_confidence_threshold: f64,
    pub per_target_delay_seconds: [u64; 2],
    pub max_attempts_per_target: u32,
    pub page_load_timeout_secs: u64,
    pub load_poll_interval_ms: u64,
    pub settle_delay_ms: u64,
    pub reacquire_radius_px: f64,
    pub pattern_store_path: Option<PathBuf>,
    pub proof_dir: Option<PathBuf>,
    pub browser: BrowserSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            time_budget_minutes: 60,
            max_applications: 100,
            min_confidence_threshold: 0.7,
            replay_confidence_threshold: 0.8,
            per_target_delay_seconds: [2, 5],
            max_attempts_per_target: 3,
            page_load_timeout_secs: 30,
            load_poll_interval_ms: 250,
            settle_delay_ms: 3000,
            reacquire_radius_px: 200.0,
            pattern_store_path: default_pattern_store_path(),
            proof_dir: None,
            browser: BrowserSettings::default(),
        }
    }
}

/// `<data dir>/autoapply/patterns.json`
pub fn default_pattern_store_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("autoapply").join("patterns.json"))
}

impl EngineConfig {
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let [low, high] = self.per_target_delay_seconds;
        if low > high {
            bail!("per_target_delay_seconds is inverted: [{}, {}]", low, high);
        }
        if self.max_attempts_per_target == 0 {
            bail!("max_attempts_per_target must be at least 1");
        }
        for (name, value) in [
            ("min_confidence_threshold", self.min_confidence_threshold),
            ("replay_confidence_threshold", self.replay_confidence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be within [0, 1], got {}", name, value);
            }
        }
        if self.reacquire_radius_px < 0.0 {
            bail!("reacquire_radius_px must not be negative");
        }
        Ok(())
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_minutes * 60)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn load_poll_interval(&self) -> Duration {
        Duration::from_millis(self.load_poll_interval_ms.max(1))
    }
}

/// Applicant values delivered into form fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub linkedin: Option<String>,
    pub github: Option<String>,
    pub website: Option<String>,
    pub resume_path: Option<PathBuf>,
    pub cover_letter_path: Option<PathBuf>,
}

impl Profile {
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read profile {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse profile {}", path.display()))
    }
}

impl ValueProvider for Profile {
    fn pull_value(&self, purpose: FieldPurpose) -> Option<FieldValue> {
        let text = |v: &Option<String>| v.clone().map(FieldValue::Text);
        let file = |v: &Option<PathBuf>| v.clone().map(FieldValue::File);
        match purpose {
            FieldPurpose::Email => text(&self.email),
            FieldPurpose::FirstName => text(&self.first_name),
            FieldPurpose::LastName => text(&self.last_name),
            FieldPurpose::Phone => text(&self.phone),
            FieldPurpose::Resume => file(&self.resume_path),
            FieldPurpose::CoverLetter => file(&self.cover_letter_path),
            FieldPurpose::Linkedin => text(&self.linkedin),
            FieldPurpose::Github => text(&self.github),
            FieldPurpose::Website => text(&self.website),
            FieldPurpose::Other => None,
        }
    }
}
