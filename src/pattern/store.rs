use super::{AutomationPattern, PatternType};
use crate::analyzer::PageAnalysis;
use crate::driver::Locator;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Lowercased host of `url`, or `None` when it has no host.
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed.host_str().map(|h| h.to_lowercase())
}

/// Persisted shape of a pattern. Collection fields are JSON strings so the
/// record stays flat for downstream readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternRecord {
    pub domain: String,
    pub site_name: String,
    pub pattern_type: PatternType,
    pub selectors: String,
    pub steps: String,
    pub success_indicators: String,
    pub failure_indicators: String,
    pub confidence_score: f64,
    pub usage_count: u32,
    pub success_rate: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PatternRecord {
    pub fn from_pattern(pattern: &AutomationPattern) -> Result<Self> {
        Ok(Self {
            domain: pattern.domain.clone(),
            site_name: pattern.site_name.clone(),
            pattern_type: pattern.pattern_type,
            selectors: serde_json::to_string(&pattern.field_selectors)?,
            steps: serde_json::to_string(&pattern.steps)?,
            success_indicators: serde_json::to_string(&pattern.success_indicators)?,
            failure_indicators: serde_json::to_string(&pattern.failure_indicators)?,
            confidence_score: pattern.confidence_score,
            usage_count: pattern.usage_count,
            success_rate: pattern.success_rate,
            created_at: pattern.created_at,
            updated_at: pattern.updated_at,
        })
    }

    pub fn into_pattern(self) -> Result<AutomationPattern> {
        Ok(AutomationPattern {
            field_selectors: serde_json::from_str(&self.selectors)
                .with_context(|| format!("Bad selectors for {}", self.domain))?,
            steps: serde_json::from_str(&self.steps)
                .with_context(|| format!("Bad steps for {}", self.domain))?,
            success_indicators: serde_json::from_str(&self.success_indicators)
                .with_context(|| format!("Bad success indicators for {}", self.domain))?,
            failure_indicators: serde_json::from_str(&self.failure_indicators)
                .with_context(|| format!("Bad failure indicators for {}", self.domain))?,
            domain: self.domain,
            site_name: self.site_name,
            pattern_type: self.pattern_type,
            confidence_score: self.confidence_score,
            usage_count: self.usage_count,
            success_rate: self.success_rate,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Domain-keyed pattern repository.
///
/// Constructed explicitly and passed by reference; there is no global cache.
/// One pattern per domain key, last writer wins.
#[derive(Debug, Default)]
pub struct PatternStore {
    patterns: HashMap<String, AutomationPattern>,
    path: Option<PathBuf>,
}

impl PatternStore {
    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`; a missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut patterns = HashMap::new();
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read pattern store {}", path.display()))?;
            let records: Vec<PatternRecord> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse pattern store {}", path.display()))?;
            for record in records {
                let pattern = record.into_pattern()?;
                patterns.insert(pattern.domain.clone(), pattern);
            }
            info!(
                "Loaded {} pattern(s) from {}",
                patterns.len(),
                path.display()
            );
        }
        Ok(Self {
            patterns,
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Patterns sorted by domain.
    pub fn patterns(&self) -> Vec<&AutomationPattern> {
        let mut all: Vec<_> = self.patterns.values().collect();
        all.sort_by(|a, b| a.domain.cmp(&b.domain));
        all
    }

    /// Exact domain first, then each parent obtained by stripping the
    /// left-most label, down to the last label.
    pub fn lookup(&self, domain: &str) -> Option<&AutomationPattern> {
        self.lookup_key(domain)
            .and_then(|key| self.patterns.get(&key))
    }

    /// The key `lookup` would resolve `domain` to.
    pub fn lookup_key(&self, domain: &str) -> Option<String> {
        let domain = domain.trim().trim_end_matches('.').to_lowercase();
        let mut candidate = domain.as_str();
        loop {
            if self.patterns.contains_key(candidate) {
                return Some(candidate.to_string());
            }
            match candidate.split_once('.') {
                Some((_, parent)) if !parent.is_empty() => candidate = parent,
                _ => return None,
            }
        }
    }

    /// `lookup` on the host of `url`.
    pub fn lookup_url(&self, url: &str) -> Option<&AutomationPattern> {
        domain_of(url).and_then(|d| self.lookup(&d))
    }

    pub fn get(&self, domain: &str) -> Option<&AutomationPattern> {
        self.patterns.get(domain)
    }

    pub fn get_mut(&mut self, domain: &str) -> Option<&mut AutomationPattern> {
        self.patterns.get_mut(domain)
    }

    /// Insert or overwrite by domain key.
    pub fn upsert(&mut self, pattern: AutomationPattern) {
        debug!("Upserting pattern for {}", pattern.domain);
        self.patterns.insert(pattern.domain.clone(), pattern);
    }

    /// Apply the outcome to the pattern stored under `domain`.
    /// Returns `false` when no such pattern exists.
    pub fn record_outcome(&mut self, domain: &str, success: bool) -> bool {
        match self.patterns.get_mut(domain) {
            Some(pattern) => {
                pattern.record_outcome(success);
                debug!(
                    "Pattern {}: usage {} success rate {:.2} confidence {:.2}",
                    domain, pattern.usage_count, pattern.success_rate, pattern.confidence_score
                );
                true
            }
            None => false,
        }
    }

    /// Build a pattern from an analysis without storing it.
    pub fn create_from_analysis(
        &self,
        url: &str,
        analysis: &PageAnalysis,
        submit: &Locator,
    ) -> AutomationPattern {
        AutomationPattern::from_analysis(url, analysis, submit)
    }

    /// Write every pattern to the backing file. No-op for in-memory stores.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let records = self
            .patterns()
            .into_iter()
            .map(PatternRecord::from_pattern)
            .collect::<Result<Vec<_>>>()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(&records)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        debug!("Flushed {} pattern(s) to {}", records.len(), path.display());
        Ok(())
    }
}
