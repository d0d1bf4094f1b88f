//! Persistence of work items and outcome logs.

use super::{PriorityTier, WorkItem, WorkStatus};
use crate::outcome::ApplicationOutcome;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Which work items a query returns. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItemFilter {
    pub status: Option<WorkStatus>,
    pub tier: Option<PriorityTier>,
    /// Only items with fewer attempts than this.
    pub max_attempts: Option<u32>,
}

impl WorkItemFilter {
    pub fn matches(&self, item: &WorkItem) -> bool {
        self.status.map_or(true, |s| item.status == s)
            && self.tier.map_or(true, |t| item.priority_tier == t)
            && self.max_attempts.map_or(true, |m| item.attempt_count < m)
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace by `target_id`.
    async fn upsert_work_item(&self, item: &WorkItem) -> Result<()>;

    async fn append_outcome(&self, outcome: &ApplicationOutcome) -> Result<()>;

    async fn query_work_items(&self, filter: &WorkItemFilter) -> Result<Vec<WorkItem>>;

    /// Persist anything buffered.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Records {
    #[serde(default)]
    work_items: Vec<WorkItem>,
    #[serde(default)]
    outcomes: Vec<ApplicationOutcome>,
}

impl Records {
    fn upsert(&mut self, item: &WorkItem) {
        match self
            .work_items
            .iter_mut()
            .find(|i| i.target_id == item.target_id)
        {
            Some(existing) => *existing = item.clone(),
            None => self.work_items.push(item.clone()),
        }
    }

    fn query(&self, filter: &WorkItemFilter) -> Vec<WorkItem> {
        self.work_items
            .iter()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect()
    }
}

/// Records kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<Records>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn outcomes(&self) -> Vec<ApplicationOutcome> {
        self.records.lock().await.outcomes.clone()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert_work_item(&self, item: &WorkItem) -> Result<()> {
        self.records.lock().await.upsert(item);
        Ok(())
    }

    async fn append_outcome(&self, outcome: &ApplicationOutcome) -> Result<()> {
        self.records.lock().await.outcomes.push(outcome.clone());
        Ok(())
    }

    async fn query_work_items(&self, filter: &WorkItemFilter) -> Result<Vec<WorkItem>> {
        Ok(self.records.lock().await.query(filter))
    }
}

/// Records in one JSON file, rewritten after every change.
#[derive(Debug)]
pub struct JsonRecordStore {
    path: PathBuf,
    records: Mutex<Records>,
}

impl JsonRecordStore {
    /// Load `path`; a missing file starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read records {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse records {}", path.display()))?
        } else {
            Records::default()
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    async fn write(&self, records: &Records) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(records)?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write records {}", self.path.display()))
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn upsert_work_item(&self, item: &WorkItem) -> Result<()> {
        let mut records = self.records.lock().await;
        records.upsert(item);
        self.write(&records).await
    }

    async fn append_outcome(&self, outcome: &ApplicationOutcome) -> Result<()> {
        let mut records = self.records.lock().await;
        records.outcomes.push(outcome.clone());
        self.write(&records).await
    }

    async fn query_work_items(&self, filter: &WorkItemFilter) -> Result<Vec<WorkItem>> {
        Ok(self.records.lock().await.query(filter))
    }

    async fn flush(&self) -> Result<()> {
        let records = self.records.lock().await;
        self.write(&records).await
    }
}
