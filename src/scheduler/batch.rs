use super::{BatchSummary, ErrorReason, PriorityTier, RecordStore, WorkItem, WorkStatus};
use crate::analyzer::{FieldPurpose, PageAnalyzer};
use crate::config::EngineConfig;
use crate::driver::{load_page, AutomationDriver, Locator};
use crate::error::{AutomationError, ErrorKind};
use crate::executor::{InteractionExecutor, ValueProvider};
use crate::locator::CandidateLocator;
use crate::outcome::{
    default_failure_indicators, default_success_indicators, ApplicationOutcome, Observation,
    OutcomeClassifier, ResultPageType,
};
use crate::pattern::{domain_of, AutomationPattern, PatternStore, Step, ValueSource};
use chrono::Utc;
use log::{debug, error, info, warn};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Limits of one run; whichever binds first stops it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunBudget {
    pub time: Duration,
    pub max_count: usize,
}

impl RunBudget {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            time: config.time_budget(),
            max_count: config.max_applications,
        }
    }
}

/// Processes one work item at a time against one driver session.
pub struct BatchScheduler {
    driver: Arc<dyn AutomationDriver>,
    analyzer: PageAnalyzer,
    locator: CandidateLocator,
    executor: InteractionExecutor,
    classifier: OutcomeClassifier,
    records: Arc<dyn RecordStore>,
    config: EngineConfig,
    stop: Arc<AtomicBool>,
}

impl BatchScheduler {
    pub fn new(
        driver: Arc<dyn AutomationDriver>,
        values: Arc<dyn ValueProvider>,
        records: Arc<dyn RecordStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            analyzer: PageAnalyzer::new(driver.clone(), &config),
            locator: CandidateLocator::new(driver.clone()),
            executor: InteractionExecutor::new(driver.clone(), values, &config),
            classifier: OutcomeClassifier::new(driver.clone(), config.proof_dir.clone()),
            driver,
            records,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting this flag stops the run at the next target boundary.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run targets high tier first, simpler first within a tier, then in
    /// arrival order, until the budget, the stop flag or a fatal error ends it.
    pub async fn run(
        &self,
        targets: Vec<WorkItem>,
        store: &mut PatternStore,
        budget: RunBudget,
    ) -> BatchSummary {
        let started = Instant::now();
        let deadline = started + budget.time;
        let mut summary = BatchSummary::default();

        let mut items = targets;
        for item in items.iter_mut() {
            item.priority_tier =
                PriorityTier::from_confidence(item.confidence, self.config.min_confidence_threshold);
        }
        let mut order: Vec<usize> = (0..items.len()).collect();
        order.sort_by(|&a, &b| {
            let (ia, ib) = (&items[a], &items[b]);
            ia.priority_tier.cmp(&ib.priority_tier).then(
                ia.complexity
                    .unwrap_or(0.0)
                    .total_cmp(&ib.complexity.unwrap_or(0.0)),
            )
        });
        info!(
            "Batch of {} target(s), budget {}s / {} target(s)",
            items.len(),
            budget.time.as_secs(),
            budget.max_count
        );

        for idx in order {
            if self.stop.load(Ordering::SeqCst) {
                info!("Stop requested, ending batch");
                break;
            }
            if Instant::now() >= deadline {
                info!("Time budget exhausted");
                break;
            }
            if summary.attempted >= budget.max_count {
                info!("Reached {} target(s), ending batch", budget.max_count);
                break;
            }

            let item = &mut items[idx];
            if item.status == WorkStatus::Applied
                || item.attempt_count >= self.config.max_attempts_per_target
            {
                debug!("Skipping {} ({:?})", item.target_id, item.status);
                summary.skipped += 1;
                continue;
            }

            if summary.attempted > 0 {
                self.jitter().await;
                if self.stop.load(Ordering::SeqCst) || Instant::now() >= deadline {
                    break;
                }
            }

            summary.attempted += 1;
            info!("[{}] {} ({:?})", item.target_id, item.url, item.priority_tier);
            let result = self.process(item, store, deadline, &mut summary).await;

            let fatal = match result {
                Ok(outcome) => {
                    if outcome.success {
                        item.status = WorkStatus::Applied;
                        summary.successful += 1;
                    } else {
                        item.status = WorkStatus::Failed;
                        summary.failed += 1;
                    }
                    if let Err(e) = self.records.append_outcome(&outcome).await {
                        warn!("Failed to record outcome for {}: {}", item.target_id, e);
                    }
                    summary.outcomes.push(outcome);
                    false
                }
                Err(e) => {
                    item.status = WorkStatus::Failed;
                    summary.failed += 1;
                    summary.errors.push(reason(&item.target_id, &e));
                    if e.is_fatal() {
                        error!("Driver unavailable, aborting batch: {}", e);
                        summary.aborted = true;
                        true
                    } else {
                        warn!("[{}] failed: {}", item.target_id, e);
                        false
                    }
                }
            };

            if let Err(e) = self.records.upsert_work_item(item).await {
                warn!("Failed to record work item {}: {}", item.target_id, e);
            }
            if let Err(e) = store.flush().await {
                warn!("Failed to persist patterns: {}", e);
            }
            if fatal {
                break;
            }
        }

        if let Err(e) = self.records.flush().await {
            warn!("Failed to flush records: {}", e);
        }
        summary.items = items;
        summary.finish(started.elapsed().as_secs_f64());
        info!(
            "Batch done: {} attempted, {} successful, {} failed, {} skipped{}",
            summary.attempted,
            summary.successful,
            summary.failed,
            summary.skipped,
            if summary.aborted { " (aborted)" } else { "" }
        );
        summary
    }

    async fn jitter(&self) {
        let (low, high) = jitter_bounds_ms(self.config.per_target_delay_seconds);
        let ms = rand::thread_rng().gen_range(low..=high);
        debug!("Waiting {}ms before next target", ms);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Attempt `item`, retrying retryable failures while attempts and time remain.
    async fn process(
        &self,
        item: &mut WorkItem,
        store: &mut PatternStore,
        deadline: Instant,
        summary: &mut BatchSummary,
    ) -> Result<ApplicationOutcome, AutomationError> {
        loop {
            item.attempt_count += 1;
            item.last_attempt_at = Some(Utc::now());
            match self.attempt(item, store, summary).await {
                Err(e)
                    if e.is_retryable()
                        && item.attempt_count < self.config.max_attempts_per_target
                        && Instant::now() < deadline =>
                {
                    warn!(
                        "[{}] attempt {} failed, retrying: {}",
                        item.target_id, item.attempt_count, e
                    );
                    summary.errors.push(reason(&item.target_id, &e));
                }
                other => return other,
            }
        }
    }

    /// Replay a confident pattern, else learn.
    async fn attempt(
        &self,
        item: &mut WorkItem,
        store: &mut PatternStore,
        summary: &mut BatchSummary,
    ) -> Result<ApplicationOutcome, AutomationError> {
        let domain = domain_of(&item.url);
        let replayable = domain
            .as_deref()
            .and_then(|d| store.lookup(d))
            .filter(|p| p.confidence_score >= self.config.replay_confidence_threshold)
            .cloned();

        if let Some(pattern) = replayable {
            info!(
                "[{}] replaying pattern for {} (confidence {:.2})",
                item.target_id, pattern.domain, pattern.confidence_score
            );
            // Load and validation failures say nothing about the recipe itself.
            self.open(&item.url).await?;
            match self.executor.validate_pattern(&pattern).await {
                Ok(()) => {
                    return match self.replay(item, &pattern).await {
                        Ok(observation) => {
                            store.record_outcome(&pattern.domain, observation.success);
                            summary.replayed += 1;
                            Ok(self.finish(item, observation, summary))
                        }
                        Err(e) => {
                            if !e.is_fatal() {
                                store.record_outcome(&pattern.domain, false);
                            }
                            Err(e)
                        }
                    };
                }
                Err(AutomationError::PatternStale(msg)) => {
                    warn!("[{}] pattern stale, relearning: {}", item.target_id, msg);
                    summary.errors.push(ErrorReason {
                        target_id: item.target_id.clone(),
                        kind: ErrorKind::PatternStale,
                        message: msg,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        self.learn(item, store, summary).await
    }

    /// Run a validated pattern's steps on the loaded page and classify the result.
    async fn replay(
        &self,
        item: &WorkItem,
        pattern: &AutomationPattern,
    ) -> Result<Observation, AutomationError> {
        let pre = self.driver.capture_state().await?;
        self.executor.execute_steps(&pattern.steps).await?;
        self.classifier
            .observe(
                &pre,
                &item.target_id,
                &pattern.success_indicators,
                &pattern.failure_indicators,
            )
            .await
    }

    async fn open(&self, url: &str) -> Result<(), AutomationError> {
        let loaded = load_page(
            self.driver.as_ref(),
            url,
            self.config.page_load_timeout(),
            self.config.load_poll_interval(),
        )
        .await?;
        if loaded {
            Ok(())
        } else {
            Err(AutomationError::NavigationTimeout(format!(
                "{} did not finish loading",
                url
            )))
        }
    }

    /// Analyze, fill, submit and classify. A success creates or refreshes
    /// the pattern for the target's exact domain; a failure leaves patterns alone.
    async fn learn(
        &self,
        item: &mut WorkItem,
        store: &mut PatternStore,
        summary: &mut BatchSummary,
    ) -> Result<ApplicationOutcome, AutomationError> {
        self.open(&item.url).await?;
        let analysis = self.analyzer.inspect(&item.url).await?;
        summary.analyses += 1;
        item.complexity = Some(analysis.complexity_score);

        let submit: Locator = match analysis.best_submit() {
            Some(control) => control.locator.clone(),
            None => {
                debug!("[{}] no submit control in analysis, searching", item.target_id);
                self.locator
                    .find_best(None)
                    .await?
                    .map(|c| c.locator)
                    .ok_or_else(|| {
                        AutomationError::ElementNotFound(format!(
                            "no submit control on {}",
                            item.url
                        ))
                    })?
            }
        };

        let fills: Vec<Step> = analysis
            .fields
            .iter()
            .filter(|f| f.visible && f.enabled && f.purpose != FieldPurpose::Other)
            .map(|f| Step::fill(f.locator.clone(), ValueSource::Profile(f.purpose)))
            .collect();

        let pre = self.driver.capture_state().await?;
        self.executor.execute_steps(&fills).await?;
        self.executor
            .execute_step(&Step::click(submit.clone(), self.config.settle_delay_ms))
            .await?;
        let observation = self
            .classifier
            .observe(
                &pre,
                &item.target_id,
                &default_success_indicators(),
                &default_failure_indicators(),
            )
            .await?;

        if observation.success {
            let learned = store.create_from_analysis(&item.url, &analysis, &submit);
            let key = learned.domain.clone();
            match store.get_mut(&key) {
                Some(existing) => {
                    info!("[{}] refreshing pattern for {}", item.target_id, key);
                    existing.replace_recipe(learned);
                }
                None => {
                    info!("[{}] learned pattern for {}", item.target_id, key);
                    store.upsert(learned);
                }
            }
            store.record_outcome(&key, true);
            summary.learned += 1;
        }

        Ok(self.finish(item, observation, summary))
    }

    fn finish(
        &self,
        item: &WorkItem,
        observation: Observation,
        summary: &mut BatchSummary,
    ) -> ApplicationOutcome {
        if observation.result_page_type == ResultPageType::Unknown {
            let err = AutomationError::ClassificationAmbiguous(observation.url.clone());
            summary.errors.push(reason(&item.target_id, &err));
        }
        ApplicationOutcome::from_observation(&item.target_id, observation)
    }
}

/// Jitter range in milliseconds; an inverted pair is read low to high.
fn jitter_bounds_ms([a, b]: [u64; 2]) -> (u64, u64) {
    (a.min(b).saturating_mul(1000), a.max(b).saturating_mul(1000))
}

fn reason(target_id: &str, err: &AutomationError) -> ErrorReason {
    ErrorReason {
        target_id: target_id.to_string(),
        kind: err.kind(),
        message: err.to_string(),
    }
}
