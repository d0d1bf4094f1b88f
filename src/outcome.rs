//! Labels what an interaction did and where it led.

use crate::driver::{AutomationDriver, PageState};
use crate::error::AutomationError;
use crate::pattern::domain_of;
use crate::proof::{capture_proof, ProofRecord};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionAction {
    NewWindow,
    Navigation,
    ModalOrInPlace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultPageType {
    ApplicationForm,
    ExternalBoard,
    SuccessPage,
    LoginRequired,
    Unknown,
}

/// Hosts of well-known job boards. Matched against the host and its parents.
pub const JOB_BOARD_DOMAINS: &[&str] = &[
    "linkedin.com",
    "indeed.com",
    "glassdoor.com",
    "ziprecruiter.com",
    "monster.com",
    "greenhouse.io",
    "lever.co",
    "myworkdayjobs.com",
    "smartrecruiters.com",
    "workable.com",
    "ashbyhq.com",
];

/// Weight of a job-board host match against page keyword hits.
const BOARD_DOMAIN_HITS: usize = 3;

const APPLICATION_FORM_KEYWORDS: &[&str] = &[
    "first name",
    "last name",
    "email",
    "phone",
    "resume",
    "upload",
    "cover letter",
    "submit application",
    "apply for this",
    "personal information",
];

const SUCCESS_KEYWORDS: &[&str] = &[
    "thank you",
    "thanks for applying",
    "application submitted",
    "application received",
    "successfully submitted",
    "we have received",
    "success",
];

const LOGIN_KEYWORDS: &[&str] = &[
    "sign in",
    "log in",
    "login",
    "create account",
    "sign up",
    "password",
];

/// `NewWindow` if a window appeared, `Navigation` if the URL changed,
/// otherwise `ModalOrInPlace`.
pub fn classify(pre: &PageState, post: &PageState) -> InteractionAction {
    if post.windows.iter().any(|w| !pre.windows.contains(w)) {
        InteractionAction::NewWindow
    } else if post.url != pre.url {
        InteractionAction::Navigation
    } else {
        InteractionAction::ModalOrInPlace
    }
}

fn count_hits(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| text.contains(*k)).count()
}

pub fn is_job_board(url: &str) -> bool {
    let Some(host) = domain_of(url) else {
        return false;
    };
    JOB_BOARD_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}

/// Highest keyword hit count wins; zero hits or a tie at the top is `Unknown`.
pub fn classify_result_page(url: &str, text: &str) -> ResultPageType {
    classify_result_page_with(url, text, &BTreeSet::new())
}

/// Like [`classify_result_page`], with a pattern's own success phrases
/// counted as success hits alongside the built-in ones.
pub fn classify_result_page_with(
    url: &str,
    text: &str,
    success_indicators: &BTreeSet<String>,
) -> ResultPageType {
    let lower = text.to_lowercase();
    let extra_success = success_indicators
        .iter()
        .map(|i| i.trim().to_lowercase())
        .filter(|i| !i.is_empty() && !SUCCESS_KEYWORDS.contains(&i.as_str()))
        .filter(|i| lower.contains(i.as_str()))
        .count();
    let scores = [
        (
            ResultPageType::ApplicationForm,
            count_hits(&lower, APPLICATION_FORM_KEYWORDS),
        ),
        (
            ResultPageType::ExternalBoard,
            if is_job_board(url) { BOARD_DOMAIN_HITS } else { 0 },
        ),
        (
            ResultPageType::SuccessPage,
            count_hits(&lower, SUCCESS_KEYWORDS) + extra_success,
        ),
        (ResultPageType::LoginRequired, count_hits(&lower, LOGIN_KEYWORDS)),
    ];
    let best = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
    if best == 0 {
        return ResultPageType::Unknown;
    }
    let mut leaders = scores.iter().filter(|(_, s)| *s == best);
    match (leaders.next(), leaders.next()) {
        (Some((page_type, _)), None) => *page_type,
        _ => ResultPageType::Unknown,
    }
}

/// Success verdict for an observed interaction.
///
/// A success page is a success. An application form counts when no failure
/// indicator is present. Reaching a job board through a new window or a
/// navigation is a hand-off and counts. Everything else, `Unknown`
/// included, is a failure.
pub fn verdict(
    action: InteractionAction,
    page_type: ResultPageType,
    text: &str,
    failure_indicators: &BTreeSet<String>,
) -> bool {
    match page_type {
        ResultPageType::SuccessPage => true,
        ResultPageType::ApplicationForm => {
            let lower = text.to_lowercase();
            !failure_indicators
                .iter()
                .any(|f| lower.contains(&f.to_lowercase()))
        }
        ResultPageType::ExternalBoard => action != InteractionAction::ModalOrInPlace,
        ResultPageType::LoginRequired | ResultPageType::Unknown => false,
    }
}

/// Success indicators a new pattern starts with.
pub fn default_success_indicators() -> BTreeSet<String> {
    ["success", "thank you", "application submitted"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Failure indicators used when no pattern supplies its own.
pub fn default_failure_indicators() -> BTreeSet<String> {
    ["error", "failed", "invalid"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// What the classifier saw after an interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub action: InteractionAction,
    pub result_page_type: ResultPageType,
    pub success: bool,
    pub url: String,
    pub proof: Option<ProofRecord>,
}

/// Final record of one attempt on a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationOutcome {
    pub work_item_id: String,
    pub success: bool,
    pub action: InteractionAction,
    pub result_page_type: ResultPageType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<ProofRecord>,
}

impl ApplicationOutcome {
    pub fn from_observation(work_item_id: &str, observation: Observation) -> Self {
        Self {
            work_item_id: work_item_id.to_string(),
            success: observation.success,
            action: observation.action,
            result_page_type: observation.result_page_type,
            timestamp: Utc::now(),
            proof: observation.proof,
        }
    }
}

pub struct OutcomeClassifier {
    driver: Arc<dyn AutomationDriver>,
    proof_dir: Option<PathBuf>,
}

impl OutcomeClassifier {
    pub fn new(driver: Arc<dyn AutomationDriver>, proof_dir: Option<PathBuf>) -> Self {
        Self { driver, proof_dir }
    }

    /// Compare against `pre`, read the resulting page and label it.
    ///
    /// A new window is inspected, closed, and focus returns to the window
    /// that was active before the interaction.
    pub async fn observe(
        &self,
        pre: &PageState,
        target_id: &str,
        success_indicators: &BTreeSet<String>,
        failure_indicators: &BTreeSet<String>,
    ) -> Result<Observation, AutomationError> {
        let post = self.driver.capture_state().await?;
        let action = classify(pre, &post);
        debug!("{}: interaction action {:?}", target_id, action);

        let (url, text, proof) = if action == InteractionAction::NewWindow {
            let opened = post
                .windows
                .iter()
                .find(|w| !pre.windows.contains(w))
                .cloned();
            let origin = pre.active_window.clone().or(post.active_window.clone());
            match opened {
                Some(window) => {
                    self.driver.switch_to_window(&window).await?;
                    let url = self.driver.current_url().await?;
                    let text = self.driver.page_text().await?;
                    let proof = self.proof(target_id).await?;
                    self.driver.close_window().await?;
                    if let Some(origin) = origin {
                        self.driver.switch_to_window(&origin).await?;
                    }
                    (url, text, proof)
                }
                None => (post.url.clone(), self.driver.page_text().await?, None),
            }
        } else {
            let text = self.driver.page_text().await?;
            let proof = self.proof(target_id).await?;
            (post.url.clone(), text, proof)
        };

        let result_page_type = classify_result_page_with(&url, &text, success_indicators);
        let success = verdict(action, result_page_type, &text, failure_indicators);
        info!(
            "{}: {:?} -> {:?} at {} (success: {})",
            target_id, action, result_page_type, url, success
        );
        Ok(Observation {
            action,
            result_page_type,
            success,
            url,
            proof,
        })
    }

    /// Screenshot when a proof directory is configured. Only fatal errors propagate.
    async fn proof(&self, target_id: &str) -> Result<Option<ProofRecord>, AutomationError> {
        let Some(dir) = &self.proof_dir else {
            return Ok(None);
        };
        match capture_proof(self.driver.as_ref(), dir, target_id).await {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                warn!("Proof capture failed for {}: {}", target_id, e);
                Ok(None)
            }
        }
    }
}
