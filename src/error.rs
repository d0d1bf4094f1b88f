use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by an [`AutomationDriver`](crate::driver::AutomationDriver).
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Failed to connect to Chrome: {0}")]
    ConnectionFailed(String),

    #[error("Failed to launch Chrome: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Navigation timed out: {0}")]
    NavigationTimeout(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element handle is stale: {0}")]
    StaleHandle(String),

    #[error("Click target is obscured by {0}")]
    Obscured(String),

    #[error("Browser session unavailable: {0}")]
    Unavailable(String),

    #[error("No page available")]
    NoPage,

    #[error("Script failed: {0}")]
    Script(String),

    #[error("CDP error: {0}")]
    CdpError(#[from] chromiumoxide::error::CdpError),

    #[error("Other error: {0}")]
    Other(String),
}

impl DriverError {
    /// True when the driver session itself is gone and nothing else can run.
    pub fn is_fatal(&self) -> bool {
        match self {
            DriverError::ConnectionFailed(_)
            | DriverError::LaunchFailed(_)
            | DriverError::Unavailable(_) => true,
            DriverError::CdpError(e) => is_connection_lost(&e.to_string()),
            _ => false,
        }
    }
}

/// CDP reports a dead browser as a cancelled response channel.
pub(crate) fn is_connection_lost(message: &str) -> bool {
    message.contains("oneshot canceled")
        || message.contains("channel closed")
        || message.contains("ChannelSendError")
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// Stable, serializable name of an [`AutomationError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DriverUnavailable,
    NavigationTimeout,
    ElementNotFound,
    ObstructedClick,
    ClickChainExhausted,
    PatternStale,
    ClassificationAmbiguous,
    Driver,
}

/// Engine-level failures. Only `DriverUnavailable` aborts a batch.
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("Navigation timed out: {0}")]
    NavigationTimeout(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Click obstructed: {0}")]
    ObstructedClick(String),

    #[error("All {attempts} click methods failed for {target}")]
    ClickChainExhausted { target: String, attempts: usize },

    #[error("Stored pattern no longer matches the page: {0}")]
    PatternStale(String),

    #[error("Result page could not be classified: {0}")]
    ClassificationAmbiguous(String),

    #[error("Driver error: {0}")]
    Driver(DriverError),
}

impl AutomationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AutomationError::DriverUnavailable(_) => ErrorKind::DriverUnavailable,
            AutomationError::NavigationTimeout(_) => ErrorKind::NavigationTimeout,
            AutomationError::ElementNotFound(_) => ErrorKind::ElementNotFound,
            AutomationError::ObstructedClick(_) => ErrorKind::ObstructedClick,
            AutomationError::ClickChainExhausted { .. } => ErrorKind::ClickChainExhausted,
            AutomationError::PatternStale(_) => ErrorKind::PatternStale,
            AutomationError::ClassificationAmbiguous(_) => ErrorKind::ClassificationAmbiguous,
            AutomationError::Driver(_) => ErrorKind::Driver,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, AutomationError::DriverUnavailable(_))
    }

    /// Per-target failures worth another attempt on the same target.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AutomationError::NavigationTimeout(_))
    }
}

impl From<DriverError> for AutomationError {
    fn from(err: DriverError) -> Self {
        if err.is_fatal() {
            return AutomationError::DriverUnavailable(err.to_string());
        }
        match err {
            DriverError::NavigationFailed(msg) | DriverError::NavigationTimeout(msg) => {
                AutomationError::NavigationTimeout(msg)
            }
            DriverError::ElementNotFound(msg) | DriverError::StaleHandle(msg) => {
                AutomationError::ElementNotFound(msg)
            }
            DriverError::Obscured(msg) => AutomationError::ObstructedClick(msg),
            other => AutomationError::Driver(other),
        }
    }
}
