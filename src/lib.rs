pub mod analyzer;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod locator;
pub mod outcome;
pub mod pattern;
pub mod proof;
pub mod scheduler;

//  Re-export commonly used items
pub use analyzer::{FieldDescriptor, FieldKind, FieldPurpose, PageAnalysis, PageAnalyzer};
pub use config::{BrowserSettings, EngineConfig, Profile};
pub use driver::chrome::{ChromeDriver, ConnectionMode};
pub use driver::{
    AutomationDriver, BoundingBox, ElementHandle, ElementSnapshot, Locator, PageState, Selector,
    SyntheticEvent, WindowHandle,
};
pub use error::{AutomationError, DriverError, ErrorKind};
pub use executor::{ClickMethod, FieldValue, InteractionExecutor, StepOutcome, ValueProvider};
pub use locator::{Candidate, CandidateLocator, DetectionMethod, Vocabulary};
pub use outcome::{
    ApplicationOutcome, InteractionAction, Observation, OutcomeClassifier, ResultPageType,
};
pub use pattern::{
    AutomationPattern, PatternRecord, PatternStore, PatternType, Step, StepAction, ValueSource,
};
pub use proof::{capture_proof, ProofRecord};
pub use scheduler::{
    BatchScheduler, BatchSummary, ErrorReason, JsonRecordStore, MemoryRecordStore, PriorityTier,
    RecordStore, RunBudget, WorkItem, WorkItemFilter, WorkStatus,
};
