//! Interaction executor against the in-memory driver.

mod support;

use autoapply_webdriver::{
    AutomationError, ClickMethod, ErrorKind, FieldPurpose, FieldValue, InteractionExecutor,
    Locator, Step, StepOutcome, ValueSource,
};
use autoapply_webdriver::pattern::AutomationPattern;
use autoapply_webdriver::PageAnalysis;
use std::path::PathBuf;
use std::sync::Arc;
use support::{application_page, el, test_config, test_profile, thanks_page, ClickEffect, FakeDriver, FakePage};

const JOB_URL: &str = "https://jobs.example.com/jobs/42";
const THANKS_URL: &str = "https://jobs.example.com/thanks";

fn setup(page: FakePage) -> (Arc<FakeDriver>, InteractionExecutor) {
    let driver = Arc::new(FakeDriver::with_pages(vec![page, thanks_page(THANKS_URL)]));
    let executor = InteractionExecutor::new(driver.clone(), Arc::new(test_profile()), &test_config());
    (driver, executor)
}

fn job_page() -> FakePage {
    application_page(JOB_URL, ClickEffect::Navigate(THANKS_URL.to_string()))
}

/// A single button, optionally behind an overlay.
fn button_page(obscured: bool) -> FakePage {
    let mut page = FakePage::new(JOB_URL, "Job posting");
    let mut button = el("button")
        .attr("id", "apply")
        .text("Apply now")
        .at(20.0, 400.0, 160.0, 40.0)
        .on_click(ClickEffect::Navigate(THANKS_URL.to_string()));
    if obscured {
        button = button.obscured_by("div.cookie-banner");
    }
    page.add(button);
    page
}

#[tokio::test(start_paused = true)]
async fn test_fill_required_email_from_profile() {
    let (driver, executor) = setup(job_page());

    let step = Step::fill(Locator::css("#email"), ValueSource::Profile(FieldPurpose::Email));
    let outcome = executor.execute_step(&step).await.unwrap();

    assert_eq!(outcome, StepOutcome::Filled);
    assert_eq!(driver.value_of("#email").as_deref(), Some("a@b.com"));
}

#[tokio::test(start_paused = true)]
async fn test_fill_file_input_uses_file_path() {
    let (driver, executor) = setup(job_page());

    executor
        .fill(
            &Locator::css("#resume"),
            &FieldValue::File(PathBuf::from("/home/ada/resume.pdf")),
        )
        .await
        .unwrap();

    assert_eq!(driver.value_of("#resume").as_deref(), Some("/home/ada/resume.pdf"));
}

#[tokio::test(start_paused = true)]
async fn test_select_falls_back_to_substring_match() {
    let mut page = FakePage::new(JOB_URL, "Work authorization");
    page.add(
        el("select")
            .attr("name", "sponsorship")
            .options(&["Yes", "No, I need sponsorship"])
            .at(20.0, 100.0, 200.0, 30.0),
    );
    let (driver, executor) = setup(page);

    let step = Step::fill(
        Locator::css("select[name='sponsorship']"),
        ValueSource::Literal("no".to_string()),
    );
    assert_eq!(executor.execute_step(&step).await.unwrap(), StepOutcome::Filled);
    assert_eq!(
        driver.value_of("select[name='sponsorship']").as_deref(),
        Some("No, I need sponsorship")
    );
}

#[tokio::test(start_paused = true)]
async fn test_fill_without_value_is_skipped() {
    let (driver, executor) = setup(job_page());

    let step = Step::fill(Locator::css("#email"), ValueSource::Profile(FieldPurpose::Github));
    let outcome = executor.execute_step(&step).await.unwrap();

    assert!(matches!(outcome, StepOutcome::Skipped { .. }));
    assert_eq!(driver.value_of("#email"), None);
}

#[tokio::test(start_paused = true)]
async fn test_missing_field_is_skipped_not_fatal() {
    let (_driver, executor) = setup(job_page());

    let step = Step::fill(
        Locator::css("#phone").with_text("Phone number"),
        ValueSource::Literal("555".to_string()),
    );
    let outcome = executor.execute_step(&step).await.unwrap();

    let StepOutcome::Skipped { reason } = outcome else {
        panic!("expected a skipped step, got {:?}", outcome);
    };
    assert!(reason.contains("#phone"), "reason was {}", reason);
}

#[tokio::test(start_paused = true)]
async fn test_native_click_navigates() {
    let (driver, executor) = setup(button_page(false));

    let method = executor.click(&Locator::css("#apply")).await.unwrap();

    assert_eq!(method, ClickMethod::Native);
    assert_eq!(driver.active_url(), THANKS_URL);
}

#[tokio::test(start_paused = true)]
async fn test_script_click_bypasses_overlay() {
    let (driver, executor) = setup(button_page(true));

    let method = executor.click(&Locator::css("#apply")).await.unwrap();

    assert_eq!(method, ClickMethod::Script);
    assert_eq!(driver.clicks().len(), 1);
    assert_eq!(driver.clicks()[0].via, "script");
}

#[tokio::test(start_paused = true)]
async fn test_overlay_cleared_before_forced_click() {
    let (driver, executor) = setup(button_page(true));
    driver.fail_method("script");

    let method = executor.click(&Locator::css("#apply")).await.unwrap();

    assert_eq!(method, ClickMethod::ForcedAfterClearing);
    assert_eq!(driver.active_url(), THANKS_URL);
}

#[tokio::test(start_paused = true)]
async fn test_synthetic_events_after_pointer_failures() {
    let (driver, executor) = setup(button_page(false));
    for method in ["native", "script", "pointer"] {
        driver.fail_method(method);
    }

    let method = executor.click(&Locator::css("#apply")).await.unwrap();

    assert_eq!(method, ClickMethod::SyntheticEvents);
}

#[tokio::test(start_paused = true)]
async fn test_form_submit_is_last_resort() {
    let (driver, executor) = setup(job_page());
    for method in ["native", "script", "pointer", "synthetic"] {
        driver.fail_method(method);
    }

    let method = executor
        .click(&Locator::css("#submit-application"))
        .await
        .unwrap();

    assert_eq!(method, ClickMethod::FormSubmit);
    assert_eq!(driver.active_url(), THANKS_URL);
}

#[tokio::test(start_paused = true)]
async fn test_click_chain_exhausted() {
    let (driver, executor) = setup(button_page(false));
    driver.fail_all_click_methods();

    let err = executor.click(&Locator::css("#apply")).await.unwrap_err();

    match err {
        AutomationError::ClickChainExhausted { attempts, .. } => {
            assert_eq!(attempts, ClickMethod::CHAIN.len())
        }
        other => panic!("expected ClickChainExhausted, got {:?}", other),
    }
    assert_eq!(driver.active_url(), JOB_URL);
}

#[tokio::test(start_paused = true)]
async fn test_stale_handle_is_reacquired() {
    let (driver, executor) = setup(button_page(false));
    driver.expire_next_handle_uses(1);

    let method = executor.click(&Locator::css("#apply")).await.unwrap();

    assert_eq!(method, ClickMethod::Native);
    assert_eq!(driver.clicks().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reacquire_falls_back_to_id_then_text() {
    let (driver, executor) = setup(button_page(false));

    let by_id = Locator::css("button.primary-cta").with_id("apply");
    let handle = executor.reacquire(&by_id).await.unwrap();
    assert_eq!(
        driver_attr(&driver, &handle, "id").await.as_deref(),
        Some("apply")
    );

    let by_text = Locator::css("#apply-button-v2")
        .with_text("Apply now")
        .with_position(30.0, 380.0);
    assert!(executor.reacquire(&by_text).await.is_ok());

    let too_far = Locator::css("#apply-button-v2")
        .with_text("Apply now")
        .with_position(900.0, 2000.0);
    let err = executor.reacquire(&too_far).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ElementNotFound);
}

async fn driver_attr(
    driver: &FakeDriver,
    handle: &autoapply_webdriver::ElementHandle,
    name: &str,
) -> Option<String> {
    use autoapply_webdriver::AutomationDriver;
    driver.attribute(handle, name).await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_validate_pattern_detects_stale_recipe() {
    let (_driver, executor) = setup(job_page());

    let current = AutomationPattern::from_analysis(
        JOB_URL,
        &PageAnalysis::default(),
        &Locator::css("#submit-application"),
    );
    assert!(executor.validate_pattern(&current).await.is_ok());

    let mut stale = AutomationPattern::from_analysis(
        JOB_URL,
        &PageAnalysis::default(),
        &Locator::css("#old-submit"),
    );
    let err = executor.validate_pattern(&stale).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PatternStale);

    stale.steps = vec![
        Step::fill(Locator::css("#old-email"), ValueSource::Profile(FieldPurpose::Email)),
        Step::click(Locator::css("#submit-application"), 0),
    ];
    let err = executor.validate_pattern(&stale).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PatternStale);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_driver_is_fatal_for_fills() {
    let (driver, executor) = setup(job_page());
    driver.set_unavailable();

    let step = Step::fill(Locator::css("#email"), ValueSource::Profile(FieldPurpose::Email));
    let err = executor.execute_step(&step).await.unwrap_err();

    assert!(err.is_fatal());
}
