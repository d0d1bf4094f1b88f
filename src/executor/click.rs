use crate::driver::{AutomationDriver, ElementHandle, SyntheticEvent};
use crate::error::DriverError;
use log::debug;
use serde::{Deserialize, Serialize};

/// Pixel offset for the second pointer attempt, off-center to dodge
/// transparent overlays sitting on the exact middle.
const POINTER_OFFSET: (f64, f64) = (5.0, 5.0);

/// Click strategies, tried in [`ClickMethod::CHAIN`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickMethod {
    Native,
    Script,
    PointerPath,
    PointerPathOffset,
    ForcedAfterClearing,
    SyntheticEvents,
    FormSubmit,
}

impl ClickMethod {
    pub const CHAIN: [ClickMethod; 7] = [
        ClickMethod::Native,
        ClickMethod::Script,
        ClickMethod::PointerPath,
        ClickMethod::PointerPathOffset,
        ClickMethod::ForcedAfterClearing,
        ClickMethod::SyntheticEvents,
        ClickMethod::FormSubmit,
    ];
}

/// One strategy on one handle. `Ok(false)` means the strategy did not apply
/// (no ancestor form).
pub(super) async fn attempt(
    driver: &dyn AutomationDriver,
    handle: &ElementHandle,
    method: ClickMethod,
) -> Result<bool, DriverError> {
    match method {
        ClickMethod::Native => driver.click(handle).await.map(|_| true),
        ClickMethod::Script => driver.script_click(handle).await.map(|_| true),
        ClickMethod::PointerPath => driver.pointer_click(handle, (0.0, 0.0)).await.map(|_| true),
        ClickMethod::PointerPathOffset => {
            driver.pointer_click(handle, POINTER_OFFSET).await.map(|_| true)
        }
        ClickMethod::ForcedAfterClearing => {
            let hidden = driver.hide_obstructions(handle).await?;
            debug!("Hid {} overlay(s) before forced click", hidden);
            driver.click(handle).await.map(|_| true)
        }
        ClickMethod::SyntheticEvents => driver
            .dispatch_events(handle, &SyntheticEvent::CLICK_SEQUENCE)
            .await
            .map(|_| true),
        ClickMethod::FormSubmit => driver.submit_ancestor_form(handle).await,
    }
}
