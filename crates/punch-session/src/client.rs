//! The two remote attendance operations, invoked through the discovered
//! control object.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use punch_core::error::{PunchError, Result};
use punch_core::types::{ApiResult, AttendanceButton, PunchKind};

use crate::locator::ControlHandle;
use crate::page::Page;

pub const GET_BUTTONS_PATH: &str = "/api/hrm/kq/attendanceButton/getButtons";
pub const PUNCH_BUTTON_PATH: &str = "/api/hrm/kq/attendanceButton/punchButton";

#[derive(Debug, Deserialize)]
struct ButtonsResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    timeline: Vec<Value>,
}

/// Stateless client over the portal's attendance button API. Retry policy
/// belongs to the caller; nothing here is retried.
pub struct AttendanceClient;

impl AttendanceClient {
    /// Fetch the button timeline and select the first actionable entry.
    ///
    /// With a `kind`, only an active entry of that kind matches. Without
    /// one, an active clock-in entry is preferred, falling back to an
    /// active clock-out. `Ok(None)` means nothing is actionable right now
    /// — already punched, or the window has not opened.
    pub async fn get_actionable_slot<P: Page + ?Sized>(
        page: &P,
        handle: &ControlHandle,
        kind: Option<PunchKind>,
    ) -> Result<Option<AttendanceButton>> {
        let raw = handle
            .call_api(page, GET_BUTTONS_PATH, "POST", &json!({}))
            .await
            .map_err(as_remote)?;
        let response: ButtonsResponse = serde_json::from_value(raw)
            .map_err(|e| PunchError::Remote(format!("malformed button list: {e}")))?;

        if response.status != "1" {
            return Err(PunchError::Remote(response.message.unwrap_or_else(|| {
                "button list request rejected".to_string()
            })));
        }

        // Entries that don't carry the expected fields simply never match.
        let buttons: Vec<AttendanceButton> = response
            .timeline
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect();
        debug!(candidates = buttons.len(), "button timeline fetched");
        Ok(select_button(buttons, kind))
    }

    /// Submit the punch, forwarding the selected entry's payload exactly
    /// as the server sent it. Returns the raw result; interpreting
    /// `status`/`message` is the caller's job.
    pub async fn punch<P: Page + ?Sized>(
        page: &P,
        handle: &ControlHandle,
        button: &AttendanceButton,
    ) -> Result<ApiResult> {
        let payload = serde_json::to_value(button)?;
        let raw = handle
            .call_api(page, PUNCH_BUTTON_PATH, "POST", &payload)
            .await
            .map_err(as_remote)?;
        let result: ApiResult = serde_json::from_value(raw)
            .map_err(|e| PunchError::Remote(format!("malformed punch response: {e}")))?;
        debug!(status = %result.status, "punch submitted");
        Ok(result)
    }
}

/// Evaluation and transport failures surface as remote errors with the
/// underlying message preserved.
fn as_remote(err: PunchError) -> PunchError {
    match err {
        err @ PunchError::Remote(_) => err,
        other => PunchError::Remote(other.to_string()),
    }
}

fn select_button(
    buttons: Vec<AttendanceButton>,
    kind: Option<PunchKind>,
) -> Option<AttendanceButton> {
    match kind {
        Some(kind) => buttons
            .into_iter()
            .find(|b| b.is_active() && b.kind == kind),
        None => {
            let mut fallback = None;
            for button in buttons {
                if !button.is_active() {
                    continue;
                }
                match button.kind {
                    PunchKind::On => return Some(button),
                    PunchKind::Off => {
                        if fallback.is_none() {
                            fallback = Some(button);
                        }
                    }
                }
            }
            fallback
        }
    }
}
