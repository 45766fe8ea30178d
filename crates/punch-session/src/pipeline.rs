//! One end-to-end punch attempt.
//!
//! Stage order: settle → login if the form is showing → locate the
//! control object (bounded retry) → resolve the actionable slot → punch →
//! notify. Every stage folds its failure into the [`AttemptReport`];
//! nothing escapes the pipeline boundary.

use std::time::Duration;

use tracing::{debug, info, warn};

use punch_core::config::{LoginConfig, PipelineConfig};
use punch_core::error::{PunchError, Result};
use punch_core::types::{AttemptReport, PunchKind, PunchOutcome};

use crate::client::AttendanceClient;
use crate::locator::{ControlHandle, TargetLocator};
use crate::login::LoginFlow;
use crate::notify::Notifier;
use crate::page::Page;

pub struct ExecutionPipeline<'a, P: Page> {
    page: &'a P,
    credentials: &'a LoginConfig,
    settings: &'a PipelineConfig,
    notifier: &'a dyn Notifier,
}

impl<'a, P: Page> ExecutionPipeline<'a, P> {
    pub fn new(
        page: &'a P,
        credentials: &'a LoginConfig,
        settings: &'a PipelineConfig,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            page,
            credentials,
            settings,
            notifier,
        }
    }

    /// Run one attempt end to end and report how it went.
    pub async fn run(&self, kind: Option<PunchKind>) -> AttemptReport {
        // Give the SPA time to finish booting before poking at it.
        sleep_secs(self.settings.settle_secs).await;

        let mut login_performed = false;
        match LoginFlow::login_required(self.page).await {
            Ok(true) => {
                info!("login form detected — authenticating");
                if let Err(e) = LoginFlow::login(self.page, self.credentials).await {
                    return AttemptReport::failed("login", e, false);
                }
                login_performed = true;
                sleep_secs(self.settings.login_settle_secs).await;
            }
            Ok(false) => {}
            Err(e) => return AttemptReport::failed("login-check", e, false),
        }

        let handle = match self.locate_with_retry().await {
            Ok(handle) => handle,
            Err(PunchError::Discovery) => {
                warn!(
                    attempts = self.settings.locate_attempts,
                    "control object not found"
                );
                return AttemptReport::completed(login_performed, PunchOutcome::ControlNotFound);
            }
            Err(e) => return AttemptReport::failed("locate", e, login_performed),
        };

        let button = match AttendanceClient::get_actionable_slot(self.page, &handle, kind).await {
            Ok(Some(button)) => button,
            Ok(None) => {
                info!("no actionable slot — nothing to do");
                return AttemptReport::completed(login_performed, PunchOutcome::NothingDue);
            }
            Err(e) => return AttemptReport::failed("buttons", e, login_performed),
        };

        match AttendanceClient::punch(self.page, &handle, &button).await {
            Ok(result) => {
                if let Some(message) = &result.message {
                    self.notifier.notify(self.page, message).await;
                }
                if result.is_success() {
                    info!("punch succeeded");
                } else {
                    warn!(status = %result.status, "punch reported non-success");
                }
                AttemptReport::completed(
                    login_performed,
                    PunchOutcome::Punched {
                        status: result.status,
                        message: result.message,
                    },
                )
            }
            Err(e) => AttemptReport::failed("punch", e, login_performed),
        }
    }

    /// Poll discovery up to the configured bound at a fixed delay.
    /// A capped count turns "not found yet" into "not found".
    async fn locate_with_retry(&self) -> Result<ControlHandle> {
        let attempts = self.settings.locate_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(handle) = TargetLocator::locate(self.page).await? {
                debug!(attempt, strategy = handle.strategy(), "control object located");
                return Ok(handle);
            }
            if attempt < attempts {
                sleep_secs(self.settings.locate_delay_secs).await;
            }
        }
        Err(PunchError::Discovery)
    }
}

async fn sleep_secs(secs: u64) {
    if secs > 0 {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }
}
