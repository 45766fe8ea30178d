use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which of the two workday events a slot or button refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunchKind {
    /// Clock in.
    On,
    /// Clock out.
    Off,
}

impl fmt::Display for PunchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PunchKind::On => write!(f, "on"),
            PunchKind::Off => write!(f, "off"),
        }
    }
}

impl std::str::FromStr for PunchKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "on" => Ok(PunchKind::On),
            "off" => Ok(PunchKind::Off),
            other => Err(format!("unknown punch kind: {other} (expected on/off)")),
        }
    }
}

/// One configured clock-in/out time point. Immutable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PunchTimeSpec {
    pub hour: u8,
    pub minute: u8,
    /// Human-readable label used in logs and fire events.
    pub name: String,
    pub kind: PunchKind,
}

impl PunchTimeSpec {
    /// Minutes since local midnight.
    pub fn minute_of_day(&self) -> i64 {
        i64::from(self.hour) * 60 + i64::from(self.minute)
    }

    /// Per-day dedup key: `<date>-<hour>:<minute>`. At most one fire per
    /// key per calendar day.
    pub fn slot_key(&self, date: NaiveDate) -> String {
        format!("{date}-{}:{}", self.hour, self.minute)
    }
}

/// One entry of the remote button timeline.
///
/// Only `active` and `type` are interpreted locally; everything else is
/// kept in `extra` so the punch call can forward the selected entry
/// exactly as the server sent it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceButton {
    pub active: String,
    #[serde(rename = "type")]
    pub kind: PunchKind,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AttendanceButton {
    /// A slot is only actionable when the server marks it `active == "1"`.
    pub fn is_active(&self) -> bool {
        self.active == "1"
    }
}

/// Raw result of a remote call. `status == "1"` is the remote system's
/// success convention; anything else is a soft failure described by
/// `message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResult {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ApiResult {
    pub fn is_success(&self) -> bool {
        self.status == "1"
    }
}

/// How one end-to-end attempt ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PunchOutcome {
    /// The punch call was submitted; `status` is the remote verdict.
    Punched {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// No actionable slot — already punched, or the window is not open.
    NothingDue,
    /// Every discovery strategy missed within the retry bound.
    ControlNotFound,
    /// A stage failed; `reason` preserves the original error message.
    Failed { stage: String, reason: String },
}

/// Structured report of one attempt, returned by the pipeline and printed
/// as JSON by the CLI entry point.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    pub login_performed: bool,
    #[serde(flatten)]
    pub outcome: PunchOutcome,
}

impl AttemptReport {
    /// Build a report for an attempt that ran to completion.
    pub fn completed(login_performed: bool, outcome: PunchOutcome) -> Self {
        let success = match &outcome {
            PunchOutcome::NothingDue => true,
            PunchOutcome::Punched { status, .. } => status == "1",
            _ => false,
        };
        Self {
            success,
            page_title: None,
            login_performed,
            outcome,
        }
    }

    /// Build a report for an attempt that failed at `stage`.
    pub fn failed(stage: &str, reason: impl fmt::Display, login_performed: bool) -> Self {
        Self {
            success: false,
            page_title: None,
            login_performed,
            outcome: PunchOutcome::Failed {
                stage: stage.to_string(),
                reason: reason.to_string(),
            },
        }
    }
}
