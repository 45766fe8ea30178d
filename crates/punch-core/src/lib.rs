//! `punch-core` — configuration, error taxonomy and domain types shared by
//! the scheduler, the browser session layer and the CLI.

pub mod config;
pub mod error;
pub mod types;

pub use config::PunchConfig;
pub use error::{PunchError, Result};
pub use types::{ApiResult, AttemptReport, AttendanceButton, PunchKind, PunchOutcome, PunchTimeSpec};
