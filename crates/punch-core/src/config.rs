use std::time::Duration;

use chrono::FixedOffset;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{PunchError, Result};
use crate::types::{PunchKind, PunchTimeSpec};

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_TOLERANCE_MINUTES: u32 = 1;
/// The deployment runs against a portal in a fixed UTC+8 timezone.
pub const DEFAULT_UTC_OFFSET_HOURS: i8 = 8;

const DEFAULT_CONFIG_PATH: &str = "punch.toml";

/// Top-level config (punch.toml + PUNCH_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PunchConfig {
    /// Entry URL of the target OA portal.
    #[serde(default = "default_target_url")]
    pub target_url: String,
    #[serde(default)]
    pub login: LoginConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Default for PunchConfig {
    fn default() -> Self {
        Self {
            target_url: default_target_url(),
            login: LoginConfig::default(),
            schedule: ScheduleConfig::default(),
            browser: BrowserConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl PunchConfig {
    /// Load config from a TOML file with PUNCH_* env var overrides.
    ///
    /// Nested keys use a double underscore in the environment, e.g.
    /// `PUNCH_LOGIN__USERNAME` overrides `[login] username`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path.unwrap_or(DEFAULT_CONFIG_PATH);
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("PUNCH_").split("__"))
            .extract()
            .map_err(|e| PunchError::Config(e.to_string()))
    }
}

/// Portal credentials. Missing credentials skip the login flow; the
/// attempt then fails only if the portal actually demands a login.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// When to punch and how the scheduler ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Ordered slot list; earlier entries win when windows overlap.
    #[serde(default = "default_punch_times")]
    pub punch_times: Vec<PunchTimeSpec>,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// A slot is due within ± this many minutes of its nominal time.
    #[serde(default = "default_tolerance_minutes")]
    pub tolerance_minutes: u32,
    /// Fixed deployment timezone, hours east of UTC.
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i8,
    /// Register the wall-clock slot alarm alongside the interval check.
    #[serde(default = "bool_true")]
    pub use_alarm_timer: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            punch_times: default_punch_times(),
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            tolerance_minutes: DEFAULT_TOLERANCE_MINUTES,
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
            use_alarm_timer: true,
        }
    }
}

impl ScheduleConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn utc_offset(&self) -> FixedOffset {
        let secs = i32::from(self.utc_offset_hours.clamp(-23, 23)) * 3600;
        FixedOffset::east_opt(secs).expect("clamped offset is in range")
    }
}

/// Browser process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "bool_true")]
    pub headless: bool,
    /// Required in container/serverless environments.
    #[serde(default = "bool_true")]
    pub no_sandbox: bool,
    /// Explicit Chrome/Chromium binary; auto-detected when unset.
    pub executable: Option<String>,
    #[serde(default = "default_nav_timeout_secs")]
    pub nav_timeout_secs: u64,
    #[serde(default = "default_nav_retries")]
    pub nav_retries: u32,
    #[serde(default = "default_nav_retry_delay_secs")]
    pub nav_retry_delay_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            no_sandbox: true,
            executable: None,
            nav_timeout_secs: default_nav_timeout_secs(),
            nav_retries: default_nav_retries(),
            nav_retry_delay_secs: default_nav_retry_delay_secs(),
        }
    }
}

/// Per-attempt bounds for the execution pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Locate polls before giving up on discovery.
    #[serde(default = "default_locate_attempts")]
    pub locate_attempts: u32,
    #[serde(default = "default_locate_delay_secs")]
    pub locate_delay_secs: u64,
    /// Wait after navigation for the SPA to finish booting.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    /// Wait after submitting the login form before proceeding.
    #[serde(default = "default_login_settle_secs")]
    pub login_settle_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            locate_attempts: default_locate_attempts(),
            locate_delay_secs: default_locate_delay_secs(),
            settle_secs: default_settle_secs(),
            login_settle_secs: default_login_settle_secs(),
        }
    }
}

fn default_target_url() -> String {
    "http://oa.example.com/wui/index.html#/?logintype=1".to_string()
}

fn default_punch_times() -> Vec<PunchTimeSpec> {
    vec![
        PunchTimeSpec {
            hour: 9,
            minute: 0,
            name: "morning clock-in".to_string(),
            kind: PunchKind::On,
        },
        PunchTimeSpec {
            hour: 19,
            minute: 30,
            name: "evening clock-out".to_string(),
            kind: PunchKind::Off,
        },
    ]
}

fn default_check_interval_secs() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}
fn default_tolerance_minutes() -> u32 {
    DEFAULT_TOLERANCE_MINUTES
}
fn default_utc_offset_hours() -> i8 {
    DEFAULT_UTC_OFFSET_HOURS
}
fn default_nav_timeout_secs() -> u64 {
    120
}
fn default_nav_retries() -> u32 {
    3
}
fn default_nav_retry_delay_secs() -> u64 {
    3
}
fn default_locate_attempts() -> u32 {
    10
}
fn default_locate_delay_secs() -> u64 {
    1
}
fn default_settle_secs() -> u64 {
    5
}
fn default_login_settle_secs() -> u64 {
    3
}
fn bool_true() -> bool {
    true
}
