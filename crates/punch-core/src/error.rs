use thiserror::Error;

/// Errors a punch attempt can surface.
///
/// "No actionable slot" is deliberately absent: an empty button list is a
/// legitimate outcome (already punched, or outside the window) and is
/// modelled as `Ok(None)` by the attendance client.
#[derive(Debug, Error)]
pub enum PunchError {
    #[error("configuration error: {0}")]
    Config(String),

    /// Every discovery strategy missed, including the pipeline's retry
    /// bound. Recoverable — reported, never panicked on.
    #[error("attendance control object not found")]
    Discovery,

    /// Non-success remote status, or a transport/evaluation failure while
    /// talking to the remote API. The underlying message is preserved
    /// verbatim and never retried automatically.
    #[error("remote API error: {0}")]
    Remote(String),

    /// A login form is present and the login flow could not complete.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Browser or page fault — the host environment itself, not the
    /// target application.
    #[error("browser session error: {0}")]
    Session(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PunchError>;
