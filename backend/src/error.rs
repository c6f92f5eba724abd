use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutomationError {
    /// Selector not found, element wait timed out, page not ready yet.
    #[error("Transient UI error: {0}")]
    Transient(String),

    /// The portal reported an access denial. Never retried.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A UI action's post-condition did not hold.
    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status}")]
    Upstream { status: u16, body: String },

    #[error("No bearer token available")]
    MissingToken,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl AutomationError {
    /// Terminal errors abort a retry loop immediately.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AutomationError::PermissionDenied(_) | AutomationError::RetriesExhausted { .. }
        )
    }
}

impl From<chromiumoxide::error::CdpError> for AutomationError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        AutomationError::Browser(e.to_string())
    }
}

pub type AutomationResult<T> = std::result::Result<T, AutomationError>;
