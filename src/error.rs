//! Error taxonomy surfaced to the conversation layer

use thiserror::Error;

use crate::browser::BrowserError;

/// Failures a conversation can observe.
///
/// Browser driver errors never reach the state machine directly; the
/// workflow engine converts them into one of these kinds first.
#[derive(Error, Debug)]
pub enum PortalError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Timed out waiting for {what}")]
    AutomationTimeout { what: String },

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("No PDF response within {window_ms}ms")]
    ArtifactTimeout { window_ms: u64 },

    #[error("Artifact delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("No browser session registered for this conversation")]
    SessionLost,

    #[error("Browser unavailable: {0}")]
    BrowserUnavailable(String),

    #[error("All {max} browser sessions are in use")]
    PoolExhausted { max: usize },

    #[error("A browser session is already attached to this conversation")]
    HandleAlreadyAttached,

    #[error("Workflow cancelled")]
    Cancelled,
}

pub type PortalResult<T> = Result<T, PortalError>;

impl PortalError {
    /// Convert a driver error raised while executing an action.
    ///
    /// `selector` is the element the action addressed, if any. Protocol
    /// failures on selector-addressed actions count as a missing element;
    /// on navigation actions they count as the page never settling.
    pub(crate) fn from_browser(err: BrowserError, selector: Option<&str>) -> Self {
        match err {
            BrowserError::Timeout { what, .. } => PortalError::AutomationTimeout { what },
            BrowserError::NoSuchElement { selector } => PortalError::ElementNotFound { selector },
            BrowserError::Protocol(msg) => match selector {
                Some(selector) => PortalError::ElementNotFound {
                    selector: format!("{selector} ({msg})"),
                },
                None => PortalError::AutomationTimeout { what: msg },
            },
            BrowserError::LaunchFailed(msg) => PortalError::BrowserUnavailable(msg),
        }
    }
}

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
