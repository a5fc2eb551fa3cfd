//! Declarative portal workflows and the engine that runs them
//!
//! A workflow is plain step data. The engine walks the steps in order
//! against one exclusively borrowed [`PortalSession`]; the first failing
//! step aborts the run and its driver error is converted to a
//! [`PortalError`] here, so nothing above this module sees driver errors.

pub mod portal;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::{BrowserDriver, PortalSession};
use crate::capture::{Artifact, capture_artifact};
use crate::error::{ConfigError, PortalError, PortalResult};
use crate::session::{BrowserLease, SessionPool};

/// One scripted browser action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Load the configured portal home page
    OpenPortal,
    Navigate {
        url: String,
    },
    WaitFor {
        selector: String,
        #[serde(default)]
        visible: bool,
    },
    Click {
        selector: String,
    },
    /// Type `text`, or the workflow input when no text is given
    Type {
        selector: String,
        #[serde(default)]
        text: Option<String>,
    },
    WaitForNavigation,
    /// Click a checkbox or radio only when it is not already checked
    EnsureChecked {
        selector: String,
        #[serde(default = "default_settle_ms")]
        settle_ms: u64,
    },
    Pause {
        ms: u64,
    },
    /// Click `selector` and capture the PDF it opens in a new tab
    CapturePdf {
        selector: String,
    },
}

fn default_settle_ms() -> u64 {
    500
}

impl Step {
    fn consumes_input(&self) -> bool {
        matches!(self, Step::Type { text: None, .. })
    }
}

/// An ordered list of steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Workflow {
    steps: Vec<Step>,
}

impl Workflow {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    fn captures(&self) -> bool {
        matches!(self.steps.last(), Some(Step::CapturePdf { .. }))
    }
}

/// Which of the four portal workflows is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    PropertyLogin,
    TaxpayerLogin,
    DebtsLookup,
    Certificate,
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowKind::PropertyLogin => "property_login",
            WorkflowKind::TaxpayerLogin => "taxpayer_login",
            WorkflowKind::DebtsLookup => "debts_lookup",
            WorkflowKind::Certificate => "certificate",
        };
        f.write_str(name)
    }
}

/// The workflows the conversation layer can run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSet {
    #[serde(default = "portal::property_login")]
    pub property_login: Workflow,

    #[serde(default = "portal::taxpayer_login")]
    pub taxpayer_login: Workflow,

    #[serde(default = "portal::debts_lookup")]
    pub debts_lookup: Workflow,

    #[serde(default = "portal::certificate")]
    pub certificate: Workflow,
}

impl Default for WorkflowSet {
    fn default() -> Self {
        Self {
            property_login: portal::property_login(),
            taxpayer_login: portal::taxpayer_login(),
            debts_lookup: portal::debts_lookup(),
            certificate: portal::certificate(),
        }
    }
}

impl WorkflowSet {
    pub fn get(&self, kind: WorkflowKind) -> &Workflow {
        match kind {
            WorkflowKind::PropertyLogin => &self.property_login,
            WorkflowKind::TaxpayerLogin => &self.taxpayer_login,
            WorkflowKind::DebtsLookup => &self.debts_lookup,
            WorkflowKind::Certificate => &self.certificate,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in [
            WorkflowKind::PropertyLogin,
            WorkflowKind::TaxpayerLogin,
            WorkflowKind::DebtsLookup,
            WorkflowKind::Certificate,
        ] {
            let workflow = self.get(kind);
            let invalid = |msg: &str| ConfigError::Invalid(format!("workflows.{kind}: {msg}"));

            let Some((last, body)) = workflow.steps.split_last() else {
                return Err(invalid("must contain at least one step"));
            };
            if body.iter().any(|s| matches!(s, Step::CapturePdf { .. })) {
                return Err(invalid("capture_pdf is only allowed as the final step"));
            }

            match kind {
                WorkflowKind::PropertyLogin | WorkflowKind::TaxpayerLogin => {
                    if matches!(last, Step::CapturePdf { .. }) {
                        return Err(invalid("login workflows cannot capture a document"));
                    }
                    if !workflow.steps.iter().any(Step::consumes_input) {
                        return Err(invalid("needs a `type` step without text for the login value"));
                    }
                }
                WorkflowKind::DebtsLookup => {
                    if matches!(last, Step::CapturePdf { .. }) {
                        return Err(invalid("cannot capture a document"));
                    }
                }
                WorkflowKind::Certificate => {
                    if !workflow.captures() {
                        return Err(invalid("must end with a capture_pdf step"));
                    }
                }
            }
        }
        Ok(())
    }
}

/// What a completed workflow produced
#[derive(Debug, Default)]
pub struct WorkflowOutcome {
    /// Set when the workflow ended with `capture_pdf`
    pub artifact: Option<Artifact>,
    /// Page the session ended on, when the driver could report it
    pub landing_url: Option<String>,
}

/// Runs workflows against portal sessions
pub struct WorkflowEngine {
    driver: Arc<dyn BrowserDriver>,
    pool: SessionPool,
    portal_url: String,
    capture_window: Duration,
}

impl WorkflowEngine {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        pool: SessionPool,
        portal_url: impl Into<String>,
        capture_window: Duration,
    ) -> Self {
        Self {
            driver,
            pool,
            portal_url: portal_url.into(),
            capture_window,
        }
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn capture_window(&self) -> Duration {
        self.capture_window
    }

    /// Launch a fresh session and run a login workflow on it.
    ///
    /// On any failure, cancellation included, the new session is closed
    /// before returning.
    pub async fn login(
        &self,
        kind: WorkflowKind,
        workflow: &Workflow,
        input: &str,
        cancel: &CancellationToken,
    ) -> PortalResult<BrowserLease> {
        let permit = self.pool.try_acquire()?;

        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PortalError::Cancelled),
            launched = self.driver.launch() => {
                launched.map_err(|e| PortalError::from_browser(e, None))?
            }
        };
        let mut lease = BrowserLease::new(session, permit);
        info!(workflow = %kind, session = %lease.id(), "Running login workflow");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PortalError::Cancelled),
            result = self.execute(kind, workflow, lease.session_mut(), Some(input)) => result,
        };

        match result {
            Ok(_) => Ok(lease),
            Err(e) => {
                warn!(workflow = %kind, session = %lease.id(), "Login failed: {}", e);
                lease.close().await;
                Err(e)
            }
        }
    }

    /// Run a post-login workflow on an existing session.
    ///
    /// The session stays open on failure; releasing it is up to the owner.
    pub async fn run(
        &self,
        kind: WorkflowKind,
        workflow: &Workflow,
        lease: &mut BrowserLease,
        cancel: &CancellationToken,
    ) -> PortalResult<WorkflowOutcome> {
        info!(workflow = %kind, session = %lease.id(), "Running workflow");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PortalError::Cancelled),
            result = self.execute(kind, workflow, lease.session_mut(), None) => result,
        }
    }

    async fn execute(
        &self,
        kind: WorkflowKind,
        workflow: &Workflow,
        session: &mut dyn PortalSession,
        input: Option<&str>,
    ) -> PortalResult<WorkflowOutcome> {
        let mut outcome = WorkflowOutcome::default();

        for (index, step) in workflow.steps().iter().enumerate() {
            debug!(workflow = %kind, step = index, ?step, "Executing step");
            match step {
                Step::OpenPortal => session
                    .navigate(&self.portal_url)
                    .await
                    .map_err(|e| PortalError::from_browser(e, None))?,
                Step::Navigate { url } => session
                    .navigate(url)
                    .await
                    .map_err(|e| PortalError::from_browser(e, None))?,
                Step::WaitFor { selector, visible } => session
                    .wait_for_element(selector, *visible)
                    .await
                    .map_err(|e| PortalError::from_browser(e, None))?,
                Step::Click { selector } => session
                    .click(selector)
                    .await
                    .map_err(|e| PortalError::from_browser(e, Some(selector)))?,
                Step::Type { selector, text } => {
                    let text = text.as_deref().or(input).ok_or_else(|| {
                        PortalError::InvalidInput(format!("{kind} has no value to type"))
                    })?;
                    session
                        .type_text(selector, text)
                        .await
                        .map_err(|e| PortalError::from_browser(e, Some(selector)))?;
                }
                Step::WaitForNavigation => session
                    .wait_for_navigation()
                    .await
                    .map_err(|e| PortalError::from_browser(e, None))?,
                Step::EnsureChecked {
                    selector,
                    settle_ms,
                } => {
                    let checked = session
                        .read_checked(selector)
                        .await
                        .map_err(|e| PortalError::from_browser(e, Some(selector)))?;
                    if !checked {
                        session
                            .click(selector)
                            .await
                            .map_err(|e| PortalError::from_browser(e, Some(selector)))?;
                        tokio::time::sleep(Duration::from_millis(*settle_ms)).await;
                    }
                }
                Step::Pause { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
                Step::CapturePdf { selector } => {
                    let artifact = capture_artifact(session, selector, self.capture_window).await?;
                    outcome.artifact = Some(artifact);
                }
            }
        }

        outcome.landing_url = match session.current_url().await {
            Ok(url) => url,
            Err(e) => {
                debug!(workflow = %kind, "Could not read landing URL: {}", e);
                None
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_workflows_are_valid() {
        WorkflowSet::default().validate().unwrap();
    }

    #[test]
    fn steps_deserialize_from_tagged_yaml() {
        let yaml = r##"
- action: open_portal
- action: wait_for
  selector: "#a"
  visible: true
- action: type
  selector: "#b"
- action: ensure_checked
  selector: "#c"
- action: capture_pdf
  selector: "#d"
"##;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            workflow.steps(),
            &[
                Step::OpenPortal,
                Step::WaitFor {
                    selector: "#a".into(),
                    visible: true
                },
                Step::Type {
                    selector: "#b".into(),
                    text: None
                },
                Step::EnsureChecked {
                    selector: "#c".into(),
                    settle_ms: 500
                },
                Step::CapturePdf {
                    selector: "#d".into()
                },
            ]
        );
    }

    #[test]
    fn capture_must_be_last() {
        let mut set = WorkflowSet::default();
        set.certificate = Workflow::new(vec![
            Step::CapturePdf {
                selector: "#print".into(),
            },
            Step::WaitForNavigation,
        ]);
        let err = set.validate().unwrap_err();
        assert!(err.to_string().contains("workflows.certificate"));
    }

    #[test]
    fn login_cannot_capture() {
        let mut set = WorkflowSet::default();
        set.property_login = Workflow::new(vec![
            Step::Type {
                selector: "#code".into(),
                text: None,
            },
            Step::CapturePdf {
                selector: "#print".into(),
            },
        ]);
        assert!(set.validate().is_err());
    }

    #[test]
    fn login_must_type_input() {
        let mut set = WorkflowSet::default();
        set.taxpayer_login = Workflow::new(vec![Step::OpenPortal, Step::WaitForNavigation]);
        assert!(set.validate().is_err());
    }

    #[test]
    fn empty_workflow_rejected() {
        let mut set = WorkflowSet::default();
        set.debts_lookup = Workflow::new(Vec::new());
        assert!(set.validate().is_err());
    }

    #[test]
    fn config_overrides_single_workflow() {
        let set: WorkflowSet = serde_yaml::from_str(
            "debts_lookup:\n  - action: click\n    selector: \"#debts\"\n",
        )
        .unwrap();
        assert_eq!(set.debts_lookup.steps().len(), 1);
        assert_eq!(set.certificate, portal::certificate());
    }
}
