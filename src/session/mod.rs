//! Per-conversation state and the browser sessions they own

mod registry;

pub use registry::{SessionRegistry, SessionSlot};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::browser::PortalSession;
use crate::error::{PortalError, PortalResult};

/// Where a conversation is in the menu flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingCategoryChoice,
    AwaitingPropertyCode,
    AwaitingTaxpayerId,
    LoggedInProperty,
    AwaitingTaxpayerAction,
}

impl ConversationState {
    /// States that are only valid while a browser session is attached
    pub fn requires_handle(self) -> bool {
        matches!(
            self,
            ConversationState::LoggedInProperty | ConversationState::AwaitingTaxpayerAction
        )
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConversationState::Idle => "idle",
            ConversationState::AwaitingCategoryChoice => "awaiting_category_choice",
            ConversationState::AwaitingPropertyCode => "awaiting_property_code",
            ConversationState::AwaitingTaxpayerId => "awaiting_taxpayer_id",
            ConversationState::LoggedInProperty => "logged_in_property",
            ConversationState::AwaitingTaxpayerAction => "awaiting_taxpayer_action",
        };
        f.write_str(name)
    }
}

/// Bounds the number of live browser sessions process-wide
#[derive(Debug, Clone)]
pub struct SessionPool {
    permits: Arc<Semaphore>,
    max: usize,
}

impl SessionPool {
    pub fn new(max: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Reserve a slot without waiting
    pub fn try_acquire(&self) -> PortalResult<OwnedSemaphorePermit> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| PortalError::PoolExhausted { max: self.max })
    }

    pub fn in_use(&self) -> usize {
        self.max - self.permits.available_permits()
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// A live browser session together with its pool slot.
///
/// The slot is returned to the pool only after the browser has been closed.
pub struct BrowserLease {
    session: Box<dyn PortalSession>,
    _permit: OwnedSemaphorePermit,
}

impl BrowserLease {
    pub fn new(session: Box<dyn PortalSession>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            session,
            _permit: permit,
        }
    }

    pub fn id(&self) -> &str {
        self.session.id()
    }

    pub fn session_mut(&mut self) -> &mut dyn PortalSession {
        &mut *self.session
    }

    /// Close the browser; failures are logged, the slot is freed regardless
    pub async fn close(self) {
        let id = self.session.id().to_string();
        match self.session.close().await {
            Ok(()) => debug!(session = %id, "Browser session closed"),
            Err(e) => warn!(session = %id, "Failed to close browser session: {}", e),
        }
    }
}

impl fmt::Debug for BrowserLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserLease")
            .field("session", &self.session.id())
            .finish()
    }
}

/// State of one chat conversation
#[derive(Debug)]
pub struct ConversationSession {
    conversation_id: String,
    state: ConversationState,
    lease: Option<BrowserLease>,
    last_input_echo: Option<String>,
    last_activity: Instant,
}

impl ConversationSession {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            state: ConversationState::Idle,
            lease: None,
            last_input_echo: None,
            last_activity: Instant::now(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn set_state(&mut self, state: ConversationState) {
        if state != self.state {
            debug!(
                conversation = %self.conversation_id,
                from = %self.state,
                to = %state,
                "State transition"
            );
        }
        self.state = state;
    }

    pub fn has_handle(&self) -> bool {
        self.lease.is_some()
    }

    pub fn handle_mut(&mut self) -> Option<&mut BrowserLease> {
        self.lease.as_mut()
    }

    /// Attach a freshly logged-in browser session.
    ///
    /// Refuses when one is already attached; the rejected lease is closed
    /// so it cannot leak.
    pub async fn attach_handle(&mut self, lease: BrowserLease) -> PortalResult<()> {
        if self.lease.is_some() {
            warn!(
                conversation = %self.conversation_id,
                session = %lease.id(),
                "Rejecting second browser session"
            );
            lease.close().await;
            return Err(PortalError::HandleAlreadyAttached);
        }
        self.lease = Some(lease);
        Ok(())
    }

    /// Close any attached browser and return to `Idle`.
    ///
    /// Returns whether a browser was closed.
    pub async fn release(&mut self) -> bool {
        let closed = match self.lease.take() {
            Some(lease) => {
                lease.close().await;
                true
            }
            None => false,
        };
        self.last_input_echo = None;
        self.set_state(ConversationState::Idle);
        closed
    }

    pub fn last_input_echo(&self) -> Option<&str> {
        self.last_input_echo.as_deref()
    }

    pub fn set_last_input_echo(&mut self, value: impl Into<String>) {
        self.last_input_echo = Some(value.into());
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Whether state and handle agree
    pub fn is_consistent(&self) -> bool {
        match self.state {
            s if s.requires_handle() => self.lease.is_some(),
            _ => self.lease.is_none(),
        }
    }
}
