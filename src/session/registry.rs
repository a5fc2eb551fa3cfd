//! Concurrent registry of conversation sessions
//!
//! Each entry sits behind its own async mutex, so conversations never block
//! each other while one of them waits on the browser. An entry that is
//! `Idle` with no browser attached is equivalent to no entry at all, which
//! lets us drop entries eagerly and let the reaper catch the rest.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{BrowserLease, ConversationSession, ConversationState};
use crate::error::PortalResult;

/// One registry entry
#[derive(Debug)]
pub struct SessionSlot {
    session: Mutex<ConversationSession>,
    in_flight: parking_lot::Mutex<Option<CancellationToken>>,
    /// Set when a reset cancelled the running workflow and still awaits
    /// its own turn in the queue
    reset_pending: AtomicBool,
}

impl SessionSlot {
    fn new(conversation_id: &str) -> Self {
        Self {
            session: Mutex::new(ConversationSession::new(conversation_id)),
            in_flight: parking_lot::Mutex::new(None),
            reset_pending: AtomicBool::new(false),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, ConversationSession> {
        self.session.lock().await
    }

    /// Register a workflow run; the token fires on [`SessionSlot::abort`]
    pub fn begin_workflow(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.in_flight.lock() = Some(token.clone());
        token
    }

    pub fn end_workflow(&self) {
        self.in_flight.lock().take();
    }

    /// Cancel the running workflow, if any
    pub fn abort(&self) -> bool {
        match self.in_flight.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the running workflow on behalf of a queued reset.
    ///
    /// The reset stays pending until [`SessionSlot::take_reset`] claims it,
    /// and the entry is kept alive until then.
    pub fn abort_for_reset(&self) -> bool {
        let aborted = self.abort();
        if aborted {
            self.reset_pending.store(true, Ordering::Release);
        }
        aborted
    }

    /// Claim a reset registered by [`SessionSlot::abort_for_reset`]
    pub fn take_reset(&self) -> bool {
        self.reset_pending.swap(false, Ordering::AcqRel)
    }

    pub fn reset_pending(&self) -> bool {
        self.reset_pending.load(Ordering::Acquire)
    }
}

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionSlot>>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            idle_timeout,
        })
    }

    pub fn get(&self, conversation_id: &str) -> Option<Arc<SessionSlot>> {
        self.sessions
            .get(conversation_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn create_if_absent(&self, conversation_id: &str) -> Arc<SessionSlot> {
        let entry = self
            .sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                debug!(conversation = %conversation_id, "Creating conversation session");
                Arc::new(SessionSlot::new(conversation_id))
            });
        Arc::clone(entry.value())
    }

    /// Attach a browser session to a conversation, creating the entry if needed
    pub async fn attach_handle(&self, conversation_id: &str, lease: BrowserLease) -> PortalResult<()> {
        let slot = self.create_if_absent(conversation_id);
        let mut session = slot.lock().await;
        session.attach_handle(lease).await
    }

    /// Close the conversation's browser, if any, and return it to `Idle`
    pub async fn release(&self, conversation_id: &str) -> bool {
        let Some(slot) = self.get(conversation_id) else {
            return false;
        };
        let mut session = slot.lock().await;
        session.release().await
    }

    /// Release, then drop the entry
    pub async fn remove(&self, conversation_id: &str) -> bool {
        let Some(slot) = self.get(conversation_id) else {
            return false;
        };
        {
            let mut session = slot.lock().await;
            session.release().await;
        }
        self.sessions.remove(conversation_id).is_some()
    }

    /// Drop the entry if it is idle and nobody else holds it.
    ///
    /// An entry that is locked, referenced elsewhere or waiting on a reset is
    /// left in place.
    pub fn remove_if_idle(&self, conversation_id: &str) -> bool {
        let removed = self
            .sessions
            .remove_if(conversation_id, |_, slot| {
                if Arc::strong_count(slot) > 1 || slot.reset_pending() {
                    return false;
                }
                match slot.session.try_lock() {
                    Ok(session) => {
                        session.state() == ConversationState::Idle && !session.has_handle()
                    }
                    Err(_) => false,
                }
            })
            .is_some();
        if removed {
            debug!(conversation = %conversation_id, "Removed idle conversation session");
        }
        removed
    }

    /// Cancel the workflow currently running for a conversation
    pub fn abort_in_flight(&self, conversation_id: &str) -> bool {
        self.get(conversation_id).is_some_and(|slot| slot.abort())
    }

    /// Cancel the running workflow because a reset is queued behind it
    pub fn abort_for_reset(&self, conversation_id: &str) -> bool {
        self.get(conversation_id)
            .is_some_and(|slot| slot.abort_for_reset())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn slots(&self) -> Vec<(String, Arc<SessionSlot>)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Release sessions untouched for longer than the idle timeout and drop
    /// idle entries. Busy entries are skipped. Returns browsers closed.
    pub async fn sweep_idle(&self) -> usize {
        let mut closed = 0;
        let mut idle = Vec::new();

        for (conversation_id, slot) in self.slots() {
            let Ok(mut session) = slot.session.try_lock() else {
                continue;
            };
            if session.state() != ConversationState::Idle && session.idle_for() >= self.idle_timeout {
                info!(
                    conversation = %conversation_id,
                    state = %session.state(),
                    idle_secs = session.idle_for().as_secs(),
                    "Releasing abandoned conversation"
                );
                if session.release().await {
                    closed += 1;
                }
            }
            if session.state() == ConversationState::Idle {
                idle.push(conversation_id);
            }
        }

        for conversation_id in idle {
            self.remove_if_idle(&conversation_id);
        }
        closed
    }

    /// Run [`SessionRegistry::sweep_idle`] every `interval` until cancelled
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let closed = registry.sweep_idle().await;
                        if closed > 0 {
                            info!(closed, live = registry.len(), "Idle sweep released sessions");
                        }
                    }
                }
            }
            debug!("Session reaper stopped");
        })
    }

    /// Cancel every running workflow
    pub fn abort_all(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().abort())
            .count()
    }

    /// Cancel running workflows and close every browser
    pub async fn shutdown(&self) {
        self.abort_all();
        let slots = self.slots();
        let mut closed = 0;
        for (conversation_id, slot) in slots {
            let mut session = slot.lock().await;
            if session.release().await {
                closed += 1;
            }
            drop(session);
            self.sessions.remove(&conversation_id);
        }
        info!(closed, "Session registry shut down");
    }
}
