//! Routes inbound messages to one worker task per conversation
//!
//! Every conversation gets its own FIFO queue drained by a dedicated task,
//! so messages from one chat are handled strictly in arrival order while
//! different chats proceed in parallel. Workers retire after a quiet period.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::conversation::{ConversationMachine, is_reset};
use crate::gateway::InboundMessage;

pub struct Dispatcher {
    machine: Arc<ConversationMachine>,
    workers: DashMap<String, mpsc::UnboundedSender<String>>,
    worker_idle: Duration,
    tracker: TaskTracker,
    stopping: CancellationToken,
}

impl Dispatcher {
    pub fn new(machine: Arc<ConversationMachine>, worker_idle: Duration) -> Arc<Self> {
        Arc::new(Self {
            machine,
            workers: DashMap::new(),
            worker_idle,
            tracker: TaskTracker::new(),
            stopping: CancellationToken::new(),
        })
    }

    /// Queue a message on its conversation's worker.
    ///
    /// A reset also cancels whatever workflow the conversation is running,
    /// so it takes effect without waiting behind a slow browser step.
    pub fn dispatch(self: &Arc<Self>, message: InboundMessage) {
        let InboundMessage {
            conversation_id,
            text,
        } = message;

        if is_reset(&text) && self.machine.registry().abort_for_reset(&conversation_id) {
            info!(conversation = %conversation_id, "Reset requested, aborting running workflow");
        }

        // Sending under the entry lock keeps it atomic with worker retirement
        let worker = self
            .workers
            .entry(conversation_id.clone())
            .or_insert_with(|| self.spawn_worker(conversation_id.clone()));
        if worker.send(text).is_err() {
            warn!(conversation = %conversation_id, "Conversation worker gone, message dropped");
        }
    }

    fn spawn_worker(self: &Arc<Self>, conversation_id: String) -> mpsc::UnboundedSender<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::clone(self);
        debug!(conversation = %conversation_id, "Starting conversation worker");
        self.tracker
            .spawn(async move { dispatcher.work(conversation_id, rx).await });
        tx
    }

    async fn work(self: Arc<Self>, conversation_id: String, mut rx: mpsc::UnboundedReceiver<String>) {
        loop {
            let text = tokio::select! {
                biased;
                _ = self.stopping.cancelled() => break,
                received = rx.recv() => match received {
                    Some(text) => text,
                    None => break,
                },
                _ = tokio::time::sleep(self.worker_idle) => {
                    // Retire only if nothing slipped in; the entry lock keeps
                    // dispatch from sending meanwhile.
                    let mut pending = None;
                    let retired = self
                        .workers
                        .remove_if(&conversation_id, |_, _| match rx.try_recv() {
                            Ok(text) => {
                                pending = Some(text);
                                false
                            }
                            Err(_) => {
                                rx.close();
                                true
                            }
                        })
                        .is_some();
                    match pending {
                        Some(text) => text,
                        None if retired => break,
                        None => continue,
                    }
                }
            };
            self.machine.handle(&conversation_id, &text).await;
        }
        debug!(conversation = %conversation_id, "Conversation worker stopped");
    }

    /// Number of conversations with a live worker
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    /// Feed messages from `inbound` until it closes or `shutdown` fires
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<InboundMessage>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(message) => self.dispatch(message),
                    None => break,
                },
            }
        }
        self.close().await;
    }

    /// Stop accepting work and wait until every queued message is handled
    pub async fn drain(&self) {
        self.workers.clear();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("Dispatcher drained");
    }

    /// Stop accepting work and wait for every worker to finish its current
    /// message. Queued messages are dropped.
    pub async fn close(&self) {
        self.stopping.cancel();
        self.workers.clear();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Dispatcher stopped");
    }
}
