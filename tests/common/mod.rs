#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use futures::stream;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use portal_courier::browser::{
    BrowserDriver, BrowserError, BrowserResult, CaptureTab, NetworkResponse, PortalSession,
    ResponseStream, TabId, TabStream,
};
use portal_courier::conversation::ConversationMachine;
use portal_courier::gateway::{GatewayError, MessagingGateway, Outbound};
use portal_courier::session::{SessionPool, SessionRegistry};
use portal_courier::workflow::{WorkflowEngine, WorkflowSet};

pub const PORTAL_URL: &str = "http://portal.test/servicosweb/home.jsf";
pub const LANDING_URL: &str = "http://portal.test/servicosweb/debitos.jsf";
pub const PDF_BYTES: &[u8] = b"%PDF-1.4 certidao negativa";

/// What the popup opened by a capture click does
#[derive(Clone)]
pub enum TabBehavior {
    /// No tab ever opens
    Never,
    /// A tab opens and serves these responses, then stays silent
    Opens(Vec<NetworkResponse>),
}

/// How the fake browser behaves
#[derive(Clone)]
pub struct Script {
    pub fail_launch: bool,
    /// Clicks and typing on these selectors fail as missing elements
    pub missing: HashSet<String>,
    /// Any action on these selectors never completes
    pub hang_on: HashSet<String>,
    pub checked: bool,
    pub tab: TabBehavior,
    pub action_delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_launch: false,
            missing: HashSet::new(),
            hang_on: HashSet::new(),
            checked: false,
            tab: TabBehavior::Opens(vec![
                response("r1", "http://portal.test/loading.html", Some("text/html")),
                response("r2", "http://portal.test/certidao.pdf", Some("application/pdf")),
            ]),
            action_delay: Duration::ZERO,
        }
    }
}

pub fn response(id: &str, url: &str, content_type: Option<&str>) -> NetworkResponse {
    NetworkResponse {
        request_id: id.to_string(),
        url: url.to_string(),
        content_type: content_type.map(str::to_string),
        mime_type: None,
    }
}

#[derive(Default)]
pub struct Log {
    pub launches: usize,
    /// Every action, tagged with the session that ran it
    pub actions: Vec<(String, String)>,
    pub session_closes: HashMap<String, usize>,
    pub tab_closes: usize,
    pub response_watches: usize,
}

pub struct FakeDriver {
    script: Mutex<Script>,
    log: Arc<Mutex<Log>>,
}

impl FakeDriver {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            log: Arc::new(Mutex::new(Log::default())),
        })
    }

    pub fn launches(&self) -> usize {
        self.log.lock().launches
    }

    pub fn actions(&self) -> Vec<(String, String)> {
        self.log.lock().actions.clone()
    }

    pub fn actions_of(&self, session: &str) -> Vec<String> {
        self.log
            .lock()
            .actions
            .iter()
            .filter(|(s, _)| s == session)
            .map(|(_, a)| a.clone())
            .collect()
    }

    pub fn closes(&self, session: &str) -> usize {
        self.log.lock().session_closes.get(session).copied().unwrap_or(0)
    }

    pub fn total_closes(&self) -> usize {
        self.log.lock().session_closes.values().sum()
    }

    pub fn tab_closes(&self) -> usize {
        self.log.lock().tab_closes
    }

    pub fn response_watches(&self) -> usize {
        self.log.lock().response_watches
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.log.lock().actions.iter().any(|(_, a)| a == action)
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn launch(&self) -> BrowserResult<Box<dyn PortalSession>> {
        let script = self.script.lock().clone();
        if script.fail_launch {
            return Err(BrowserError::LaunchFailed("no chrome in test".into()));
        }
        let id = {
            let mut log = self.log.lock();
            log.launches += 1;
            format!("session-{}", log.launches)
        };
        Ok(Box::new(FakeSession {
            id,
            script,
            log: Arc::clone(&self.log),
            url: None,
        }))
    }
}

pub struct FakeSession {
    id: String,
    script: Script,
    log: Arc<Mutex<Log>>,
    url: Option<String>,
}

impl FakeSession {
    async fn act(&self, action: String, selector: Option<&str>) -> BrowserResult<()> {
        self.log.lock().actions.push((self.id.clone(), action));
        if !self.script.action_delay.is_zero() {
            tokio::time::sleep(self.script.action_delay).await;
        }
        if let Some(selector) = selector {
            if self.script.hang_on.contains(selector) {
                std::future::pending::<()>().await;
            }
        }
        Ok(())
    }

    fn require(&self, selector: &str) -> BrowserResult<()> {
        if self.script.missing.contains(selector) {
            return Err(BrowserError::NoSuchElement {
                selector: selector.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PortalSession for FakeSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.act(format!("navigate {url}"), None).await?;
        self.url = Some(url.to_string());
        Ok(())
    }

    async fn wait_for_element(&mut self, selector: &str, visible: bool) -> BrowserResult<()> {
        self.act(format!("wait {selector} visible={visible}"), Some(selector))
            .await?;
        if self.script.missing.contains(selector) {
            return Err(BrowserError::Timeout {
                what: format!("element '{selector}'"),
                after_ms: 30_000,
            });
        }
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> BrowserResult<()> {
        self.act(format!("click {selector}"), Some(selector)).await?;
        self.require(selector)
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> BrowserResult<()> {
        self.act(format!("type {selector} {text}"), Some(selector))
            .await?;
        self.require(selector)
    }

    async fn wait_for_navigation(&mut self) -> BrowserResult<()> {
        self.act("wait_for_navigation".into(), None).await?;
        self.url = Some(LANDING_URL.to_string());
        Ok(())
    }

    async fn read_checked(&mut self, selector: &str) -> BrowserResult<bool> {
        self.act(format!("read_checked {selector}"), Some(selector))
            .await?;
        self.require(selector)?;
        Ok(self.script.checked)
    }

    async fn current_url(&mut self) -> BrowserResult<Option<String>> {
        Ok(self.url.clone())
    }

    async fn watch_new_tabs(&mut self) -> BrowserResult<TabStream> {
        self.act("watch_new_tabs".into(), None).await?;
        Ok(match self.script.tab {
            TabBehavior::Never => stream::pending().boxed(),
            TabBehavior::Opens(_) => stream::once(async { Ok::<_, BrowserError>(TabId("tab-1".into())) })
                .chain(stream::pending())
                .boxed(),
        })
    }

    async fn open_tab(&mut self, tab: &TabId) -> BrowserResult<Box<dyn CaptureTab>> {
        self.act(format!("open_tab {}", tab.0), None).await?;
        // The popup serves its responses as soon as it is attached; only a
        // watcher armed at attach time sees them
        let (tx, rx) = mpsc::unbounded();
        if let TabBehavior::Opens(responses) = &self.script.tab {
            for response in responses {
                let _ = tx.unbounded_send(Ok(response.clone()));
            }
        }
        Ok(Box::new(FakeTab {
            attached: Some(rx.chain(stream::pending()).boxed()),
            _served: tx,
            log: Arc::clone(&self.log),
        }))
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        let mut log = self.log.lock();
        *log.session_closes.entry(self.id.clone()).or_default() += 1;
        Ok(())
    }
}

pub struct FakeTab {
    attached: Option<ResponseStream>,
    _served: mpsc::UnboundedSender<BrowserResult<NetworkResponse>>,
    log: Arc<Mutex<Log>>,
}

#[async_trait]
impl CaptureTab for FakeTab {
    async fn bring_to_front(&mut self) -> BrowserResult<()> {
        Ok(())
    }

    async fn watch_responses(&mut self) -> BrowserResult<ResponseStream> {
        self.log.lock().response_watches += 1;
        Ok(self
            .attached
            .take()
            .unwrap_or_else(|| stream::pending().boxed()))
    }

    async fn read_body(&mut self, response: &NetworkResponse) -> BrowserResult<Vec<u8>> {
        if response.url.ends_with(".pdf") {
            Ok(PDF_BYTES.to_vec())
        } else {
            Ok(b"<html></html>".to_vec())
        }
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        self.log.lock().tab_closes += 1;
        Ok(())
    }
}

/// A document as the gateway saw it at send time
#[derive(Debug, Clone)]
pub struct SentDocument {
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: String,
    pub caption: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum Sent {
    Text(String),
    Document(SentDocument),
}

#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<(String, Sent)>>,
    fail_documents: Mutex<bool>,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_documents(&self) {
        *self.fail_documents.lock() = true;
    }

    pub fn sent_to(&self, conversation: &str) -> Vec<Sent> {
        self.sent
            .lock()
            .iter()
            .filter(|(c, _)| c == conversation)
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn texts_to(&self, conversation: &str) -> Vec<String> {
        self.sent_to(conversation)
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(text) => Some(text),
                Sent::Document(_) => None,
            })
            .collect()
    }

    pub fn last_text_to(&self, conversation: &str) -> Option<String> {
        self.texts_to(conversation).pop()
    }

    pub fn documents_to(&self, conversation: &str) -> Vec<SentDocument> {
        self.sent_to(conversation)
            .into_iter()
            .filter_map(|s| match s {
                Sent::Document(doc) => Some(doc),
                Sent::Text(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send(&self, conversation_id: &str, content: Outbound) -> Result<(), GatewayError> {
        let sent = match content {
            Outbound::Text(text) => Sent::Text(text),
            Outbound::Document(attachment) => {
                let bytes = std::fs::read(&attachment.path)?;
                let doc = SentDocument {
                    path: attachment.path,
                    file_name: attachment.file_name,
                    mime_type: attachment.mime_type,
                    caption: attachment.caption,
                    bytes,
                };
                if *self.fail_documents.lock() {
                    self.sent
                        .lock()
                        .push((conversation_id.to_string(), Sent::Document(doc)));
                    return Err(GatewayError::Transport("upload rejected".into()));
                }
                Sent::Document(doc)
            }
        };
        self.sent.lock().push((conversation_id.to_string(), sent));
        Ok(())
    }
}

pub struct Harness {
    pub driver: Arc<FakeDriver>,
    pub gateway: Arc<RecordingGateway>,
    pub registry: Arc<SessionRegistry>,
    pub engine: Arc<WorkflowEngine>,
    pub machine: Arc<ConversationMachine>,
}

impl Harness {
    pub fn new(script: Script) -> Self {
        Self::with_pool(script, 4)
    }

    pub fn with_pool(script: Script, max_sessions: usize) -> Self {
        let driver = FakeDriver::new(script);
        let gateway = RecordingGateway::new();
        let registry = SessionRegistry::new(Duration::from_secs(900));
        let engine = Arc::new(WorkflowEngine::new(
            driver.clone(),
            SessionPool::new(max_sessions),
            PORTAL_URL,
            Duration::from_secs(10),
        ));
        let machine = Arc::new(ConversationMachine::new(
            Arc::clone(&registry),
            Arc::clone(&engine),
            gateway.clone(),
            Arc::new(WorkflowSet::default()),
        ));
        Self {
            driver,
            gateway,
            registry,
            engine,
            machine,
        }
    }

    pub async fn say(&self, conversation: &str, text: &str) {
        self.machine.handle(conversation, text).await;
    }

    pub async fn say_all(&self, conversation: &str, texts: &[&str]) {
        for text in texts {
            self.say(conversation, text).await;
        }
    }
}
