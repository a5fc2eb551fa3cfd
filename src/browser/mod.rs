//! Browser driver seam
//!
//! The conversation core only talks to the traits in this module. The
//! production implementation drives Chrome over CDP via chromiumoxide
//! (see [`wrapper`] and [`crate::manager::ChromeDriver`]); tests plug in a
//! scripted driver.

mod wrapper;

pub use crate::browser_setup::{download_managed_browser, find_browser_executable};
pub use wrapper::{BrowserWrapper, ChromeTab, launch_browser};

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Timed out after {after_ms}ms waiting for {what}")]
    Timeout { what: String, after_ms: u64 },

    #[error("No element matches selector '{selector}'")]
    NoSuchElement { selector: String },

    #[error("Browser protocol error: {0}")]
    Protocol(String),
}

pub type BrowserResult<T> = Result<T, BrowserError>;

/// Identifier of a newly opened browser tab
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabId(pub String);

/// A network response observed on a capture tab
#[derive(Debug, Clone)]
pub struct NetworkResponse {
    /// Driver-specific handle used to fetch the body later
    pub request_id: String,
    pub url: String,
    /// Value of the `content-type` header, if the response carried one
    pub content_type: Option<String>,
    /// MIME type as classified by the browser itself
    pub mime_type: Option<String>,
}

pub type TabStream = BoxStream<'static, BrowserResult<TabId>>;
pub type ResponseStream = BoxStream<'static, BrowserResult<NetworkResponse>>;

/// Launches isolated browser sessions, one per conversation.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn launch(&self) -> BrowserResult<Box<dyn PortalSession>>;
}

/// A live, exclusively owned browser session.
///
/// Every method takes `&mut self`: the underlying page is not safe for
/// concurrent command issuance, so only one action may be in flight.
#[async_trait]
pub trait PortalSession: Send {
    /// Stable identifier, used in logs
    fn id(&self) -> &str;

    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;

    /// Wait until `selector` matches, and when `visible` is set, until the
    /// element is rendered with a non-empty box.
    async fn wait_for_element(&mut self, selector: &str, visible: bool) -> BrowserResult<()>;

    async fn click(&mut self, selector: &str) -> BrowserResult<()>;

    async fn type_text(&mut self, selector: &str, text: &str) -> BrowserResult<()>;

    async fn wait_for_navigation(&mut self) -> BrowserResult<()>;

    async fn read_checked(&mut self, selector: &str) -> BrowserResult<bool>;

    async fn current_url(&mut self) -> BrowserResult<Option<String>>;

    /// Arm a watcher yielding page-type tabs opened after this call returns.
    async fn watch_new_tabs(&mut self) -> BrowserResult<TabStream>;

    /// Resolve a tab reported by [`PortalSession::watch_new_tabs`].
    ///
    /// Response watching starts as soon as the tab is attached; the first
    /// [`CaptureTab::watch_responses`] call yields everything seen since.
    async fn open_tab(&mut self, tab: &TabId) -> BrowserResult<Box<dyn CaptureTab>>;

    /// Release every resource held by the session.
    async fn close(self: Box<Self>) -> BrowserResult<()>;
}

/// A tab opened by the portal, observed for a downloadable document.
#[async_trait]
pub trait CaptureTab: Send {
    async fn bring_to_front(&mut self) -> BrowserResult<()>;

    /// Responses served to the tab, starting from when it was attached on
    /// the first call and from the call itself afterwards.
    async fn watch_responses(&mut self) -> BrowserResult<ResponseStream>;

    async fn read_body(&mut self, response: &NetworkResponse) -> BrowserResult<Vec<u8>>;

    async fn close(self: Box<Self>) -> BrowserResult<()>;
}
