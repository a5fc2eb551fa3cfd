//! Chrome-backed portal session
//!
//! Each conversation gets its own Chrome process with a private profile
//! directory, so sessions never share cookies or tabs.

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::Browser;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use chromiumoxide_cdp::cdp::browser_protocol::network::{
    EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide_cdp::cdp::browser_protocol::target::EventTargetCreated;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    BrowserError, BrowserResult, CaptureTab, NetworkResponse, PortalSession, ResponseStream,
    TabId, TabStream,
};
use crate::utils::{duration_ms, wait_for_element};
use crate::{BrowserConfig, TimeoutConfig};

const VISIBILITY_PROBE: &str = "function() { \
    const r = this.getBoundingClientRect(); \
    const s = window.getComputedStyle(this); \
    return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; }";

const CHECKED_PROBE: &str = "function() { return !!this.checked; }";

const TAB_ATTACH_POLL: Duration = Duration::from_millis(20);

/// Browser process, its CDP handler task and the page driven for one
/// conversation.
///
/// Handler MUST be aborted when the wrapper goes away, otherwise it keeps
/// polling a dead connection.
pub struct BrowserWrapper {
    id: String,
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
    user_data_dir: Option<PathBuf>,
    action_timeout: Duration,
    navigation_timeout: Duration,
}

impl BrowserWrapper {
    pub(crate) fn new(
        id: String,
        browser: Browser,
        handler: JoinHandle<()>,
        page: Page,
        user_data_dir: PathBuf,
        timeouts: &TimeoutConfig,
    ) -> Self {
        Self {
            id,
            browser,
            handler,
            page,
            user_data_dir: Some(user_data_dir),
            action_timeout: timeouts.action(),
            navigation_timeout: timeouts.navigation(),
        }
    }

    /// Remove the profile directory.
    ///
    /// MUST run after `browser.wait()` so Chrome has released its file
    /// handles.
    pub fn cleanup_temp_dir(&mut self) {
        if let Some(path) = self.user_data_dir.take() {
            debug!(session = %self.id, "Removing profile directory {}", path.display());
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(
                    session = %self.id,
                    "Failed to remove profile directory {}: {}",
                    path.display(),
                    e
                );
            }
        }
    }

    async fn find(&self, selector: &str, visible: bool) -> BrowserResult<Element> {
        let element = wait_for_element(&self.page, selector, self.action_timeout).await?;
        if !visible {
            return Ok(element);
        }

        let start = std::time::Instant::now();
        let mut poll_interval = Duration::from_millis(100);
        loop {
            let shown = element
                .call_js_fn(VISIBILITY_PROBE, false)
                .await
                .ok()
                .and_then(|r| r.result.value)
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if shown {
                return Ok(element);
            }
            if start.elapsed() >= self.action_timeout {
                return Err(BrowserError::Timeout {
                    what: format!("'{selector}' to become visible"),
                    after_ms: duration_ms(self.action_timeout),
                });
            }
            tokio::time::sleep(poll_interval).await;
            poll_interval = (poll_interval * 2).min(Duration::from_secs(1));
        }
    }

    async fn press(&self, element: &Element, selector: &str) -> BrowserResult<()> {
        element
            .scroll_into_view()
            .await
            .map_err(|e| BrowserError::Protocol(format!("scroll to '{selector}': {e}")))?;

        // Click at the element's point directly; Element::click can hang on
        // IntersectionObserver-heavy pages.
        let point = element
            .clickable_point()
            .await
            .map_err(|e| BrowserError::Protocol(format!("'{selector}' is not clickable: {e}")))?;

        self.page
            .click(point)
            .await
            .map_err(|e| BrowserError::Protocol(format!("click on '{selector}': {e}")))?;
        Ok(())
    }
}

impl Drop for BrowserWrapper {
    fn drop(&mut self) {
        self.handler.abort();

        if let Some(path) = &self.user_data_dir {
            warn!(
                session = %self.id,
                "BrowserWrapper dropped without close(); profile directory orphaned: {}",
                path.display()
            );
        }
    }
}

#[async_trait]
impl PortalSession for BrowserWrapper {
    fn id(&self) -> &str {
        &self.id
    }

    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        tokio::time::timeout(self.navigation_timeout, self.page.goto(url))
            .await
            .map_err(|_| BrowserError::Timeout {
                what: format!("navigation to {url}"),
                after_ms: duration_ms(self.navigation_timeout),
            })?
            .map_err(|e| BrowserError::Protocol(format!("navigation to {url} failed: {e}")))?;
        debug!(session = %self.id, url, "Navigated");
        Ok(())
    }

    async fn wait_for_element(&mut self, selector: &str, visible: bool) -> BrowserResult<()> {
        self.find(selector, visible).await.map(|_| ())
    }

    async fn click(&mut self, selector: &str) -> BrowserResult<()> {
        let element = self.find(selector, false).await.map_err(|e| match e {
            BrowserError::Timeout { .. } => BrowserError::NoSuchElement {
                selector: selector.to_string(),
            },
            other => other,
        })?;
        self.press(&element, selector).await
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> BrowserResult<()> {
        let element = self.find(selector, false).await.map_err(|e| match e {
            BrowserError::Timeout { .. } => BrowserError::NoSuchElement {
                selector: selector.to_string(),
            },
            other => other,
        })?;

        // Focus by clicking, then clear whatever the portal prefilled
        self.press(&element, selector).await?;
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .map_err(|e| BrowserError::Protocol(format!("clear '{selector}': {e}")))?;
        element
            .type_str(text)
            .await
            .map_err(|e| BrowserError::Protocol(format!("type into '{selector}': {e}")))?;
        Ok(())
    }

    async fn wait_for_navigation(&mut self) -> BrowserResult<()> {
        tokio::time::timeout(self.navigation_timeout, self.page.wait_for_navigation())
            .await
            .map_err(|_| BrowserError::Timeout {
                what: "navigation to settle".into(),
                after_ms: duration_ms(self.navigation_timeout),
            })?
            .map_err(|e| BrowserError::Protocol(format!("waiting for navigation: {e}")))?;
        Ok(())
    }

    async fn read_checked(&mut self, selector: &str) -> BrowserResult<bool> {
        let element = self.find(selector, false).await.map_err(|e| match e {
            BrowserError::Timeout { .. } => BrowserError::NoSuchElement {
                selector: selector.to_string(),
            },
            other => other,
        })?;
        let checked = element
            .call_js_fn(CHECKED_PROBE, false)
            .await
            .map_err(|e| BrowserError::Protocol(format!("read '{selector}': {e}")))?
            .result
            .value
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok(checked)
    }

    async fn current_url(&mut self) -> BrowserResult<Option<String>> {
        self.page
            .url()
            .await
            .map_err(|e| BrowserError::Protocol(format!("read page url: {e}")))
    }

    async fn watch_new_tabs(&mut self) -> BrowserResult<TabStream> {
        let events = self
            .browser
            .event_listener::<EventTargetCreated>()
            .await
            .map_err(|e| BrowserError::Protocol(format!("subscribe to target events: {e}")))?;

        let tabs = events
            .filter_map(|event| async move {
                let info = &event.target_info;
                (info.r#type == "page")
                    .then(|| Ok::<_, BrowserError>(TabId(info.target_id.inner().clone())))
            })
            .boxed();
        Ok(tabs)
    }

    async fn open_tab(&mut self, tab: &TabId) -> BrowserResult<Box<dyn CaptureTab>> {
        // A freshly created target may take a moment to be attached as a
        // page. Poll tightly: responses served before the listener below is
        // armed are lost.
        let start = std::time::Instant::now();
        loop {
            let page = self
                .browser
                .pages()
                .await
                .map_err(|e| BrowserError::Protocol(format!("list pages: {e}")))?
                .into_iter()
                .find(|p| p.target_id().inner() == &tab.0);
            if let Some(page) = page {
                let responses = response_stream(&page).await?;
                debug!(session = %self.id, tab = %tab.0, "Capture tab attached");
                return Ok(Box::new(ChromeTab {
                    page,
                    responses: Some(responses),
                }));
            }
            if start.elapsed() >= self.action_timeout {
                return Err(BrowserError::Timeout {
                    what: format!("tab {} to attach", tab.0),
                    after_ms: duration_ms(self.action_timeout),
                });
            }
            tokio::time::sleep(TAB_ATTACH_POLL).await;
        }
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        let mut this = *self;
        info!(session = %this.id, "Closing browser session");

        // close() asks Chrome to exit; wait() reaps the process. Without
        // both the process lingers as a zombie.
        if let Err(e) = this.browser.close().await {
            warn!(session = %this.id, "Failed to close browser cleanly: {}", e);
        }
        if let Err(e) = this.browser.wait().await {
            warn!(session = %this.id, "Failed to wait for browser exit: {}", e);
        }
        this.cleanup_temp_dir();
        Ok(())
    }
}

/// A tab opened by the portal in the session's browser
pub struct ChromeTab {
    page: Page,
    /// Armed when the tab was attached, handed out by the first
    /// `watch_responses`
    responses: Option<ResponseStream>,
}

async fn response_stream(page: &Page) -> BrowserResult<ResponseStream> {
    let events = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(|e| BrowserError::Protocol(format!("subscribe to responses: {e}")))?;

    let responses = events
        .map(|event| {
            let response = &event.response;
            Ok::<_, BrowserError>(NetworkResponse {
                request_id: event.request_id.inner().clone(),
                url: response.url.clone(),
                content_type: header_value(response.headers.inner(), "content-type"),
                mime_type: Some(response.mime_type.clone()).filter(|m| !m.is_empty()),
            })
        })
        .boxed();
    Ok(responses)
}

#[async_trait]
impl CaptureTab for ChromeTab {
    async fn bring_to_front(&mut self) -> BrowserResult<()> {
        self.page
            .bring_to_front()
            .await
            .map_err(|e| BrowserError::Protocol(format!("bring tab to front: {e}")))?;
        Ok(())
    }

    async fn watch_responses(&mut self) -> BrowserResult<ResponseStream> {
        match self.responses.take() {
            Some(responses) => Ok(responses),
            None => response_stream(&self.page).await,
        }
    }

    async fn read_body(&mut self, response: &NetworkResponse) -> BrowserResult<Vec<u8>> {
        let body = self
            .page
            .execute(GetResponseBodyParams::new(RequestId::new(
                response.request_id.clone(),
            )))
            .await
            .map_err(|e| BrowserError::Protocol(format!("read body of {}: {e}", response.url)))?;

        if body.result.base64_encoded {
            base64::engine::general_purpose::STANDARD
                .decode(body.result.body.as_bytes())
                .map_err(|e| BrowserError::Protocol(format!("decode body of {}: {e}", response.url)))
        } else {
            Ok(body.result.body.clone().into_bytes())
        }
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        self.page
            .close()
            .await
            .map_err(|e| BrowserError::Protocol(format!("close tab: {e}")))
    }
}

/// Case-insensitive header lookup on a CDP headers object
fn header_value(headers: &serde_json::Value, name: &str) -> Option<String> {
    headers.as_object()?.iter().find_map(|(key, value)| {
        key.eq_ignore_ascii_case(name)
            .then(|| value.as_str().map(str::to_string))
            .flatten()
    })
}

/// Launch a dedicated browser for one session.
///
/// The profile directory is unique per session so concurrent sessions never
/// contend for Chrome's profile lock.
pub async fn launch_browser(
    browser: &BrowserConfig,
    timeouts: &TimeoutConfig,
) -> BrowserResult<BrowserWrapper> {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let user_data_dir = std::env::temp_dir().join(format!("portal_courier_{id}"));

    let (chrome, handler) =
        crate::browser_setup::launch_browser(browser, Some(user_data_dir.clone()))
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("{e:#}")))?;

    let page = match chrome.new_page("about:blank").await {
        Ok(page) => page,
        Err(e) => {
            let mut chrome = chrome;
            let _ = chrome.close().await;
            let _ = chrome.wait().await;
            handler.abort();
            let _ = std::fs::remove_dir_all(&user_data_dir);
            return Err(BrowserError::LaunchFailed(format!("create page: {e}")));
        }
    };

    info!(session = %id, "Browser session launched");
    Ok(BrowserWrapper::new(
        id,
        chrome,
        handler,
        page,
        user_data_dir,
        timeouts,
    ))
}
