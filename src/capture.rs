//! Capturing a PDF the portal opens in a new tab
//!
//! The portal renders the certificate into a popup; the document never
//! touches disk on our side. We watch for the popup, then watch its network
//! responses and keep the body of the first PDF response.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::browser::{CaptureTab, NetworkResponse, PortalSession, TabId, TabStream};
use crate::error::{PortalError, PortalResult};
use crate::utils::constants::PDF_MIME;
use crate::utils::duration_ms;

/// A captured document, held in memory until delivered
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub source_url: String,
    pub captured_at: DateTime<Utc>,
}

impl Artifact {
    /// File name presented to the recipient
    pub fn file_name(&self) -> String {
        format!("certidao_{}.pdf", self.captured_at.format("%Y%m%d_%H%M%S"))
    }
}

/// Whether a response carries a PDF.
///
/// The `content-type` header wins; the browser's own MIME classification is
/// the fallback for responses without one.
pub fn is_pdf(response: &NetworkResponse) -> bool {
    let declared = response
        .content_type
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .or(response.mime_type.as_deref());

    declared.is_some_and(|value| {
        value
            .split(';')
            .next()
            .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(PDF_MIME))
    })
}

/// Click `trigger` and capture the PDF served to the tab it opens.
///
/// A single deadline of `window`, started when the tab watcher is armed,
/// bounds waiting for the tab and for the PDF response. The capture tab is
/// closed before returning, whatever the outcome.
pub async fn capture_artifact(
    session: &mut dyn PortalSession,
    trigger: &str,
    window: Duration,
) -> PortalResult<Artifact> {
    let window_ms = duration_ms(window);
    let expired = || PortalError::ArtifactTimeout { window_ms };

    let mut tabs = session
        .watch_new_tabs()
        .await
        .map_err(|e| PortalError::from_browser(e, None))?;
    let deadline = Instant::now() + window;

    let tab_id = timeout_at(deadline, async {
        let click = async {
            session
                .click(trigger)
                .await
                .map_err(|e| PortalError::from_browser(e, Some(trigger)))
        };
        let (_, tab) = futures::future::try_join(click, next_tab(&mut tabs, window_ms)).await?;
        Ok::<_, PortalError>(tab)
    })
    .await
    .map_err(|_| expired())??;
    drop(tabs);

    debug!(tab = %tab_id.0, "Capture tab opened");
    let mut tab = timeout_at(deadline, session.open_tab(&tab_id))
        .await
        .map_err(|_| expired())?
        .map_err(|e| PortalError::from_browser(e, None))?;

    let result = receive_pdf(&mut *tab, deadline, window_ms).await;

    if let Err(e) = tab.close().await {
        warn!(tab = %tab_id.0, "Failed to close capture tab: {}", e);
    }

    if let Ok(artifact) = &result {
        info!(
            bytes = artifact.bytes.len(),
            source = %artifact.source_url,
            "Captured PDF"
        );
    }
    result
}

async fn next_tab(tabs: &mut TabStream, window_ms: u64) -> PortalResult<TabId> {
    match tabs.next().await {
        Some(Ok(tab)) => Ok(tab),
        Some(Err(e)) => Err(PortalError::from_browser(e, None)),
        None => Err(PortalError::ArtifactTimeout { window_ms }),
    }
}

async fn receive_pdf(
    tab: &mut dyn CaptureTab,
    deadline: Instant,
    window_ms: u64,
) -> PortalResult<Artifact> {
    let expired = || PortalError::ArtifactTimeout { window_ms };

    let mut responses = tab
        .watch_responses()
        .await
        .map_err(|e| PortalError::from_browser(e, None))?;
    if let Err(e) = tab.bring_to_front().await {
        debug!("Could not focus capture tab: {}", e);
    }

    let response = timeout_at(deadline, async {
        while let Some(event) = responses.next().await {
            match event {
                Ok(response) if is_pdf(&response) => return Ok(response),
                Ok(response) => debug!(url = %response.url, "Ignoring non-PDF response"),
                Err(e) => return Err(PortalError::from_browser(e, None)),
            }
        }
        Err(expired())
    })
    .await
    .map_err(|_| expired())??;
    drop(responses);

    let bytes = timeout_at(deadline, tab.read_body(&response))
        .await
        .map_err(|_| expired())?
        .map_err(|e| PortalError::from_browser(e, None))?;

    Ok(Artifact {
        bytes,
        content_type: PDF_MIME.to_string(),
        source_url: response.url,
        captured_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content_type: Option<&str>, mime_type: Option<&str>) -> NetworkResponse {
        NetworkResponse {
            request_id: "1".into(),
            url: "http://portal/doc".into(),
            content_type: content_type.map(str::to_string),
            mime_type: mime_type.map(str::to_string),
        }
    }

    #[test]
    fn header_with_parameters_is_pdf() {
        assert!(is_pdf(&response(Some("Application/PDF; charset=binary"), None)));
    }

    #[test]
    fn header_wins_over_mime_type() {
        assert!(!is_pdf(&response(Some("text/html"), Some("application/pdf"))));
    }

    #[test]
    fn mime_type_is_fallback() {
        assert!(is_pdf(&response(None, Some("application/pdf"))));
        assert!(!is_pdf(&response(None, None)));
    }

    #[test]
    fn similar_types_are_not_pdf() {
        assert!(!is_pdf(&response(Some("application/pdfx"), None)));
    }

    #[test]
    fn file_name_uses_capture_time() {
        let artifact = Artifact {
            bytes: Vec::new(),
            content_type: PDF_MIME.into(),
            source_url: String::new(),
            captured_at: DateTime::parse_from_rfc3339("2025-03-04T05:06:07Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        assert_eq!(artifact.file_name(), "certidao_20250304_050607.pdf");
    }
}
