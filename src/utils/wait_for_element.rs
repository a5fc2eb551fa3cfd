//! Element polling for the portal's JSF pages
//!
//! Modals and form panels are rendered by script after the load event
//! fires, so a single lookup right after navigation is not enough.

use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::element::Element;

use crate::browser::{BrowserError, BrowserResult};
use crate::utils::duration_ms;

/// Wait for an element to appear in the DOM using exponential backoff polling
///
/// # Polling Strategy
/// - Starts at 100ms intervals
/// - Doubles each retry, capped at 1 second
/// - Total duration limited by `timeout`
///
/// Returns [`BrowserError::Timeout`] when the bound expires.
pub async fn wait_for_element(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> BrowserResult<Element> {
    let start = std::time::Instant::now();
    let mut poll_interval = Duration::from_millis(100);
    let max_interval = Duration::from_secs(1);

    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Ok(element);
        }

        if start.elapsed() >= timeout {
            return Err(BrowserError::Timeout {
                what: format!("element '{selector}'"),
                after_ms: duration_ms(timeout),
            });
        }

        tokio::time::sleep(poll_interval).await;
        poll_interval = (poll_interval * 2).min(max_interval);
    }
}
