//! Chrome implementation of the browser driver seam
//!
//! Unlike a shared-browser model, every portal session gets its own Chrome
//! process: the portal keeps login state in server-side JSF views bound to
//! cookies, and two taxpayers must never share a cookie jar.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

use crate::browser::{BrowserDriver, BrowserResult, PortalSession, launch_browser};
use crate::{BrowserConfig, TimeoutConfig};

/// Launches one Chrome process per portal session.
pub struct ChromeDriver {
    browser: BrowserConfig,
    timeouts: TimeoutConfig,
    launches: AtomicU64,
}

impl ChromeDriver {
    pub fn new(browser: BrowserConfig, timeouts: TimeoutConfig) -> Arc<Self> {
        Arc::new(Self {
            browser,
            timeouts,
            launches: AtomicU64::new(0),
        })
    }

    /// Number of sessions launched since startup
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn launch(&self) -> BrowserResult<Box<dyn PortalSession>> {
        match launch_browser(&self.browser, &self.timeouts).await {
            Ok(wrapper) => {
                let n = self.launches.fetch_add(1, Ordering::Relaxed) + 1;
                info!(session = %wrapper.id(), launches = n, "Portal session ready");
                Ok(Box::new(wrapper))
            }
            Err(e) => {
                warn!("Browser launch failed: {}", e);
                Err(e)
            }
        }
    }
}
