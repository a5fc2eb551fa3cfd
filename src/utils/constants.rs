//! Shared configuration constants
//!
//! Default values used across the crate so the config layer and the
//! built-in portal workflows agree.

/// Chrome user agent presented to the portal
///
/// The portal serves a degraded page to unknown agents, so present a
/// current stable desktop Chrome.
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

/// Home page of the Corumbá municipal services portal
pub const DEFAULT_PORTAL_URL: &str = "http://nfse.corumba.ms.gov.br:8080/servicosweb/home.jsf";

/// Default WhatsApp bridge endpoint
pub const DEFAULT_BRIDGE_URL: &str = "ws://127.0.0.1:3001";

/// Window during which the certificate PDF must arrive
pub const DEFAULT_CAPTURE_WINDOW_MS: u64 = 10_000;

/// MIME type identifying the captured artifact
pub const PDF_MIME: &str = "application/pdf";

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "PORTAL_COURIER_CONFIG";
