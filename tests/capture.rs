mod common;

use common::{FakeDriver, PDF_BYTES, Script, TabBehavior, response};
use portal_courier::PortalError;
use portal_courier::browser::{BrowserDriver, NetworkResponse};
use portal_courier::capture::capture_artifact;
use std::time::Duration;
use tokio::time::Instant;

const PRINT: &str = "#print";
const WINDOW: Duration = Duration::from_secs(10);

#[tokio::test(start_paused = true)]
async fn first_pdf_response_wins() {
    let driver = FakeDriver::new(Script {
        tab: TabBehavior::Opens(vec![
            response("r1", "http://portal.test/viewer.html", Some("text/html")),
            NetworkResponse {
                mime_type: Some("application/pdf".into()),
                ..response("r2", "http://portal.test/certidao.pdf", None)
            },
            response("r3", "http://portal.test/other.pdf", Some("application/pdf")),
        ]),
        ..Script::default()
    });
    let mut session = driver.launch().await.unwrap();

    let artifact = capture_artifact(session.as_mut(), PRINT, WINDOW).await.unwrap();

    assert_eq!(artifact.bytes, PDF_BYTES);
    assert_eq!(artifact.source_url, "http://portal.test/certidao.pdf");
    assert_eq!(artifact.content_type, "application/pdf");
    assert_eq!(driver.tab_closes(), 1);

    let actions = driver.actions_of("session-1");
    let watch = actions.iter().position(|a| a == "watch_new_tabs").unwrap();
    let click = actions.iter().position(|a| a == &format!("click {PRINT}")).unwrap();
    assert!(watch < click, "tab watcher must be armed before the click");
}

#[tokio::test(start_paused = true)]
async fn responses_served_while_the_tab_attaches_are_kept() {
    // The PDF is the very first thing the popup serves
    let driver = FakeDriver::new(Script {
        tab: TabBehavior::Opens(vec![response(
            "r1",
            "http://portal.test/certidao.pdf",
            Some("application/pdf"),
        )]),
        action_delay: Duration::from_secs(1),
        ..Script::default()
    });
    let mut session = driver.launch().await.unwrap();

    let artifact = capture_artifact(session.as_mut(), PRINT, WINDOW).await.unwrap();

    assert_eq!(artifact.bytes, PDF_BYTES);
    assert_eq!(driver.response_watches(), 1);
    assert_eq!(driver.tab_closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn no_tab_times_out_after_window() {
    let driver = FakeDriver::new(Script {
        tab: TabBehavior::Never,
        ..Script::default()
    });
    let mut session = driver.launch().await.unwrap();

    let started = Instant::now();
    let err = capture_artifact(session.as_mut(), PRINT, WINDOW)
        .await
        .unwrap_err();

    assert!(matches!(err, PortalError::ArtifactTimeout { window_ms: 10_000 }));
    assert!(started.elapsed() >= WINDOW);
    assert!(started.elapsed() < WINDOW + Duration::from_secs(1));
    assert_eq!(driver.tab_closes(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_click_fails_fast() {
    let driver = FakeDriver::new(Script {
        tab: TabBehavior::Never,
        missing: [PRINT.to_string()].into_iter().collect(),
        ..Script::default()
    });
    let mut session = driver.launch().await.unwrap();

    let started = Instant::now();
    let err = capture_artifact(session.as_mut(), PRINT, WINDOW)
        .await
        .unwrap_err();

    assert!(matches!(err, PortalError::ElementNotFound { selector } if selector == PRINT));
    assert!(started.elapsed() < WINDOW);
}

#[tokio::test(start_paused = true)]
async fn tab_without_pdf_is_closed_on_timeout() {
    let driver = FakeDriver::new(Script {
        tab: TabBehavior::Opens(vec![response(
            "r1",
            "http://portal.test/erro.html",
            Some("text/html; charset=utf-8"),
        )]),
        ..Script::default()
    });
    let mut session = driver.launch().await.unwrap();

    let err = capture_artifact(session.as_mut(), PRINT, WINDOW)
        .await
        .unwrap_err();

    assert!(matches!(err, PortalError::ArtifactTimeout { .. }));
    assert_eq!(driver.tab_closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn one_deadline_covers_every_stage() {
    // Each action takes 6s. The watcher is armed at 6s, the click returns at
    // 12s and attaching the tab would finish at 18s, past the 16s deadline.
    let driver = FakeDriver::new(Script {
        action_delay: Duration::from_secs(6),
        ..Script::default()
    });
    let mut session = driver.launch().await.unwrap();

    let started = Instant::now();
    let err = capture_artifact(session.as_mut(), PRINT, WINDOW)
        .await
        .unwrap_err();

    assert!(matches!(err, PortalError::ArtifactTimeout { .. }));
    assert!(started.elapsed() <= Duration::from_secs(6) + WINDOW);
    assert_eq!(driver.tab_closes(), 0);
}
