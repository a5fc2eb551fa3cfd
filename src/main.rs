// Portal courier daemon
//
// Connects to the WhatsApp bridge, routes chats through the conversation
// state machine and drives one Chrome session per logged-in conversation.
// Stops cleanly on Ctrl-C, closing every browser it opened.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use portal_courier::conversation::ConversationMachine;
use portal_courier::dispatch::Dispatcher;
use portal_courier::gateway::{BridgeGateway, MessagingGateway};
use portal_courier::session::{SessionPool, SessionRegistry};
use portal_courier::workflow::WorkflowEngine;
use portal_courier::{ChromeDriver, config_path, load_yaml_config};

const INBOUND_QUEUE: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = config_path();
    let config = load_yaml_config(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    info!(
        config = %path.display(),
        portal = %config.portal.base_url,
        max_sessions = config.sessions.max_live_sessions,
        "Starting portal courier"
    );

    let shutdown = CancellationToken::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

    let gateway = BridgeGateway::new(config.gateway.clone(), inbound_tx);
    let gateway_task = tokio::spawn(Arc::clone(&gateway).run(shutdown.clone()));

    let driver = ChromeDriver::new(config.browser.clone(), config.timeouts.clone());
    let engine = Arc::new(WorkflowEngine::new(
        driver.clone(),
        SessionPool::new(config.sessions.max_live_sessions),
        config.portal.base_url.clone(),
        config.timeouts.capture_window(),
    ));

    let registry = SessionRegistry::new(config.sessions.idle_timeout());
    let reaper = registry.spawn_reaper(config.sessions.sweep_interval(), shutdown.clone());

    let machine = Arc::new(ConversationMachine::new(
        Arc::clone(&registry),
        engine,
        gateway as Arc<dyn MessagingGateway>,
        Arc::new(config.workflows.clone()),
    ));
    let dispatcher = Dispatcher::new(machine, config.sessions.worker_idle());
    let dispatcher_task = tokio::spawn(dispatcher.run(inbound_rx, shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    shutdown.cancel();
    registry.abort_all();
    dispatcher_task.await.context("Dispatcher task panicked")?;
    registry.shutdown().await;
    reaper.await.context("Reaper task panicked")?;
    gateway_task.await.context("Gateway task panicked")?;

    info!(browsers_launched = driver.launches(), "Portal courier stopped");
    Ok(())
}
