use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tgrelay_channels::{ChatTransport, TelegramClient};
use tgrelay_core::formatter::format_notification;
use tgrelay_core::{load_config, BridgeContext, CommandRouter, Poller, ProcessRunner};
use tgrelay_server::state::AppState;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::pid::{check_and_clean_pid, remove_pid_file, write_pid_file};

/// Upper bound on waiting for the poll loop and HTTP server to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Run the worker in the foreground until SIGINT/SIGTERM.
pub async fn run_worker(root: &Path) -> Result<()> {
    let config = load_config(root)?;
    config
        .ensure_valid()
        .with_context(|| format!("edit {} and try again", root.join(tgrelay_core::CONFIG_FILE).display()))?;

    check_and_clean_pid(root)?;
    write_pid_file(root)?;
    info!("PID file written (pid: {})", std::process::id());

    let result = serve_until_shutdown(root, config).await;
    remove_pid_file(root);
    result
}

async fn serve_until_shutdown(root: &Path, config: tgrelay_core::BridgeConfig) -> Result<()> {
    let chat_id = config.chat_id;
    let port = config.worker_port;
    let transport: Arc<dyn ChatTransport> = Arc::new(TelegramClient::with_base_url(
        &config.bot_token,
        &config.api_base_url,
    ));

    match transport.get_me().await {
        Ok(me) => info!(
            bot_id = me.id,
            username = me.username.as_deref().unwrap_or(""),
            "connected to Telegram"
        ),
        Err(err) => warn!("could not verify bot token: {err}"),
    }

    let ctx = Arc::new(BridgeContext::new(
        config,
        Some(root.to_path_buf()),
        transport.clone(),
        Arc::new(ProcessRunner),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut server_rx = shutdown_rx.clone();
    let mut server = tokio::spawn(tgrelay_server::serve(
        AppState::new(ctx.clone()),
        port,
        async move {
            let _ = server_rx.wait_for(|stop| *stop).await;
        },
    ));

    let poller = Poller::new(transport.clone(), CommandRouter::new(ctx.clone()));
    let poller = tokio::spawn(poller.run(shutdown_rx));

    notify(transport.as_ref(), chat_id, "Worker started", "success").await;
    info!(port, chat_id, "tgrelay worker running");

    let server_result = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut server => Some(result),
    };

    let _ = shutdown_tx.send(true);
    notify(transport.as_ref(), chat_id, "Worker stopped", "end").await;

    if tokio::time::timeout(SHUTDOWN_GRACE, poller).await.is_err() {
        warn!("poll loop did not stop within {}s", SHUTDOWN_GRACE.as_secs());
    }

    let server_result = match server_result {
        Some(result) => result,
        None => match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
            Ok(result) => result,
            Err(_) => {
                warn!("HTTP server did not stop within {}s", SHUTDOWN_GRACE.as_secs());
                Ok(Ok(()))
            }
        },
    };
    server_result.context("HTTP server task panicked")??;

    info!("PID file cleaned up. Goodbye.");
    Ok(())
}

/// Best-effort lifecycle message; failures are only logged.
async fn notify(transport: &dyn ChatTransport, chat_id: i64, message: &str, status: &str) {
    let text = format_notification(message, Some(status), None);
    if let Err(err) = transport.send_message(chat_id, &text).await {
        warn!("failed to send \"{message}\" notification: {err}");
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(err) => {
                warn!("failed to install SIGTERM handler: {err}");
                let _ = ctrl_c.await;
                info!("Received SIGINT, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Received SIGINT, shutting down...");
    }
}
