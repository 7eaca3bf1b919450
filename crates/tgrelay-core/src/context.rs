//! Process-wide worker state shared by the poll loop and the HTTP surface.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tgrelay_channels::ChatTransport;
use tgrelay_schema::{now_millis, RemoteCommand, SessionMeta, SessionUpdate};
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::broker::QuestionBroker;
use crate::config::{update_config, BridgeConfig};
use crate::session_bridge::{CommandRunner, SessionBridge};

pub struct BridgeContext {
    config: RwLock<BridgeConfig>,
    /// Directory holding `config.yaml`. `None` keeps every change in memory.
    config_root: Option<PathBuf>,
    session: RwLock<SessionMeta>,
    commands: Mutex<Vec<RemoteCommand>>,
    pub broker: QuestionBroker,
    pub transport: Arc<dyn ChatTransport>,
    pub bridge: SessionBridge,
    started: Instant,
}

impl BridgeContext {
    pub fn new(
        config: BridgeConfig,
        config_root: Option<PathBuf>,
        transport: Arc<dyn ChatTransport>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let broker = QuestionBroker::new(transport.clone(), config.chat_id);
        let bridge = SessionBridge::new(config.tmux_session.clone(), config.claude_cmd.clone(), runner);
        Self {
            config: RwLock::new(config),
            config_root,
            session: RwLock::new(SessionMeta::default()),
            commands: Mutex::new(Vec::new()),
            broker,
            transport,
            bridge,
            started: Instant::now(),
        }
    }

    /// Replace the bridge, e.g. to shorten its settle delay.
    pub fn with_bridge(mut self, bridge: SessionBridge) -> Self {
        self.bridge = bridge;
        self
    }

    pub async fn config(&self) -> BridgeConfig {
        self.config.read().await.clone()
    }

    pub async fn chat_id(&self) -> i64 {
        self.config.read().await.chat_id
    }

    pub async fn is_user_allowed(&self, user_id: i64) -> bool {
        self.config.read().await.is_user_allowed(user_id)
    }

    pub async fn verbose(&self) -> bool {
        self.config.read().await.verbose_mode
    }

    /// Switch the notification mode and persist it. A failed write only
    /// loses persistence; the in-memory mode still changes.
    pub async fn set_verbose(&self, verbose: bool) {
        self.config.write().await.verbose_mode = verbose;
        let Some(root) = &self.config_root else {
            return;
        };
        if let Err(err) = update_config(root, |c| c.verbose_mode = verbose) {
            warn!("failed to persist verbose mode: {err:#}");
        }
    }

    /// In-memory working directory override; not written back to disk.
    pub async fn set_workdir(&self, workdir: String) {
        self.config.write().await.workdir = Some(workdir);
    }

    /// Configured workdir, else the session's cwd, else the worker's own cwd.
    pub async fn workdir(&self) -> String {
        if let Some(dir) = self.config.read().await.workdir.clone() {
            return dir;
        }
        if let Some(cwd) = self.session.read().await.cwd.clone() {
            return cwd;
        }
        std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| ".".to_string())
    }

    pub async fn session(&self) -> SessionMeta {
        self.session.read().await.clone()
    }

    pub async fn update_session(&self, update: SessionUpdate) -> SessionMeta {
        let mut session = self.session.write().await;
        session.merge(update);
        session.clone()
    }

    pub async fn queue_command(&self, command: impl Into<String>, args: impl Into<String>) {
        self.commands.lock().await.push(RemoteCommand {
            command: command.into(),
            args: args.into(),
            queued_at: now_millis(),
        });
    }

    pub async fn queued_commands(&self) -> usize {
        self.commands.lock().await.len()
    }

    /// Take every queued command, leaving the queue empty.
    pub async fn drain_commands(&self) -> Vec<RemoteCommand> {
        std::mem::take(&mut *self.commands.lock().await)
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{config_path, load_config};
    use crate::testing::{FakeTmux, RecordingTransport};

    fn context(config: BridgeConfig, root: Option<PathBuf>) -> BridgeContext {
        BridgeContext::new(
            config,
            root,
            Arc::new(RecordingTransport::default()),
            Arc::new(FakeTmux::default()),
        )
    }

    #[tokio::test]
    async fn workdir_falls_back_to_session_cwd() {
        let ctx = context(BridgeConfig::default(), None);
        ctx.update_session(SessionUpdate {
            cwd: Some(Some("/proj".into())),
            ..Default::default()
        })
        .await;
        assert_eq!(ctx.workdir().await, "/proj");

        ctx.set_workdir("/override".into()).await;
        assert_eq!(ctx.workdir().await, "/override");
    }

    #[tokio::test]
    async fn verbose_is_persisted_but_workdir_is_not() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(config_path(tmp.path()), "bot_token: t\nchat_id: 1\n").unwrap();
        let ctx = context(load_config(tmp.path()).unwrap(), Some(tmp.path().to_path_buf()));

        ctx.set_verbose(true).await;
        ctx.set_workdir("/tmp/elsewhere".into()).await;

        let on_disk = load_config(tmp.path()).unwrap();
        assert!(on_disk.verbose_mode);
        assert!(on_disk.workdir.is_none());
        assert!(ctx.verbose().await);
    }

    #[tokio::test]
    async fn drain_empties_queue() {
        let ctx = context(BridgeConfig::default(), None);
        ctx.queue_command("compact", "").await;
        ctx.queue_command("send", "hello").await;
        assert_eq!(ctx.queued_commands().await, 2);

        let drained = ctx.drain_commands().await;
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].args, "hello");
        assert!(ctx.drain_commands().await.is_empty());
    }
}
