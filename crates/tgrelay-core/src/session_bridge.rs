//! Bridge to the agent running inside a named tmux session.
//!
//! Every operation shells out to `tmux` on its own; the session is never
//! cached, so a session killed from outside is noticed on the next call.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

/// Longest text injected with a single `send-keys`.
pub const MAX_SEND_CHARS: usize = 4000;
pub const MIN_TAIL_LINES: usize = 10;
pub const MAX_TAIL_LINES: usize = 500;

/// Time given to a freshly started agent before the first keystrokes arrive.
const SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    fn detail(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        }
    }
}

/// Runs one external program to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> io::Result<CommandOutput>;
}

pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> io::Result<CommandOutput> {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args).stdin(std::process::Stdio::null());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let output = cmd.output().await?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("tmux not found. Install tmux first.")]
    TmuxMissing,

    #[error("No tmux session running")]
    NoSession,

    #[error("No text to send")]
    EmptyInput,

    #[error("tmux {action} failed: {detail}")]
    Command { action: &'static str, detail: String },

    #[error("failed to run tmux: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

pub struct SessionBridge {
    session: String,
    launch_cmd: String,
    runner: Arc<dyn CommandRunner>,
    settle_delay: Duration,
}

impl SessionBridge {
    pub fn new(session: impl Into<String>, launch_cmd: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            session: session.into(),
            launch_cmd: launch_cmd.into(),
            runner,
            settle_delay: SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn session_name(&self) -> &str {
        &self.session
    }

    async fn tmux(&self, args: &[&str], cwd: Option<&Path>) -> io::Result<CommandOutput> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.runner.run("tmux", &args, cwd).await
    }

    pub async fn tmux_available(&self) -> bool {
        matches!(self.tmux(&["-V"], None).await, Ok(out) if out.success)
    }

    /// Whether the session is alive right now. Failing to run tmux counts as absent.
    pub async fn exists(&self) -> bool {
        match self.tmux(&["has-session", "-t", &self.session], None).await {
            Ok(out) => out.success,
            Err(err) => {
                debug!("tmux has-session failed: {err}");
                false
            }
        }
    }

    pub async fn start(&self, workdir: &str) -> Result<StartOutcome, BridgeError> {
        if !self.tmux_available().await {
            return Err(BridgeError::TmuxMissing);
        }
        if self.exists().await {
            return Ok(StartOutcome::AlreadyRunning);
        }

        let out = self
            .tmux(
                &[
                    "new-session",
                    "-d",
                    "-s",
                    &self.session,
                    "-c",
                    workdir,
                    "bash",
                    "-lc",
                    &self.launch_cmd,
                ],
                Some(Path::new(workdir)),
            )
            .await?;
        if !out.success {
            return Err(BridgeError::Command {
                action: "new-session",
                detail: out.detail(),
            });
        }

        info!(session = %self.session, %workdir, "tmux session started");
        Ok(StartOutcome::Started)
    }

    /// Type `text` into the session followed by Enter, starting the session first if needed.
    pub async fn send(&self, text: &str, workdir: &str) -> Result<(), BridgeError> {
        if text.is_empty() {
            return Err(BridgeError::EmptyInput);
        }

        if !self.exists().await {
            self.start(workdir).await?;
            tokio::time::sleep(self.settle_delay).await;
        }

        let capped: String = text.chars().take(MAX_SEND_CHARS).collect();
        let out = self
            .tmux(&["send-keys", "-t", &self.session, &capped, "Enter"], None)
            .await?;
        if !out.success {
            return Err(BridgeError::Command {
                action: "send-keys",
                detail: out.detail(),
            });
        }
        debug!(session = %self.session, chars = capped.chars().count(), "keys sent");
        Ok(())
    }

    /// Last `lines` lines of the pane, clamped to 10..=500, without ANSI escapes.
    pub async fn tail(&self, lines: usize) -> Result<String, BridgeError> {
        if !self.exists().await {
            return Err(BridgeError::NoSession);
        }

        let n = lines.clamp(MIN_TAIL_LINES, MAX_TAIL_LINES);
        let start = format!("-{n}");
        let out = self
            .tmux(&["capture-pane", "-p", "-t", &self.session, "-S", &start], None)
            .await?;
        if !out.success {
            return Err(BridgeError::Command {
                action: "capture-pane",
                detail: out.detail(),
            });
        }

        Ok(strip_ansi(&out.stdout).trim_end().to_string())
    }

    pub async fn stop(&self) -> Result<StopOutcome, BridgeError> {
        if !self.exists().await {
            return Ok(StopOutcome::NotRunning);
        }

        let out = self.tmux(&["kill-session", "-t", &self.session], None).await?;
        if !out.success {
            return Err(BridgeError::Command {
                action: "kill-session",
                detail: out.detail(),
            });
        }
        info!(session = %self.session, "tmux session stopped");
        Ok(StopOutcome::Stopped)
    }
}

/// Remove CSI escape sequences (`ESC [ params letter`).
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\x1b' || chars.peek() != Some(&'[') {
            out.push(c);
            continue;
        }

        let mut lookahead = chars.clone();
        lookahead.next();
        let mut consumed = 1;
        let mut terminated = false;
        for next in lookahead {
            consumed += 1;
            if next.is_ascii_digit() || next == ';' {
                continue;
            }
            terminated = next.is_ascii_alphabetic();
            break;
        }

        if terminated {
            for _ in 0..consumed {
                chars.next();
            }
        } else {
            out.push(c);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTmux;

    fn bridge(fake: Arc<FakeTmux>) -> SessionBridge {
        SessionBridge::new("claude-telegram", "claude", fake).with_settle_delay(Duration::ZERO)
    }

    #[test]
    fn strip_ansi_removes_csi_sequences() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m plain"), "red plain");
        assert_eq!(strip_ansi("\x1b[1;32mok\x1b[K"), "ok");
        assert_eq!(strip_ansi("no escapes"), "no escapes");
        assert_eq!(strip_ansi("lone \x1b kept"), "lone \x1b kept");
        assert_eq!(strip_ansi("tail \x1b[12"), "tail \x1b[12");
    }

    #[tokio::test]
    async fn send_on_absent_session_starts_once_then_injects_once() {
        let fake = Arc::new(FakeTmux::default());
        let bridge = bridge(fake.clone());

        bridge.send("hello", "/work").await.unwrap();

        let subs = fake.subcommands();
        assert_eq!(subs.iter().filter(|s| *s == "new-session").count(), 1);
        assert_eq!(subs.iter().filter(|s| *s == "send-keys").count(), 1);
        let new_session = subs.iter().position(|s| s == "new-session").unwrap();
        let send_keys = subs.iter().position(|s| s == "send-keys").unwrap();
        assert!(new_session < send_keys);

        let calls = fake.calls();
        let start = calls.iter().find(|c| c[0] == "new-session").unwrap();
        assert_eq!(
            start,
            &["new-session", "-d", "-s", "claude-telegram", "-c", "/work", "bash", "-lc", "claude"]
        );
    }

    #[tokio::test]
    async fn send_on_live_session_does_not_start() {
        let fake = Arc::new(FakeTmux::with_session());
        let bridge = bridge(fake.clone());
        bridge.send("hi", "/work").await.unwrap();
        assert!(!fake.subcommands().contains(&"new-session".to_string()));
    }

    #[tokio::test]
    async fn send_caps_text_length() {
        let fake = Arc::new(FakeTmux::with_session());
        let bridge = bridge(fake.clone());
        bridge.send(&"z".repeat(5000), "/work").await.unwrap();

        let calls = fake.calls();
        let keys = calls.iter().find(|c| c[0] == "send-keys").unwrap();
        assert_eq!(keys[3].chars().count(), MAX_SEND_CHARS);
        assert_eq!(keys[4], "Enter");
    }

    #[tokio::test]
    async fn send_rejects_empty_text() {
        let fake = Arc::new(FakeTmux::default());
        let err = bridge(fake.clone()).send("", "/work").await.unwrap_err();
        assert!(matches!(err, BridgeError::EmptyInput));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn start_reports_already_running_and_missing_tmux() {
        let fake = Arc::new(FakeTmux::with_session());
        assert_eq!(bridge(fake).start("/w").await.unwrap(), StartOutcome::AlreadyRunning);

        let err = bridge(Arc::new(FakeTmux::missing())).start("/w").await.unwrap_err();
        assert!(matches!(err, BridgeError::TmuxMissing));
        assert_eq!(err.to_string(), "tmux not found. Install tmux first.");
    }

    #[tokio::test]
    async fn tail_clamps_and_strips() {
        let fake = Arc::new(FakeTmux::with_session());
        fake.set_pane("\x1b[32m$ ls\x1b[0m\nfile.rs\n\n\n");
        let bridge = bridge(fake.clone());

        assert_eq!(bridge.tail(3).await.unwrap(), "$ ls\nfile.rs");
        bridge.tail(9999).await.unwrap();

        let starts: Vec<String> = fake
            .calls()
            .into_iter()
            .filter(|c| c[0] == "capture-pane")
            .map(|c| c[5].clone())
            .collect();
        assert_eq!(starts, vec!["-10", "-500"]);
    }

    #[tokio::test]
    async fn tail_without_session_fails() {
        let err = bridge(Arc::new(FakeTmux::default())).tail(50).await.unwrap_err();
        assert!(matches!(err, BridgeError::NoSession));
    }

    #[tokio::test]
    async fn stop_transitions_to_absent() {
        let fake = Arc::new(FakeTmux::with_session());
        let bridge = bridge(fake);
        assert_eq!(bridge.stop().await.unwrap(), StopOutcome::Stopped);
        assert!(!bridge.exists().await);
        assert_eq!(bridge.stop().await.unwrap(), StopOutcome::NotRunning);
    }
}
