//! Chat command router.
//!
//! Turns inbound messages and button presses into actions: administrative
//! slash commands, session bridge control, and replies to pending questions.

use std::sync::Arc;

use chrono::{DateTime, Local};
use tgrelay_channels::{CallbackQuery, Message, TransportError, Update};
use tgrelay_schema::{CallbackAction, CallbackPayload};
use tracing::{debug, info, warn};

use crate::broker::SelectOutcome;
use crate::context::BridgeContext;
use crate::session_bridge::{StartOutcome, StopOutcome};

pub const UNAUTHORIZED_TEXT: &str = "❌ Unauthorized. Your user ID is not in the allowed list.";
pub const DEFAULT_TAIL_LINES: usize = 50;
/// Pane output shown in chat is cut to its last this-many characters.
const TAIL_CHAR_LIMIT: usize = 3000;
const TASK_PREVIEW_CHARS: usize = 120;

const HELP_TEXT: &str = "*Claude Code Telegram Bot* 🤖

*Session Commands:*
/status - Show current status
/help - Show this help
/cancel - Cancel pending question
/verbose - Toggle notification mode

*Claude Control (tmux):*
/cd <path> - Set working directory
/tmux\\_start - Start Claude in tmux session
/tmux\\_stop - Stop tmux session
/tmux\\_tail [n] - Show last n lines (default 50)
/send <prompt> - Send prompt to Claude

*Notification Modes:*
📢 Verbose: All events formatted nicely
📋 Summary: Only important events (default)";

/// Parsed slash command from chat text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Status,
    Cancel,
    Verbose(String),
    TmuxStart,
    TmuxStop,
    TmuxTail(String),
    Cd(String),
    Send(String),
    Unknown(String),
}

/// Parse `/command args`. The command is matched case-insensitively with any
/// `@botname` suffix removed; `args` keeps its inner spacing.
pub fn parse_command(text: &str) -> Option<SlashCommand> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (head, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim().to_string()),
        None => (trimmed, String::new()),
    };
    let name = head.split('@').next().unwrap_or(head).to_lowercase();

    Some(match name.as_str() {
        "/start" | "/help" => SlashCommand::Help,
        "/status" => SlashCommand::Status,
        "/cancel" => SlashCommand::Cancel,
        "/verbose" => SlashCommand::Verbose(rest),
        "/tmux_start" => SlashCommand::TmuxStart,
        "/tmux_stop" => SlashCommand::TmuxStop,
        "/tmux_tail" => SlashCommand::TmuxTail(rest),
        "/cd" => SlashCommand::Cd(rest),
        "/send" => SlashCommand::Send(rest),
        _ => SlashCommand::Unknown(name),
    })
}

/// Instruction sent to the agent for `/send`.
pub fn build_send_prompt(workdir: &str, task: &str) -> String {
    format!(
        "First, read the CLAUDE.md file in {workdir} if it exists to understand the project context. Then execute this task: {task}"
    )
}

#[derive(Clone)]
pub struct CommandRouter {
    ctx: Arc<BridgeContext>,
}

impl CommandRouter {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    pub async fn handle_update(&self, update: &Update) -> Result<(), TransportError> {
        if let Some(message) = &update.message {
            self.handle_message(message).await
        } else if let Some(query) = &update.callback_query {
            self.handle_callback(query).await
        } else {
            debug!(update_id = update.update_id, "ignoring update without message or callback");
            Ok(())
        }
    }

    async fn authorized(&self, user_id: Option<i64>) -> bool {
        match user_id {
            Some(id) => self.ctx.is_user_allowed(id).await,
            None => self.ctx.config().await.allowed_user_ids.is_empty(),
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        self.ctx.transport.send_message(chat_id, text).await?;
        Ok(())
    }

    pub async fn handle_message(&self, message: &Message) -> Result<(), TransportError> {
        let chat_id = message.chat.id;
        let user_id = message.from.as_ref().map(|u| u.id);

        if !self.authorized(user_id).await {
            warn!(?user_id, chat_id, "rejected message from unauthorized user");
            return self.reply(chat_id, UNAUTHORIZED_TEXT).await;
        }

        let Some(text) = message.text.as_deref() else {
            return Ok(());
        };

        let Some(command) = parse_command(text) else {
            if self.ctx.broker.take_free_text(text).await.is_some() {
                return self
                    .reply(chat_id, &format!("✅ Response received: \"{text}\""))
                    .await;
            }
            return Ok(());
        };

        info!(?command, chat_id, "chat command");
        match command {
            SlashCommand::Help => self.reply(chat_id, HELP_TEXT).await,
            SlashCommand::Status => self.status(chat_id).await,
            SlashCommand::Cancel => self.cancel(chat_id).await,
            SlashCommand::Verbose(arg) => self.verbose(chat_id, &arg).await,
            SlashCommand::TmuxStart => self.tmux_start(chat_id).await,
            SlashCommand::TmuxStop => self.tmux_stop(chat_id).await,
            SlashCommand::TmuxTail(arg) => self.tmux_tail(chat_id, &arg).await,
            SlashCommand::Cd(path) => self.cd(chat_id, path).await,
            SlashCommand::Send(task) => self.send(chat_id, &task).await,
            SlashCommand::Unknown(name) => {
                self.reply(
                    chat_id,
                    &format!("Unknown command: {name}\nUse /help to see available commands."),
                )
                .await
            }
        }
    }

    async fn status(&self, chat_id: i64) -> Result<(), TransportError> {
        let session = self.ctx.session().await;
        let tmux_running = self.ctx.bridge.exists().await;
        let workdir = self.ctx.workdir().await;

        let mut lines = vec![
            "*Status*".to_string(),
            String::new(),
            format!(
                "Claude Session: {}",
                if session.active { "🟢 Active" } else { "⚪ Inactive" }
            ),
            format!(
                "Tmux Session: {}",
                if tmux_running { "🟢 Running" } else { "⚪ Not running" }
            ),
            format!("📂 Workdir: `{workdir}`"),
        ];
        if let Some(started) = session
            .started_at
            .and_then(DateTime::from_timestamp_millis)
        {
            lines.push(format!(
                "Started: {}",
                started.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
            ));
        }
        lines.push(String::new());
        lines.push(format!(
            "Pending questions: {}",
            self.ctx.broker.pending_count().await
        ));
        lines.push(format!(
            "Queued commands: {}",
            self.ctx.queued_commands().await
        ));

        self.reply(chat_id, &lines.join("\n")).await
    }

    async fn cancel(&self, chat_id: i64) -> Result<(), TransportError> {
        let cancelled = self.ctx.broker.cancel_all().await;
        if cancelled == 0 {
            return self.reply(chat_id, "No pending questions to cancel.").await;
        }
        info!(cancelled, "pending questions cancelled from chat");
        self.reply(chat_id, "✅ All pending questions cancelled.")
            .await
    }

    async fn verbose(&self, chat_id: i64, arg: &str) -> Result<(), TransportError> {
        match arg.to_lowercase().as_str() {
            "on" | "true" => {
                self.ctx.set_verbose(true).await;
                self.reply(
                    chat_id,
                    "📢 *Verbose Mode: ON*\n\nAll tool events will be sent (formatted nicely):\n🔨 Bash commands\n📝 File edits\n📖 File reads\n🤖 Agent spawns",
                )
                .await
            }
            "off" | "false" => {
                self.ctx.set_verbose(false).await;
                self.reply(
                    chat_id,
                    "📋 *Summary Mode: ON*\n\nOnly important events will be sent:\n✅ Task complete\n❌ Errors\n❓ Questions\n📋 Plan ready",
                )
                .await
            }
            "" | "status" => {
                let mode = mode_label(self.ctx.verbose().await);
                self.reply(
                    chat_id,
                    &format!("*Current Mode:* {mode}\n\nUse:\n/verbose on - Enable verbose mode\n/verbose off - Enable summary mode"),
                )
                .await
            }
            _ => {
                let verbose = !self.ctx.verbose().await;
                self.ctx.set_verbose(verbose).await;
                self.reply(chat_id, &format!("*Mode changed to:* {}", mode_label(verbose)))
                    .await
            }
        }
    }

    async fn tmux_start(&self, chat_id: i64) -> Result<(), TransportError> {
        let workdir = self.ctx.workdir().await;
        let text = match self.ctx.bridge.start(&workdir).await {
            Ok(StartOutcome::Started) => {
                "✅ Claude tmux session started!\nUse /send <prompt> to send commands.".to_string()
            }
            Ok(StartOutcome::AlreadyRunning) => "ℹ️ Session already running".to_string(),
            Err(err) => format!("❌ Error: {err}"),
        };
        self.reply(chat_id, &text).await
    }

    async fn tmux_stop(&self, chat_id: i64) -> Result<(), TransportError> {
        let text = match self.ctx.bridge.stop().await {
            Ok(StopOutcome::Stopped) => "✅ Tmux session stopped.".to_string(),
            Ok(StopOutcome::NotRunning) => "ℹ️ No session running".to_string(),
            Err(err) => format!("❌ Error: {err}"),
        };
        self.reply(chat_id, &text).await
    }

    async fn tmux_tail(&self, chat_id: i64, arg: &str) -> Result<(), TransportError> {
        let lines = arg
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_TAIL_LINES);

        let text = match self.ctx.bridge.tail(lines).await {
            Ok(output) if output.is_empty() => "No output captured.".to_string(),
            Ok(output) => format!(
                "*Last {lines} lines:*\n```\n{}\n```",
                last_chars(&output, TAIL_CHAR_LIMIT)
            ),
            Err(err) => format!("❌ Error: {err}"),
        };
        self.reply(chat_id, &text).await
    }

    async fn cd(&self, chat_id: i64, path: String) -> Result<(), TransportError> {
        if path.is_empty() {
            let workdir = self.ctx.workdir().await;
            return self
                .reply(
                    chat_id,
                    &format!("Current workdir: `{workdir}`\n\nUsage: /cd <path>"),
                )
                .await;
        }
        let text = format!("✅ Workdir changed to:\n`{path}`");
        self.ctx.set_workdir(path).await;
        self.reply(chat_id, &text).await
    }

    async fn send(&self, chat_id: i64, task: &str) -> Result<(), TransportError> {
        let workdir = self.ctx.workdir().await;
        if task.is_empty() {
            return self
                .reply(
                    chat_id,
                    &format!(
                        "Usage: /send <prompt>\n\nExample: /send Fix the bug in auth.js\n\nCurrent workdir: `{workdir}`\nUse /cd <path> to change directory first.\n\n_Note: Claude will read CLAUDE.md first before executing._"
                    ),
                )
                .await;
        }

        let prompt = build_send_prompt(&workdir, task);
        let text = match self.ctx.bridge.send(&prompt, &workdir).await {
            Ok(()) => {
                let preview: String = task.chars().take(TASK_PREVIEW_CHARS).collect();
                let ellipsis = if task.chars().count() > TASK_PREVIEW_CHARS { "..." } else { "" };
                format!(
                    "✅ Sent to Claude:\n\n📂 Path: `{workdir}`\n📄 Will read: `CLAUDE.md`\n💬 Task: `{preview}{ellipsis}`\n\nUse /tmux\\_tail to see response."
                )
            }
            Err(err) => format!("❌ Error: {err}"),
        };
        self.reply(chat_id, &text).await
    }

    pub async fn handle_callback(&self, query: &CallbackQuery) -> Result<(), TransportError> {
        let transport = &self.ctx.transport;

        if !self.authorized(Some(query.from.id)).await {
            warn!(user_id = query.from.id, "rejected button press from unauthorized user");
            return transport.answer_callback(&query.id, Some("Unauthorized")).await;
        }

        let Some(action) = query.data.as_deref().and_then(CallbackPayload::parse) else {
            debug!(data = ?query.data, "malformed callback payload");
            return transport
                .answer_callback(&query.id, Some("Invalid callback"))
                .await;
        };

        let chat_id = match &query.message {
            Some(message) => message.chat.id,
            None => self.ctx.chat_id().await,
        };

        match action {
            CallbackAction::Other { correlation_id } => {
                if !self
                    .ctx
                    .broker
                    .request_free_text(correlation_id.as_deref())
                    .await
                {
                    return transport
                        .answer_callback(&query.id, Some("Question expired"))
                        .await;
                }
                transport.answer_callback(&query.id, None).await?;
                self.reply(chat_id, "📝 Please type your response:").await
            }
            CallbackAction::Select {
                correlation_id,
                question_index,
                option_index,
            } => {
                let outcome = self
                    .ctx
                    .broker
                    .select_option(correlation_id.as_deref(), question_index, option_index)
                    .await;
                match outcome {
                    SelectOutcome::Recorded { label } => {
                        transport
                            .answer_callback(&query.id, Some("Response recorded"))
                            .await?;
                        self.reply(chat_id, &format!("✅ Selected: *{label}*")).await
                    }
                    SelectOutcome::InvalidOption => {
                        transport
                            .answer_callback(&query.id, Some("Invalid option"))
                            .await
                    }
                    SelectOutcome::Expired => {
                        transport
                            .answer_callback(&query.id, Some("Question expired"))
                            .await
                    }
                }
            }
        }
    }
}

fn mode_label(verbose: bool) -> &'static str {
    if verbose {
        "📢 Verbose"
    } else {
        "📋 Summary"
    }
}

fn last_chars(text: &str, limit: usize) -> &str {
    let count = text.chars().count();
    if count <= limit {
        return text;
    }
    match text.char_indices().nth(count - limit) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
