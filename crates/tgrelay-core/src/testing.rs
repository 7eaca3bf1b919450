//! In-memory [`ChatTransport`] and [`CommandRunner`] doubles for tests.

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tgrelay_channels::{BotUser, ChatTransport, InlineKeyboardMarkup, SentMessage, TransportError, Update};

use crate::session_bridge::{CommandOutput, CommandRunner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentText {
    pub chat_id: i64,
    pub text: String,
    pub keyboard: Option<InlineKeyboardMarkup>,
}

/// Records every outbound call and replays queued `getUpdates` batches.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentText>>,
    edits: Mutex<Vec<(i64, String)>>,
    answers: Mutex<Vec<(String, Option<String>)>>,
    updates: Mutex<VecDeque<Result<Vec<Update>, String>>>,
    offsets: Mutex<Vec<i64>>,
    next_id: AtomicI64,
    fail_sends: AtomicBool,
    poll_delay: Mutex<Option<Duration>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<SentText> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.text).collect()
    }

    pub fn edits(&self) -> Vec<(i64, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn answers(&self) -> Vec<(String, Option<String>)> {
        self.answers.lock().unwrap().clone()
    }

    /// Offsets passed to `get_updates`, in call order.
    pub fn offsets(&self) -> Vec<i64> {
        self.offsets.lock().unwrap().clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Hold every `get_updates` call this long before answering it.
    pub fn set_poll_delay(&self, delay: Duration) {
        *self.poll_delay.lock().unwrap() = Some(delay);
    }

    pub fn push_updates(&self, updates: Vec<Update>) {
        self.updates.lock().unwrap().push_back(Ok(updates));
    }

    pub fn push_poll_error(&self, description: &str) {
        self.updates
            .lock()
            .unwrap()
            .push_back(Err(description.to_string()));
    }

    fn record(&self, chat_id: i64, text: &str, keyboard: Option<InlineKeyboardMarkup>) -> Result<SentMessage, TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Api {
                method: "sendMessage".into(),
                description: "simulated failure".into(),
            });
        }
        self.sent.lock().unwrap().push(SentText {
            chat_id,
            text: text.to_string(),
            keyboard,
        });
        Ok(SentMessage {
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<SentMessage, TransportError> {
        self.record(chat_id, text, None)
    }

    async fn send_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<SentMessage, TransportError> {
        self.record(chat_id, text, Some(keyboard))
    }

    async fn edit_message(&self, _chat_id: i64, message_id: i64, text: &str) -> Result<(), TransportError> {
        self.edits.lock().unwrap().push((message_id, text.to_string()));
        Ok(())
    }

    async fn answer_callback(&self, callback_query_id: &str, text: Option<&str>) -> Result<(), TransportError> {
        self.answers
            .lock()
            .unwrap()
            .push((callback_query_id.to_string(), text.map(str::to_string)));
        Ok(())
    }

    async fn get_updates(&self, offset: i64, _timeout_secs: u64) -> Result<Vec<Update>, TransportError> {
        self.offsets.lock().unwrap().push(offset);
        let delay = *self.poll_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.updates.lock().unwrap().pop_front();
        match next {
            Some(Ok(updates)) => Ok(updates),
            Some(Err(description)) => Err(TransportError::Api {
                method: "getUpdates".into(),
                description,
            }),
            None => {
                // Behave like an idle long poll.
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn get_me(&self) -> Result<BotUser, TransportError> {
        Ok(BotUser {
            id: 1,
            is_bot: true,
            first_name: "relay".into(),
            username: Some("relay_bot".into()),
        })
    }
}

/// Simulates tmux: tracks whether the session exists and records every call.
#[derive(Default)]
pub struct FakeTmux {
    calls: Mutex<Vec<Vec<String>>>,
    session_alive: AtomicBool,
    missing: AtomicBool,
    pane: Mutex<String>,
}

impl FakeTmux {
    pub fn with_session() -> Self {
        let fake = Self::default();
        fake.session_alive.store(true, Ordering::SeqCst);
        fake
    }

    pub fn missing() -> Self {
        let fake = Self::default();
        fake.missing.store(true, Ordering::SeqCst);
        fake
    }

    pub fn set_pane(&self, content: &str) {
        *self.pane.lock().unwrap() = content.to_string();
    }

    /// Subcommands issued (first argument of each call), e.g. `has-session`.
    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|args| args.first().cloned())
            .collect()
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeTmux {
    async fn run(&self, _program: &str, args: &[String], _cwd: Option<&Path>) -> io::Result<CommandOutput> {
        if self.missing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "tmux not found"));
        }
        self.calls.lock().unwrap().push(args.to_vec());

        let alive = self.session_alive.load(Ordering::SeqCst);
        let (success, stdout) = match args.first().map(String::as_str) {
            Some("-V") => (true, "tmux 3.4\n".to_string()),
            Some("has-session") => (alive, String::new()),
            Some("new-session") => {
                self.session_alive.store(true, Ordering::SeqCst);
                (true, String::new())
            }
            Some("kill-session") => {
                self.session_alive.store(false, Ordering::SeqCst);
                (alive, String::new())
            }
            Some("capture-pane") => (alive, self.pane.lock().unwrap().clone()),
            Some("send-keys") => (alive, String::new()),
            _ => (true, String::new()),
        };
        Ok(CommandOutput {
            success,
            stdout,
            stderr: if success { String::new() } else { "no server running".into() },
        })
    }
}
