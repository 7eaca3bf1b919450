//! Question broker: correlates questions sent to the chat with the replies
//! that arrive later through the poll loop.
//!
//! `ask` registers a [`PendingQuestion`], posts it with an inline keyboard and
//! parks until a [`Response`] is recorded for its correlation id or the
//! timeout elapses. The poll loop records responses through
//! [`QuestionBroker::select_option`], [`QuestionBroker::take_free_text`] and
//! [`QuestionBroker::cancel_all`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tgrelay_channels::{ChatTransport, InlineKeyboardButton, InlineKeyboardMarkup, TransportError};
use tgrelay_schema::{CallbackPayload, Question, Response};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_ASK_TIMEOUT: Duration = Duration::from_millis(300_000);
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const OTHER_BUTTON_LABEL: &str = "📝 Other (type response)";

#[derive(Debug, Clone)]
pub struct PendingQuestion {
    pub correlation_id: String,
    pub questions: Vec<Question>,
    pub created_at: DateTime<Utc>,
    pub awaiting_free_text: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AskError {
    #[error("questions array required")]
    NoQuestions,

    #[error("no reply for {correlation_id} before the timeout")]
    Timeout { correlation_id: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("ask task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result of a button press on an option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    Recorded { label: String },
    InvalidOption,
    Expired,
}

#[derive(Debug, Default)]
struct Registry {
    /// Insertion ordered; "first pending" lookups walk from the front.
    pending: Vec<PendingQuestion>,
    responses: HashMap<String, Response>,
}

impl Registry {
    fn position(&self, correlation_id: Option<&str>) -> Option<usize> {
        match correlation_id {
            Some(id) => self.pending.iter().position(|p| p.correlation_id == id),
            None if self.pending.is_empty() => None,
            None => Some(0),
        }
    }

    fn resolve(&mut self, idx: usize, response: Response) -> String {
        let pending = self.pending.remove(idx);
        self.responses
            .insert(pending.correlation_id.clone(), response);
        pending.correlation_id
    }
}

#[derive(Clone)]
pub struct QuestionBroker {
    registry: Arc<Mutex<Registry>>,
    resolved: Arc<Notify>,
    transport: Arc<dyn ChatTransport>,
    chat_id: i64,
    poll_interval: Duration,
}

impl QuestionBroker {
    pub fn new(transport: Arc<dyn ChatTransport>, chat_id: i64) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            resolved: Arc::new(Notify::new()),
            transport,
            chat_id,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Post `questions` to the chat and wait up to `timeout` for the reply.
    ///
    /// The wait runs on its own task, so a caller that goes away (e.g. an
    /// HTTP client disconnecting) does not stop the timeout from purging the
    /// question.
    pub async fn ask(&self, questions: Vec<Question>, timeout: Duration) -> Result<Response, AskError> {
        if questions.is_empty() {
            return Err(AskError::NoQuestions);
        }

        let broker = self.clone();
        tokio::spawn(async move { broker.post_and_wait(questions, timeout).await }).await?
    }

    async fn post_and_wait(&self, questions: Vec<Question>, timeout: Duration) -> Result<Response, AskError> {
        let correlation_id = new_correlation_id();
        let (body, keyboard) = render_questions(&correlation_id, &questions);
        let text = format!("❓ *Claude needs your input*\n\n{body}");

        self.registry.lock().await.pending.push(PendingQuestion {
            correlation_id: correlation_id.clone(),
            questions,
            created_at: Utc::now(),
            awaiting_free_text: false,
        });

        let sent = match self.transport.send_keyboard(self.chat_id, &text, keyboard).await {
            Ok(sent) => sent,
            Err(err) => {
                self.discard(&correlation_id).await;
                return Err(err.into());
            }
        };
        info!(%correlation_id, timeout_ms = timeout.as_millis() as u64, "question posted");

        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a resolution in between is not missed.
            let woken = self.resolved.notified();
            if let Some(response) = self.take_response(&correlation_id).await {
                info!(%correlation_id, kind = ?response.kind, "question answered");
                return Ok(response);
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = (deadline - now).min(self.poll_interval);
            tokio::select! {
                _ = woken => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }

        {
            let mut registry = self.registry.lock().await;
            registry
                .pending
                .retain(|p| p.correlation_id != correlation_id);
            if let Some(response) = registry.responses.remove(&correlation_id) {
                return Ok(response);
            }
        }

        warn!(%correlation_id, "question timed out");
        let expired = format!("⌛ *Question timed out*\n\n{body}\n_Answer locally in the terminal._");
        if let Err(err) = self
            .transport
            .edit_message(self.chat_id, sent.message_id, &expired)
            .await
        {
            debug!("failed to mark question as expired: {err}");
        }

        Err(AskError::Timeout { correlation_id })
    }

    /// Read-once access to a recorded response.
    pub async fn take_response(&self, correlation_id: &str) -> Option<Response> {
        self.registry.lock().await.responses.remove(correlation_id)
    }

    /// Record the option at `(question_index, option_index)`. Without a
    /// correlation id the oldest pending question is used.
    pub async fn select_option(
        &self,
        correlation_id: Option<&str>,
        question_index: usize,
        option_index: usize,
    ) -> SelectOutcome {
        let mut registry = self.registry.lock().await;
        let Some(idx) = registry.position(correlation_id) else {
            return SelectOutcome::Expired;
        };

        let label = registry.pending[idx]
            .questions
            .get(question_index)
            .and_then(|q| q.options.get(option_index))
            .map(|o| o.label.clone());
        let Some(label) = label else {
            return SelectOutcome::InvalidOption;
        };

        let id = registry.resolve(
            idx,
            Response::option(label.clone(), question_index, option_index),
        );
        drop(registry);
        self.resolved.notify_waiters();
        debug!(correlation_id = %id, %label, "option recorded");
        SelectOutcome::Recorded { label }
    }

    /// Mark a question as waiting for a typed reply. Returns `false` when no
    /// matching question is pending.
    pub async fn request_free_text(&self, correlation_id: Option<&str>) -> bool {
        let mut registry = self.registry.lock().await;
        match registry.position(correlation_id) {
            Some(idx) => {
                registry.pending[idx].awaiting_free_text = true;
                true
            }
            None => false,
        }
    }

    /// Consume `text` as the answer to the oldest question awaiting a typed
    /// reply. Returns the correlation id it resolved, if any.
    pub async fn take_free_text(&self, text: &str) -> Option<String> {
        let mut registry = self.registry.lock().await;
        let idx = registry
            .pending
            .iter()
            .position(|p| p.awaiting_free_text)?;
        let id = registry.resolve(idx, Response::text(text));
        drop(registry);
        self.resolved.notify_waiters();
        Some(id)
    }

    /// Resolve every pending question as cancelled. Returns how many were pending.
    pub async fn cancel_all(&self) -> usize {
        let mut registry = self.registry.lock().await;
        let count = registry.pending.len();
        while !registry.pending.is_empty() {
            registry.resolve(0, Response::cancelled());
        }
        drop(registry);
        if count > 0 {
            self.resolved.notify_waiters();
        }
        count
    }

    pub async fn pending_count(&self) -> usize {
        self.registry.lock().await.pending.len()
    }

    pub async fn pending_snapshot(&self) -> Vec<PendingQuestion> {
        self.registry.lock().await.pending.clone()
    }

    async fn discard(&self, correlation_id: &str) {
        self.registry
            .lock()
            .await
            .pending
            .retain(|p| p.correlation_id != correlation_id);
    }
}

fn new_correlation_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Render the question text and keyboard: one row per question's options,
/// then a row with the free-text button.
pub fn render_questions(
    correlation_id: &str,
    questions: &[Question],
) -> (String, InlineKeyboardMarkup) {
    let mut lines = Vec::new();
    let mut rows = Vec::new();

    for (q_idx, question) in questions.iter().enumerate() {
        lines.push(format!("*{}. {}*", q_idx + 1, question.question));

        if !question.options.is_empty() {
            let mut row = Vec::with_capacity(question.options.len());
            for (o_idx, option) in question.options.iter().enumerate() {
                match &option.description {
                    Some(desc) => lines.push(format!("   {}) {} - {desc}", o_idx + 1, option.label)),
                    None => lines.push(format!("   {}) {}", o_idx + 1, option.label)),
                }
                row.push(InlineKeyboardButton {
                    text: option.label.clone(),
                    callback_data: CallbackPayload::select(correlation_id, q_idx, o_idx).encode(),
                });
            }
            rows.push(row);
        }

        lines.push(String::new());
    }

    rows.push(vec![InlineKeyboardButton {
        text: OTHER_BUTTON_LABEL.to_string(),
        callback_data: CallbackPayload::other(correlation_id).encode(),
    }]);

    (
        lines.join("\n"),
        InlineKeyboardMarkup {
            inline_keyboard: rows,
        },
    )
}
