use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

/// One selectable answer for a [`Question`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl QuestionOption {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: None,
        }
    }
}

/// A prompt with its ordered options, as sent by the ask hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

impl Question {
    pub fn new(question: impl Into<String>, options: Vec<QuestionOption>) -> Self {
        Self {
            question: question.into(),
            options,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Text,
    Option,
    Cancelled,
}

/// The answer recorded for a pending question. Hook scripts read `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_index: Option<usize>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Response {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Text,
            value: Some(value.into()),
            question_index: None,
            option_index: None,
            timestamp: now_millis(),
        }
    }

    pub fn option(label: impl Into<String>, question_index: usize, option_index: usize) -> Self {
        Self {
            kind: ResponseKind::Option,
            value: Some(label.into()),
            question_index: Some(question_index),
            option_index: Some(option_index),
            timestamp: now_millis(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: ResponseKind::Cancelled,
            value: None,
            question_index: None,
            option_index: None,
            timestamp: now_millis(),
        }
    }
}

/// Metadata about the agent session, pushed by the session hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub active: bool,
    pub cwd: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub started_at: Option<i64>,
}

/// Partial update for [`SessionMeta`]. Absent fields are left untouched,
/// explicit `null` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub cwd: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_present")]
    pub started_at: Option<Option<i64>>,
}

impl SessionMeta {
    pub fn merge(&mut self, update: SessionUpdate) {
        if let Some(active) = update.active {
            self.active = active;
        }
        if let Some(cwd) = update.cwd {
            self.cwd = cwd;
        }
        if let Some(started_at) = update.started_at {
            self.started_at = started_at;
        }
    }
}

fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// A command queued for the agent side to pick up via `GET /api/commands`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommand {
    pub command: String,
    #[serde(default)]
    pub args: String,
    pub queued_at: i64,
}

/// Inline keyboard `callback_data`. Kept compact: Telegram caps it at 64 bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(rename = "q", default, skip_serializing_if = "Option::is_none")]
    pub question_index: Option<usize>,
    #[serde(rename = "o", default, skip_serializing_if = "Option::is_none")]
    pub option_index: Option<usize>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub other: bool,
}

/// What a button press asks for, after validating the payload shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Select {
        correlation_id: Option<String>,
        question_index: usize,
        option_index: usize,
    },
    Other {
        correlation_id: Option<String>,
    },
}

impl CallbackPayload {
    pub fn select(correlation_id: &str, question_index: usize, option_index: usize) -> Self {
        Self {
            correlation_id: Some(correlation_id.to_string()),
            question_index: Some(question_index),
            option_index: Some(option_index),
            other: false,
        }
    }

    pub fn other(correlation_id: &str) -> Self {
        Self {
            correlation_id: Some(correlation_id.to_string()),
            other: true,
            ..Self::default()
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse raw `callback_data`. Returns `None` for malformed payloads.
    pub fn parse(data: &str) -> Option<CallbackAction> {
        let payload: CallbackPayload = serde_json::from_str(data).ok()?;
        if payload.other {
            return Some(CallbackAction::Other {
                correlation_id: payload.correlation_id,
            });
        }
        match (payload.question_index, payload.option_index) {
            (Some(question_index), Some(option_index)) => Some(CallbackAction::Select {
                correlation_id: payload.correlation_id,
                question_index,
                option_index,
            }),
            _ => None,
        }
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
