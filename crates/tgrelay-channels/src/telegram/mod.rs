//! Raw HTTP client for the Telegram Bot API.
//!
//! Every method is a JSON POST to `<base>/bot<token>/<method>`. A response
//! counts as successful only when the HTTP status is 2xx and the envelope
//! carries `ok: true`.

pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::ChatTransport;
use types::{ApiResponse, BotUser, InlineKeyboardMarkup, SentMessage, Update};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Safe per-message size, below Telegram's 4096 character cap.
pub const CHUNK_LIMIT: usize = 3500;

const PARSE_MODE: &str = "Markdown";

/// Must exceed the longest `getUpdates` long-poll timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Telegram API {method} request failed: {source}")]
    Http {
        method: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Telegram API {method} failed: HTTP {status} {body}")]
    Status {
        method: String,
        status: u16,
        body: String,
    },

    #[error("Telegram API {method} error: {description}")]
    Api { method: String, description: String },
}

impl TransportError {
    fn is_markup_rejection(&self) -> bool {
        let text = match self {
            TransportError::Status { body, .. } => body,
            TransportError::Api { description, .. } => description,
            TransportError::Http { .. } => return false,
        };
        text.contains("can't parse entities")
    }
}

pub struct TelegramClient {
    client: Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(bot_token: &str) -> Self {
        Self::with_base_url(bot_token, DEFAULT_API_BASE)
    }

    /// Point the client at another Bot API server (self-hosted, or a mock in tests).
    pub fn with_base_url(bot_token: &str, base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: format!("{}/bot{}", base_url.trim_end_matches('/'), bot_token),
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: Value,
    ) -> Result<T, TransportError> {
        let resp = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|source| TransportError::Http {
                method: method.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                method: method.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let envelope: ApiResponse<T> =
            resp.json().await.map_err(|source| TransportError::Http {
                method: method.to_string(),
                source,
            })?;

        if !envelope.ok {
            return Err(TransportError::Api {
                method: method.to_string(),
                description: envelope.description.unwrap_or_default(),
            });
        }

        envelope.result.ok_or_else(|| TransportError::Api {
            method: method.to_string(),
            description: "response carried no result".to_string(),
        })
    }

    /// Send one chunk as Markdown, falling back to plain text when Telegram
    /// rejects the markup (unbalanced `*` or `_` in user supplied text).
    async fn send_chunk(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<SentMessage, TransportError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": PARSE_MODE,
            "disable_web_page_preview": true,
        });
        if let Some(markup) = keyboard {
            body["reply_markup"] = json!(markup);
        }

        match self.request::<SentMessage>("sendMessage", body.clone()).await {
            Err(err) if err.is_markup_rejection() => {
                debug!("sendMessage markup rejected, retrying as plain text");
                if let Some(map) = body.as_object_mut() {
                    map.remove("parse_mode");
                }
                self.request("sendMessage", body).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<SentMessage, TransportError> {
        let chunks = chunk_text(text, CHUNK_LIMIT);
        let total = chunks.len();
        let mut last = None;
        for (idx, chunk) in chunks.iter().enumerate() {
            debug!(chat_id, chunk = idx + 1, total, "sendMessage");
            last = Some(self.send_chunk(chat_id, chunk, None).await?);
        }
        // chunk_text always yields at least one chunk
        last.ok_or_else(|| TransportError::Api {
            method: "sendMessage".to_string(),
            description: "nothing to send".to_string(),
        })
    }

    async fn send_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<SentMessage, TransportError> {
        self.send_chunk(chat_id, text, Some(&keyboard)).await
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TransportError> {
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": PARSE_MODE,
            "disable_web_page_preview": true,
        });
        self.request::<Value>("editMessageText", body).await?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut body = json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.request::<bool>("answerCallbackQuery", body).await?;
        Ok(())
    }

    async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TransportError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        let updates: Vec<Update> = self.request("getUpdates", body).await?;
        if !updates.is_empty() {
            debug!(count = updates.len(), offset, "getUpdates returned updates");
        }
        Ok(updates)
    }

    async fn get_me(&self) -> Result<BotUser, TransportError> {
        self.request("getMe", json!({})).await.inspect_err(|err| {
            warn!("getMe failed: {err}");
        })
    }
}

/// Split `text` into pieces of at most `max_len` characters.
///
/// Splits happen at line breaks (the break itself is dropped, so joining the
/// chunks with `'\n'` restores the input). A single line longer than
/// `max_len` is hard-split. Text that already fits is returned untouched.
pub fn chunk_text(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 || text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut buffer: Option<String> = None;
    let mut buffer_len = 0usize;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        match buffer.as_mut() {
            Some(buf) if buffer_len + 1 + line_len <= max_len => {
                buf.push('\n');
                buf.push_str(line);
                buffer_len += 1 + line_len;
            }
            _ => {
                if let Some(buf) = buffer.take() {
                    chunks.push(buf);
                }
                if line_len > max_len {
                    let chars: Vec<char> = line.chars().collect();
                    for piece in chars.chunks(max_len) {
                        chunks.push(piece.iter().collect());
                    }
                    buffer_len = 0;
                } else {
                    buffer = Some(line.to_string());
                    buffer_len = line_len;
                }
            }
        }
    }

    if let Some(buf) = buffer {
        chunks.push(buf);
    }
    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_not_split() {
        assert_eq!(chunk_text("hello\nworld", 100), vec!["hello\nworld"]);
        assert_eq!(chunk_text("", 10), vec![""]);
    }

    #[test]
    fn splits_on_line_breaks_and_reassembles() {
        let text = (0..50)
            .map(|i| format!("line number {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_text(&text, 64);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 64));
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn blank_lines_survive_splitting() {
        let text = format!("\n\n{}\n\n{}\n", "a".repeat(8), "b".repeat(8));
        let chunks = chunk_text(&text, 10);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn oversized_line_is_hard_split() {
        let text = format!("head\n{}\ntail", "x".repeat(25));
        let chunks = chunk_text(&text, 10);
        assert_eq!(
            chunks,
            vec!["head", "xxxxxxxxxx", "xxxxxxxxxx", "xxxxx", "tail"]
        );
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "é".repeat(10);
        assert_eq!(chunk_text(&text, 10), vec![text.clone()]);
        let chunks = chunk_text(&"é".repeat(11), 10);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn markup_rejection_detection() {
        let err = TransportError::Api {
            method: "sendMessage".into(),
            description: "Bad Request: can't parse entities: unclosed".into(),
        };
        assert!(err.is_markup_rejection());
        let err = TransportError::Status {
            method: "sendMessage".into(),
            status: 500,
            body: "oops".into(),
        };
        assert!(!err.is_markup_rejection());
    }
}
