use async_trait::async_trait;

pub mod telegram;

pub use telegram::types::{
    BotUser, CallbackQuery, Chat, InlineKeyboardButton, InlineKeyboardMarkup, Message,
    SentMessage, Update, User,
};
pub use telegram::{chunk_text, TelegramClient, TransportError, CHUNK_LIMIT};

/// Request/response surface of the remote chat service.
///
/// The worker only ever talks to one chat, so every call is stateless and
/// can be retried by the caller.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send text, split into several messages if it exceeds [`CHUNK_LIMIT`].
    /// Returns the last message sent.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<SentMessage, TransportError>;

    async fn send_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<SentMessage, TransportError>;

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TransportError>;

    async fn answer_callback(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError>;

    async fn get_updates(&self, offset: i64, timeout_secs: u64)
        -> Result<Vec<Update>, TransportError>;

    async fn get_me(&self) -> Result<BotUser, TransportError>;
}
