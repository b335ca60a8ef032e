use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    messaging::types::{CopyOptions, InlineKeyboard, MessagingCapabilities},
    Result,
};

/// Outbound messaging port.
///
/// The core only needs "deliver content to chat X, optionally threaded under
/// message Y, and tell me the new message id"; Telegram implements it in the
/// `relay-telegram` crate.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef>;

    /// Send as a threaded reply to `reply_to` (in the same chat).
    async fn reply_html(
        &self,
        chat_id: ChatId,
        html: &str,
        reply_to: MessageId,
    ) -> Result<MessageRef>;

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()>;

    /// Forward `msg` verbatim (with the platform's "forwarded from" header).
    async fn forward_message(&self, to: ChatId, msg: MessageRef) -> Result<MessageRef>;

    /// Copy `msg` into another chat without the forward header.
    async fn copy_message(
        &self,
        to: ChatId,
        msg: MessageRef,
        opts: CopyOptions,
    ) -> Result<MessageRef>;

    async fn set_reaction(&self, msg: MessageRef, emoji: &str) -> Result<()>;

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef>;

    async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<()>;
}
