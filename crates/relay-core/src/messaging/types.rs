use crate::domain::{ChatId, MessageId, MessageRef, Sender};

/// Platform-neutral inbound update.
///
/// Telegram-specific fields stay in the Telegram adapter.
#[derive(Clone, Debug)]
pub enum IncomingUpdate {
    Command(Command),
    Message(ChatMessage),
    Callback(CallbackQuery),
}

#[derive(Clone, Debug)]
pub struct Command {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub sender: Sender,
    /// Lower-cased, without the leading `/` or a `@botname` suffix.
    pub name: String,
}

/// Message body as far as routing is concerned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Content {
    Text(String),
    /// Photo, document, voice, sticker, ...: relayed by copying the original.
    Media { caption: Option<String> },
}

impl Content {
    pub fn text(&self) -> Option<&str> {
        match self {
            Content::Text(t) => Some(t),
            Content::Media { .. } => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChatMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub sender: Sender,
    pub reply_to: Option<MessageId>,
    pub content: Content,
}

impl ChatMessage {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef::new(self.chat_id, self.message_id)
    }

    pub fn reply_target(&self) -> Option<MessageRef> {
        self.reply_to.map(|id| MessageRef::new(self.chat_id, id))
    }
}

#[derive(Clone, Debug)]
pub struct CallbackQuery {
    pub callback_id: String,
    pub sender: Sender,
    pub data: String,
    /// The message carrying the pressed button, if the platform still has it.
    pub message: Option<MessageRef>,
    /// Plain text of that message (used when annotating it).
    pub message_text: Option<String>,
}

impl CallbackQuery {
    pub fn chat_id(&self) -> Option<ChatId> {
        self.message.map(|m| m.chat_id)
    }
}

/// Options for `MessagingPort::copy_message`.
#[derive(Clone, Debug, Default)]
pub struct CopyOptions {
    pub reply_to: Option<MessageId>,
    /// Replacement caption (HTML) for media copies.
    pub caption_html: Option<String>,
}

/// Inline keyboard (rows of callback buttons).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

impl InlineKeyboard {
    pub fn new(rows: Vec<Vec<InlineButton>>) -> Self {
        Self { rows }
    }

    /// Lay buttons out `per_row` to a row; the last row may be shorter.
    pub fn grid(buttons: Vec<InlineButton>, per_row: usize) -> Self {
        let per_row = per_row.max(1);
        let mut rows = Vec::new();
        let mut row = Vec::with_capacity(per_row);
        for b in buttons {
            row.push(b);
            if row.len() == per_row {
                rows.push(std::mem::take(&mut row));
            }
        }
        if !row.is_empty() {
            rows.push(row);
        }
        Self { rows }
    }

    pub fn buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.rows.iter().flatten()
    }
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_edit: bool,
    pub supports_reactions: bool,
    pub max_message_len: usize,
    pub max_caption_len: usize,
}
