//! Telegram update handlers.
//!
//! Each handler translates a teloxide update into a core `IncomingUpdate`,
//! serialises it per chat and hands it to `RelayBot`. Handlers never fail the
//! dispatcher; errors are logged by the core.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message, User},
};
use tracing::{debug, warn};

use relay_core::{
    domain::{ChatId, MessageId, MessageRef, Sender, UserId},
    messaging::types::{
        CallbackQuery as CoreCallback, ChatMessage, Command as CoreCommand, Content, IncomingUpdate,
    },
};

use crate::router::AppState;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let Some(data) = q.data.clone() else {
        // Nothing to dispatch on; just stop the client's spinner.
        if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
            warn!(user = q.from.id.0, "failed to answer empty callback: {e}");
        }
        return Ok(());
    };

    let message = q.message.as_ref();
    let update = CoreCallback {
        callback_id: q.id.clone(),
        sender: to_sender(&q.from),
        data,
        message: message.map(|m| MessageRef::new(ChatId(m.chat.id.0), MessageId(m.id.0))),
        message_text: message.and_then(|m| m.text().or(m.caption()).map(str::to_string)),
    };

    let lock_key = message.map(|m| m.chat.id.0).unwrap_or(q.from.id.0 as i64);
    let _guard = state.chat_locks.lock(lock_key).await;
    state.bot.handle(IncomingUpdate::Callback(update)).await;
    Ok(())
}

pub async fn handle_message(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }

    let Some(update) = to_update(&msg, user) else {
        debug!(chat = msg.chat.id.0, "ignoring service message");
        return Ok(());
    };

    let _guard = state.chat_locks.lock(msg.chat.id.0).await;
    state.bot.handle(update).await;
    Ok(())
}

fn to_update(msg: &Message, user: &User) -> Option<IncomingUpdate> {
    let chat_id = ChatId(msg.chat.id.0);
    let message_id = MessageId(msg.id.0);
    let sender = to_sender(user);

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return Some(IncomingUpdate::Command(CoreCommand {
                chat_id,
                message_id,
                sender,
                name: parse_command(text),
            }));
        }
    }

    let content = match msg.text() {
        Some(text) => Content::Text(text.to_string()),
        None if has_media(msg) => Content::Media {
            caption: msg.caption().map(str::to_string),
        },
        None => return None,
    };

    Some(IncomingUpdate::Message(ChatMessage {
        chat_id,
        message_id,
        sender,
        reply_to: msg.reply_to_message().map(|r| MessageId(r.id.0)),
        content,
    }))
}

fn has_media(msg: &Message) -> bool {
    msg.photo().is_some()
        || msg.document().is_some()
        || msg.voice().is_some()
        || msg.video().is_some()
        || msg.audio().is_some()
        || msg.animation().is_some()
        || msg.sticker().is_some()
        || msg.video_note().is_some()
        || msg.contact().is_some()
        || msg.location().is_some()
}

fn to_sender(user: &User) -> Sender {
    Sender {
        user_id: UserId(user.id.0 as i64),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
    }
}

/// Lower-cased command name. Arguments are ignored; no command takes any.
fn parse_command(text: &str) -> String {
    // Telegram may send `/cmd@botname arg1 ...`
    let first = text.split_whitespace().next().unwrap_or("");
    first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_with_bot_suffix_and_args() {
        assert_eq!(parse_command("/Stats@our_goal_bot  now please"), "stats");
        assert_eq!(parse_command("/start"), "start");
    }
}
