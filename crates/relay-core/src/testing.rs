//! Test doubles for the messaging and persistence ports.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    applications::{ApplicationRecord, Snapshot, UserProfile},
    domain::{ChatId, MessageId, MessageRef, Sender, UserId},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{CopyOptions, InlineKeyboard, MessagingCapabilities},
    },
    persistence::ApplicationRepository,
    Result,
};

pub fn sender(id: i64) -> Sender {
    Sender {
        user_id: UserId(id),
        first_name: format!("User{id}"),
        last_name: None,
        username: Some(format!("user{id}")),
    }
}

/// Everything the fake messenger was asked to do, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Html {
        sent: MessageRef,
        html: String,
        reply_to: Option<MessageId>,
    },
    Edit {
        msg: MessageRef,
        html: String,
    },
    Forward {
        from: MessageRef,
        sent: MessageRef,
    },
    Copy {
        from: MessageRef,
        sent: MessageRef,
        reply_to: Option<MessageId>,
        caption_html: Option<String>,
    },
    Reaction {
        msg: MessageRef,
        emoji: String,
    },
    Keyboard {
        sent: MessageRef,
        html: String,
        keyboard: InlineKeyboard,
    },
    CallbackAnswer {
        callback_id: String,
        text: Option<String>,
        alert: bool,
    },
}

pub struct FakeMessenger {
    next_id: AtomicI32,
    log: Mutex<Vec<Outbound>>,
    unreachable: Mutex<HashSet<ChatId>>,
    reactions: AtomicBool,
}

impl Default for FakeMessenger {
    fn default() -> Self {
        Self {
            // Well above the ids tests use for inbound messages.
            next_id: AtomicI32::new(1000),
            log: Mutex::new(Vec::new()),
            unreachable: Mutex::new(HashSet::new()),
            reactions: AtomicBool::new(true),
        }
    }
}

impl FakeMessenger {
    pub fn without_reactions() -> Self {
        let m = Self::default();
        m.reactions.store(false, Ordering::SeqCst);
        m
    }

    /// Every send into `chat` fails from now on (e.g. the user blocked the bot).
    pub fn make_unreachable(&self, chat: ChatId) {
        self.unreachable.lock().unwrap().insert(chat);
    }

    pub fn outbound(&self) -> Vec<Outbound> {
        self.log.lock().unwrap().clone()
    }

    /// HTML bodies sent into `chat` (plain and keyboard messages).
    pub fn html_to(&self, chat: ChatId) -> Vec<String> {
        self.outbound()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Html { sent, html, .. } | Outbound::Keyboard { sent, html, .. }
                    if sent.chat_id == chat =>
                {
                    Some(html)
                }
                _ => None,
            })
            .collect()
    }

    pub fn forwards(&self) -> Vec<(MessageRef, MessageRef)> {
        self.outbound()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Forward { from, sent } => Some((from, sent)),
                _ => None,
            })
            .collect()
    }

    pub fn copies(&self) -> Vec<Outbound> {
        self.outbound()
            .into_iter()
            .filter(|o| matches!(o, Outbound::Copy { .. }))
            .collect()
    }

    pub fn edits(&self) -> Vec<(MessageRef, String)> {
        self.outbound()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Edit { msg, html } => Some((msg, html)),
                _ => None,
            })
            .collect()
    }

    pub fn keyboards(&self) -> Vec<(MessageRef, String, InlineKeyboard)> {
        self.outbound()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Keyboard {
                    sent,
                    html,
                    keyboard,
                } => Some((sent, html, keyboard)),
                _ => None,
            })
            .collect()
    }

    pub fn callback_answers(&self) -> Vec<(Option<String>, bool)> {
        self.outbound()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::CallbackAnswer { text, alert, .. } => Some((text, alert)),
                _ => None,
            })
            .collect()
    }

    fn check(&self, chat: ChatId) -> Result<()> {
        if self.unreachable.lock().unwrap().contains(&chat) {
            return Err(Error::External(format!(
                "telegram error: Forbidden: bot was blocked by the user ({chat})"
            )));
        }
        Ok(())
    }

    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        MessageRef::new(chat_id, MessageId(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    fn push(&self, o: Outbound) {
        self.log.lock().unwrap().push(o);
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_edit: true,
            supports_reactions: self.reactions.load(Ordering::SeqCst),
            max_message_len: 4096,
            max_caption_len: 1024,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.check(chat_id)?;
        let sent = self.alloc(chat_id);
        self.push(Outbound::Html {
            sent,
            html: html.to_string(),
            reply_to: None,
        });
        Ok(sent)
    }

    async fn reply_html(
        &self,
        chat_id: ChatId,
        html: &str,
        reply_to: MessageId,
    ) -> Result<MessageRef> {
        self.check(chat_id)?;
        let sent = self.alloc(chat_id);
        self.push(Outbound::Html {
            sent,
            html: html.to_string(),
            reply_to: Some(reply_to),
        });
        Ok(sent)
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.check(msg.chat_id)?;
        self.push(Outbound::Edit {
            msg,
            html: html.to_string(),
        });
        Ok(())
    }

    async fn forward_message(&self, to: ChatId, msg: MessageRef) -> Result<MessageRef> {
        self.check(to)?;
        let sent = self.alloc(to);
        self.push(Outbound::Forward { from: msg, sent });
        Ok(sent)
    }

    async fn copy_message(
        &self,
        to: ChatId,
        msg: MessageRef,
        opts: CopyOptions,
    ) -> Result<MessageRef> {
        self.check(to)?;
        let sent = self.alloc(to);
        self.push(Outbound::Copy {
            from: msg,
            sent,
            reply_to: opts.reply_to,
            caption_html: opts.caption_html,
        });
        Ok(sent)
    }

    async fn set_reaction(&self, msg: MessageRef, emoji: &str) -> Result<()> {
        self.push(Outbound::Reaction {
            msg,
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.check(chat_id)?;
        let sent = self.alloc(chat_id);
        self.push(Outbound::Keyboard {
            sent,
            html: html.to_string(),
            keyboard,
        });
        Ok(sent)
    }

    async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<()> {
        self.push(Outbound::CallbackAnswer {
            callback_id: callback_id.to_string(),
            text: text.map(str::to_string),
            alert,
        });
        Ok(())
    }
}

/// In-memory repository; `failing()` rejects every write.
#[derive(Default)]
pub struct FakeRepository {
    data: Mutex<Snapshot>,
    fail_writes: bool,
}

impl FakeRepository {
    pub fn failing() -> Self {
        Self {
            data: Mutex::new(Snapshot::default()),
            fail_writes: true,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.data.lock().unwrap().clone()
    }

    fn write(&self, f: impl FnOnce(&mut Snapshot)) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only data dir",
            )));
        }
        f(&mut self.data.lock().unwrap());
        Ok(())
    }
}

impl ApplicationRepository for FakeRepository {
    fn load_all(&self) -> Result<Snapshot> {
        Ok(self.snapshot())
    }

    fn append_application(&self, record: &ApplicationRecord) -> Result<()> {
        self.write(|s| s.applications.push(record.clone()))
    }

    fn update_application(&self, record: &ApplicationRecord) -> Result<()> {
        self.write(|s| {
            let user = record.applicant.user_id;
            if let Some(existing) = s
                .applications
                .iter_mut()
                .find(|a| a.is_for(user, &record.team_id))
            {
                *existing = record.clone();
            }
        })
    }

    fn upsert_user(&self, id: UserId, profile: &UserProfile) -> Result<()> {
        self.write(|s| {
            s.users.insert(id, profile.clone());
        })
    }

    fn clear(&self) -> Result<()> {
        self.write(|s| *s = Snapshot::default())
    }
}
