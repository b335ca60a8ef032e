//! Relay Router: moves messages between users' private chats and the admin
//! group and keeps the Message Store in sync.
//!
//! Routing cases:
//! - new user message: forwarded to the admin group
//! - user reply (or any message during an open session): threaded under the
//!   matching admin-group message
//! - admin reply to a relayed message: delivered to the user, threaded under
//!   the user's original message
//! - admin reply to anything else: "cannot find the original user"
//!
//! A reply whose target is not in the store is forwarded as new, and the
//! admins see a notice threaded under the copy saying so.
//!
//! A link is recorded only after its send succeeded. Text longer than the
//! platform limit is sent in parts; the link points at the first part.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    audit::{AuditEvent, AuditLogger},
    callbacks::CallbackAction,
    domain::{ChatId, MessageId, MessageRef, UserId},
    formatting::{escape_html, escaped_chunks, shrink_to_fit, truncate_text},
    locks::KeyedLocks,
    messaging::{
        port::MessagingPort,
        types::{ChatMessage, Content, CopyOptions, InlineButton, InlineKeyboard},
    },
    store::{Direction, MessageLink, MessageStore},
    texts, Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteDecision {
    NewUserMessage {
        /// The message was a reply, but its target is not in the store.
        unresolved_reply: bool,
    },
    UserReply {
        thread: MessageRef,
    },
    AdminReply {
        link: MessageLink,
    },
    OriginNotFound,
    Ignore,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    Forwarded {
        link: MessageLink,
        unresolved_reply: bool,
    },
    ThreadedToAdmin {
        link: MessageLink,
    },
    DeliveredToUser {
        link: MessageLink,
        session_opened: bool,
    },
    OriginNotFound,
    Ignored,
    Failed {
        reason: String,
    },
}

pub struct RelayRouter {
    messenger: Arc<dyn MessagingPort>,
    store: Arc<MessageStore>,
    admin_chat: ChatId,
    locks: KeyedLocks<UserId>,
    audit: Arc<AuditLogger>,
}

impl RelayRouter {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        store: Arc<MessageStore>,
        admin_chat: ChatId,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            messenger,
            store,
            admin_chat,
            locks: KeyedLocks::default(),
            audit,
        }
    }

    pub async fn classify(&self, msg: &ChatMessage) -> RouteDecision {
        if msg.chat_id == self.admin_chat {
            let Some(target) = msg.reply_target() else {
                return RouteDecision::Ignore;
            };
            return match self.store.resolve(target).await {
                Some(link) => RouteDecision::AdminReply { link },
                None => RouteDecision::OriginNotFound,
            };
        }

        let user = msg.sender.user_id;
        if msg.chat_id != user.private_chat() {
            return RouteDecision::Ignore;
        }

        let mut unresolved_reply = false;
        if let Some(target) = msg.reply_target() {
            match self.store.resolve(target).await {
                Some(link) if link.user_id == user => {
                    return RouteDecision::UserReply {
                        thread: link.admin_side(),
                    }
                }
                _ => unresolved_reply = true,
            }
        }

        match self.store.open_thread(user).await {
            Some(thread) => RouteDecision::UserReply { thread },
            None => RouteDecision::NewUserMessage { unresolved_reply },
        }
    }

    pub async fn route(&self, msg: &ChatMessage) -> RouteOutcome {
        let outcome = match self.classify(msg).await {
            RouteDecision::Ignore => RouteOutcome::Ignored,
            RouteDecision::NewUserMessage { unresolved_reply } => {
                if unresolved_reply {
                    warn!(
                        user = msg.sender.user_id.0,
                        msg = %msg.message_ref(),
                        "user reply target not found, forwarding as new message"
                    );
                }
                self.forward_new(msg, unresolved_reply).await
            }
            RouteDecision::UserReply { thread } => self.thread_to_admin(msg, thread).await,
            RouteDecision::AdminReply { link } => self.deliver_to_user(msg, link).await,
            RouteDecision::OriginNotFound => {
                warn!(msg = %msg.message_ref(), "admin reply to an unknown message");
                self.reply_quietly(self.admin_chat, texts::ORIGIN_NOT_FOUND, msg.message_id)
                    .await;
                RouteOutcome::OriginNotFound
            }
        };
        debug!(msg = %msg.message_ref(), ?outcome, "routed");
        outcome
    }

    async fn forward_new(&self, msg: &ChatMessage, unresolved_reply: bool) -> RouteOutcome {
        let user = msg.sender.user_id;
        let sent = {
            let _guard = self.locks.lock(user).await;
            match self
                .messenger
                .forward_message(self.admin_chat, msg.message_ref())
                .await
            {
                Ok(copy) => {
                    let link = self.record(msg, copy, user, Direction::UserToAdmin).await;
                    Ok(link)
                }
                Err(e) => Err(e),
            }
        };

        match sent {
            Ok(link) => {
                info!(user = user.0, target = %link.target, "forwarded user message");
                if unresolved_reply {
                    self.reply_quietly(
                        self.admin_chat,
                        texts::REPLY_TARGET_NOT_FOUND,
                        link.target.message_id,
                    )
                    .await;
                }
                self.reply_quietly(msg.chat_id, texts::RECEIVED, msg.message_id)
                    .await;
                RouteOutcome::Forwarded {
                    link,
                    unresolved_reply,
                }
            }
            Err(e) => self.user_side_failure(msg, texts::SEND_FAILED, e).await,
        }
    }

    async fn thread_to_admin(&self, msg: &ChatMessage, thread: MessageRef) -> RouteOutcome {
        let user = msg.sender.user_id;
        let header = texts::user_reply_header(&msg.sender);
        let sent = {
            let _guard = self.locks.lock(user).await;
            let res = match &msg.content {
                Content::Text(text) => {
                    reply_in_chunks(
                        self.messenger.as_ref(),
                        self.admin_chat,
                        &format!("{header}\n"),
                        text,
                        thread.message_id,
                    )
                    .await
                }
                Content::Media { caption } => {
                    let opts = CopyOptions {
                        reply_to: Some(thread.message_id),
                        caption_html: Some(self.caption(&header, caption.as_deref())),
                    };
                    self.messenger
                        .copy_message(self.admin_chat, msg.message_ref(), opts)
                        .await
                }
            };
            match res {
                Ok(copy) => Ok(self.record(msg, copy, user, Direction::UserToAdmin).await),
                Err(e) => Err(e),
            }
        };

        match sent {
            Ok(link) => {
                info!(user = user.0, thread = %thread, "threaded user reply to admins");
                self.reply_quietly(msg.chat_id, texts::REPLY_RECEIVED, msg.message_id)
                    .await;
                RouteOutcome::ThreadedToAdmin { link }
            }
            Err(e) => self.user_side_failure(msg, texts::REPLY_FAILED, e).await,
        }
    }

    async fn deliver_to_user(&self, msg: &ChatMessage, origin: MessageLink) -> RouteOutcome {
        let user = origin.user_id;
        let user_msg = origin.user_side();
        let admin_name = msg.sender.full_name();

        let sent = {
            let _guard = self.locks.lock(user).await;
            let res = match &msg.content {
                Content::Text(text) => {
                    reply_in_chunks(
                        self.messenger.as_ref(),
                        user_msg.chat_id,
                        &format!("{}\n\n", texts::ADMIN_REPLY_HEADER),
                        text,
                        user_msg.message_id,
                    )
                    .await
                }
                Content::Media { caption } => {
                    let opts = CopyOptions {
                        reply_to: Some(user_msg.message_id),
                        caption_html: Some(
                            self.caption(texts::ADMIN_REPLY_HEADER, caption.as_deref()),
                        ),
                    };
                    self.messenger
                        .copy_message(user_msg.chat_id, msg.message_ref(), opts)
                        .await
                }
            };
            match res {
                Ok(copy) => {
                    let link = self.record(msg, copy, user, Direction::AdminToUser).await;
                    let opened = self
                        .store
                        .open_session(user, msg.sender.user_id, &admin_name, msg.message_ref())
                        .await;
                    Ok((link, opened))
                }
                Err(e) => Err(e),
            }
        };

        let (link, session_opened) = match sent {
            Ok(v) => v,
            Err(e) => {
                warn!(user = user.0, "failed to deliver admin reply: {e}");
                self.audit
                    .record(AuditEvent::error(user, &e.to_string(), Some("admin reply")));
                self.reply_quietly(
                    self.admin_chat,
                    &texts::admin_delivery_failed(&e.to_string()),
                    msg.message_id,
                )
                .await;
                return RouteOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };
        info!(user = user.0, admin = %admin_name, "delivered admin reply");

        if session_opened {
            self.audit
                .record(AuditEvent::session(user, true, &admin_name));
            let keyboard = InlineKeyboard::new(vec![vec![InlineButton::new(
                texts::END_CHAT_LABEL,
                CallbackAction::EndChat(user).encode(),
            )]]);
            let notice = texts::session_opened(&user.to_string(), &admin_name);
            if let Err(e) = self
                .messenger
                .send_inline_keyboard(self.admin_chat, &notice, keyboard)
                .await
            {
                warn!(user = user.0, "failed to post session notice: {e}");
            }
        }

        if let Err(e) = self.confirm_to_admin(msg).await {
            warn!(msg = %msg.message_ref(), "failed to confirm delivery to admin: {e}");
        }

        RouteOutcome::DeliveredToUser {
            link,
            session_opened,
        }
    }

    /// Reaction where the platform has them, a short threaded reply otherwise.
    async fn confirm_to_admin(&self, msg: &ChatMessage) -> Result<()> {
        if self.messenger.capabilities().supports_reactions {
            self.messenger
                .set_reaction(msg.message_ref(), texts::SENT_REACTION)
                .await
        } else {
            self.messenger
                .reply_html(self.admin_chat, texts::ADMIN_REPLY_SENT, msg.message_id)
                .await
                .map(|_| ())
        }
    }

    async fn record(
        &self,
        msg: &ChatMessage,
        target: MessageRef,
        user_id: UserId,
        direction: Direction,
    ) -> MessageLink {
        let link = MessageLink {
            source: msg.message_ref(),
            target,
            user_id,
            direction,
        };
        self.store.record_link(link).await;
        self.audit.record(AuditEvent::relay(
            direction,
            user_id,
            link.source,
            link.target,
            msg.content.text(),
        ));
        link
    }

    async fn user_side_failure(
        &self,
        msg: &ChatMessage,
        notice: &str,
        e: crate::Error,
    ) -> RouteOutcome {
        let user = msg.sender.user_id;
        warn!(user = user.0, msg = %msg.message_ref(), "failed to relay user message: {e}");
        self.audit
            .record(AuditEvent::error(user, &e.to_string(), Some("relay to admins")));
        self.reply_quietly(msg.chat_id, notice, msg.message_id).await;
        RouteOutcome::Failed {
            reason: e.to_string(),
        }
    }

    async fn reply_quietly(&self, chat: ChatId, html: &str, reply_to: MessageId) {
        if let Err(e) = self.messenger.reply_html(chat, html, reply_to).await {
            warn!(chat = chat.0, "failed to send notice: {e}");
        }
    }

    /// Header plus the original caption, clipped to the caption limit.
    fn caption(&self, header: &str, caption: Option<&str>) -> String {
        let Some(c) = caption.map(str::trim).filter(|c| !c.is_empty()) else {
            return header.to_string();
        };
        let max = self.messenger.capabilities().max_caption_len;
        shrink_to_fit(max, c.chars().count(), |limit| {
            format!("{header}\n{}", escape_html(&truncate_text(c, limit)))
        })
    }
}

/// Send `head` plus the escaped `text`, split into parts that fit the
/// platform limit, each threaded under `reply_to`. Returns the first part.
pub(crate) async fn reply_in_chunks(
    messenger: &dyn MessagingPort,
    chat: ChatId,
    head: &str,
    text: &str,
    reply_to: MessageId,
) -> Result<MessageRef> {
    let max = messenger.capabilities().max_message_len;
    let chunks = escaped_chunks(head, text, max);
    if chunks.len() > 1 {
        debug!(chat = chat.0, parts = chunks.len(), "splitting long message");
    }
    let mut first = None;
    for html in &chunks {
        let sent = messenger.reply_html(chat, html, reply_to).await?;
        first.get_or_insert(sent);
    }
    first.ok_or_else(|| crate::Error::External("nothing to send".to_string()))
}
