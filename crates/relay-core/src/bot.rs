//! Bot orchestration: turns `IncomingUpdate`s into application-flow steps,
//! admin actions and relay routing.

use std::sync::Arc;

use chrono::Local;
use tracing::{error, info, warn};

use crate::{
    applications::{
        ApplicationBook, ApplicationRecord, DecisionKind, DecisionOutcome, SubmitOutcome,
    },
    audit::{AuditEvent, AuditLogger},
    callbacks::CallbackAction,
    conversation::{ApplicationDraft, ConversationRegistry, Input, Step},
    domain::{ChatId, MessageRef, TeamId, UserId},
    formatting::{html_len, shrink_to_fit},
    messaging::{
        port::MessagingPort,
        types::{
            CallbackQuery, ChatMessage, Command, Content, IncomingUpdate, InlineButton,
            InlineKeyboard,
        },
    },
    relay::{reply_in_chunks, RelayRouter},
    store::{Direction, MessageLink, MessageStore},
    teams::TeamCatalog,
    texts, Result,
};

const TEAM_BUTTONS_PER_ROW: usize = 2;
/// Left free in the notification for the decision line added later.
const ANNOTATION_ROOM: usize = 256;

pub struct RelayBot {
    messenger: Arc<dyn MessagingPort>,
    router: RelayRouter,
    store: Arc<MessageStore>,
    conversations: ConversationRegistry,
    book: Arc<ApplicationBook>,
    teams: TeamCatalog,
    admin_chat: ChatId,
    audit: Arc<AuditLogger>,
}

impl RelayBot {
    pub fn new(
        admin_chat: ChatId,
        messenger: Arc<dyn MessagingPort>,
        book: Arc<ApplicationBook>,
        store: Arc<MessageStore>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        let router = RelayRouter::new(
            Arc::clone(&messenger),
            Arc::clone(&store),
            admin_chat,
            Arc::clone(&audit),
        );
        Self {
            messenger,
            router,
            store,
            conversations: ConversationRegistry::new(),
            book,
            teams: TeamCatalog::default(),
            admin_chat,
            audit,
        }
    }

    /// Handle one update. Failures are logged and contained here.
    pub async fn handle(&self, update: IncomingUpdate) {
        let (user, res) = match &update {
            IncomingUpdate::Command(cmd) => (cmd.sender.user_id, self.on_command(cmd).await),
            IncomingUpdate::Message(msg) => (msg.sender.user_id, self.on_message(msg).await),
            IncomingUpdate::Callback(q) => (q.sender.user_id, self.on_callback(q).await),
        };
        if let Err(e) = res {
            error!(user = user.0, "update handling failed: {e}");
            self.audit
                .record(AuditEvent::error(user, &e.to_string(), None));
        }
    }

    fn is_admin_chat(&self, chat: ChatId) -> bool {
        chat == self.admin_chat
    }

    // ============== Commands ==============

    async fn on_command(&self, cmd: &Command) -> Result<()> {
        let chat = cmd.chat_id;
        let in_admin_chat = self.is_admin_chat(chat);
        match cmd.name.as_str() {
            "start" if !in_admin_chat => {
                self.conversations.reset(cmd.sender.user_id).await;
                self.book.touch_user(&cmd.sender, false).await;
                self.messenger
                    .send_inline_keyboard(chat, texts::WELCOME, self.team_keyboard())
                    .await?;
            }
            "menu" | "help" => {
                self.messenger.send_html(chat, texts::MENU).await?;
            }
            "cancel" if !in_admin_chat => {
                let step = self
                    .conversations
                    .apply(cmd.sender.user_id, Input::Cancel)
                    .await;
                if step == (Step::Cancelled { was_in_flow: true }) {
                    info!(user = cmd.sender.user_id.0, "application flow cancelled");
                }
                self.messenger.send_html(chat, texts::CANCELLED).await?;
            }
            "stats" | "clear" if !in_admin_chat => {
                self.messenger.send_html(chat, texts::ADMIN_ONLY).await?;
            }
            "stats" => {
                let stats = self.book.stats().await;
                let html = if stats.total_applications == 0 && stats.total_users == 0 {
                    texts::NO_APPLICATIONS_YET.to_string()
                } else {
                    texts::stats_report(
                        &stats,
                        &self.teams,
                        self.store.active_sessions().await,
                        self.store.link_count().await,
                    )
                };
                self.messenger.send_html(chat, &html).await?;
            }
            "clear" => {
                let html = match self.book.clear().await {
                    Ok(()) => {
                        info!(admin = cmd.sender.user_id.0, "applications cleared");
                        texts::CLEARED
                    }
                    Err(e) => {
                        error!("failed to clear stored applications: {e}");
                        texts::CLEAR_FAILED
                    }
                };
                self.messenger.send_html(chat, html).await?;
            }
            _ if in_admin_chat => {}
            other => {
                info!(user = cmd.sender.user_id.0, command = other, "unknown command");
                self.messenger.send_html(chat, texts::UNKNOWN_COMMAND).await?;
            }
        }
        Ok(())
    }

    fn team_keyboard(&self) -> InlineKeyboard {
        let buttons = self
            .teams
            .iter()
            .map(|(id, name)| {
                InlineButton::new(name, CallbackAction::SelectTeam(id.clone()).encode())
            })
            .collect();
        InlineKeyboard::grid(buttons, TEAM_BUTTONS_PER_ROW)
    }

    // ============== Messages ==============

    async fn on_message(&self, msg: &ChatMessage) -> Result<()> {
        let user = msg.sender.user_id;
        if msg.chat_id != user.private_chat() {
            self.router.route(msg).await;
            return Ok(());
        }

        self.book.touch_user(&msg.sender, true).await;

        if self.conversations.is_in_flow(user).await {
            let Content::Text(text) = &msg.content else {
                self.messenger
                    .send_html(msg.chat_id, texts::TEXT_ANSWER_REQUIRED)
                    .await?;
                return Ok(());
            };
            match self
                .conversations
                .apply(user, Input::Text(text.clone()))
                .await
            {
                Step::AskExperience { team } => {
                    let name = self.teams.name_or_unknown(&team);
                    self.messenger
                        .send_html(msg.chat_id, &texts::experience_question(name))
                        .await?;
                    return Ok(());
                }
                Step::Completed(draft) => return self.complete_application(draft, msg).await,
                // The flow ended between the check and the transition.
                Step::NotInFlow => {}
                other => {
                    warn!(user = user.0, ?other, "unexpected flow step for text answer");
                    return Ok(());
                }
            }
        }

        self.router.route(msg).await;
        Ok(())
    }

    async fn complete_application(&self, draft: ApplicationDraft, answer: &ChatMessage) -> Result<()> {
        let user = draft.applicant.user_id;
        let team_name = self.teams.name_or_unknown(&draft.team).to_string();
        let record = ApplicationRecord {
            applicant: draft.applicant,
            team_id: draft.team,
            team_name: team_name.clone(),
            reason: draft.reason,
            experience: draft.experience,
            timestamp: Local::now(),
            decision: None,
        };

        if self.book.submit(record.clone()).await == SubmitOutcome::AlreadyApplied {
            self.messenger
                .send_html(answer.chat_id, &texts::already_applied(&team_name))
                .await?;
            return Ok(());
        }
        info!(user = user.0, team = %record.team_id, "application submitted");
        self.audit
            .record(AuditEvent::application(&record.applicant, &record.team_id));

        let keyboard = InlineKeyboard::new(vec![vec![
            InlineButton::new(
                texts::ACCEPT_LABEL,
                decision_payload(DecisionKind::Accepted, user, &record.team_id),
            ),
            InlineButton::new(
                texts::REJECT_LABEL,
                decision_payload(DecisionKind::Rejected, user, &record.team_id),
            ),
        ]]);
        let (notification_html, clipped) = self.notification_html(&record);
        match self
            .messenger
            .send_inline_keyboard(self.admin_chat, &notification_html, keyboard)
            .await
        {
            // Admin replies to the notification reach the applicant.
            Ok(notification) => {
                self.store
                    .record_link(MessageLink {
                        source: answer.message_ref(),
                        target: notification,
                        user_id: user,
                        direction: Direction::UserToAdmin,
                    })
                    .await;
                if clipped {
                    self.post_full_answers(&record, notification).await;
                }
            }
            Err(e) => {
                error!(user = user.0, team = %record.team_id, "failed to notify admins of application: {e}");
                self.audit.record(AuditEvent::error(
                    user,
                    &e.to_string(),
                    Some("application notification"),
                ));
            }
        }

        self.messenger
            .send_html(answer.chat_id, &texts::application_submitted(&team_name))
            .await?;
        Ok(())
    }

    /// Notification HTML, with the answers clipped when the whole would not
    /// fit in one message. The flag tells whether anything was clipped.
    fn notification_html(&self, record: &ApplicationRecord) -> (String, bool) {
        let max = self
            .messenger
            .capabilities()
            .max_message_len
            .saturating_sub(ANNOTATION_ROOM);
        let full = texts::application_notification(record, usize::MAX);
        if html_len(&full) <= max {
            return (full, false);
        }
        let longest = record
            .reason
            .chars()
            .count()
            .max(record.experience.chars().count());
        let clipped = shrink_to_fit(max, longest / 2, |limit| {
            texts::application_notification(record, limit)
        });
        (clipped, true)
    }

    async fn post_full_answers(&self, record: &ApplicationRecord, notification: MessageRef) {
        for (head, text) in [
            (texts::FULL_REASON_HEADER, &record.reason),
            (texts::FULL_EXPERIENCE_HEADER, &record.experience),
        ] {
            if let Err(e) = reply_in_chunks(
                self.messenger.as_ref(),
                self.admin_chat,
                head,
                text,
                notification.message_id,
            )
            .await
            {
                warn!(user = record.applicant.user_id.0, "failed to post full application answer: {e}");
            }
        }
    }

    // ============== Callbacks ==============

    async fn on_callback(&self, q: &CallbackQuery) -> Result<()> {
        let action = match CallbackAction::parse(&q.data) {
            Ok(a) => a,
            Err(e) => {
                warn!(user = q.sender.user_id.0, "ignoring callback: {e}");
                return self.answer(q, Some(texts::INVALID_ACTION), false).await;
            }
        };

        match action {
            CallbackAction::SelectTeam(team) => self.select_team(q, team).await,
            CallbackAction::Decide {
                kind,
                user_id,
                team_id,
            } => {
                if !self.from_admin_chat(q) {
                    return self.answer(q, Some(texts::ADMIN_ONLY), true).await;
                }
                self.decide(q, kind, user_id, team_id).await
            }
            CallbackAction::EndChat(user) => {
                if !self.from_admin_chat(q) {
                    return self.answer(q, Some(texts::ADMIN_ONLY), true).await;
                }
                self.end_chat(q, user).await
            }
        }
    }

    fn from_admin_chat(&self, q: &CallbackQuery) -> bool {
        q.chat_id().is_some_and(|c| self.is_admin_chat(c))
    }

    async fn select_team(&self, q: &CallbackQuery, team: TeamId) -> Result<()> {
        self.answer(q, None, false).await?;
        let applicant = q.sender.clone();
        let user = applicant.user_id;

        let Some(team_name) = self.teams.get(&team) else {
            warn!(user = user.0, team = %team, "unknown team selected");
            return self.edit_or_send(q, texts::UNKNOWN_TEAM).await;
        };
        if self.book.has_applied(user, &team).await {
            return self.edit_or_send(q, &texts::already_applied(team_name)).await;
        }

        self.conversations
            .apply(user, Input::SelectTeam { team: team.clone(), applicant })
            .await;
        info!(user = user.0, team = %team, "team selected");
        self.edit_or_send(q, &texts::team_selected(team_name)).await
    }

    async fn decide(
        &self,
        q: &CallbackQuery,
        kind: DecisionKind,
        user: UserId,
        team: TeamId,
    ) -> Result<()> {
        let admin_name = q.sender.full_name();
        let record = match self.book.decide(user, &team, kind, &admin_name).await {
            DecisionOutcome::Decided(record) => record,
            DecisionOutcome::AlreadyDecided(existing) => {
                info!(user = user.0, team = %team, by = %existing.decided_by, "decision ignored, already decided");
                return self.answer(q, Some(texts::ALREADY_DECIDED), true).await;
            }
            DecisionOutcome::NotFound => {
                warn!(user = user.0, team = %team, "decision for unknown application");
                return self.answer(q, Some(texts::APPLICATION_NOT_FOUND), true).await;
            }
        };
        info!(user = user.0, team = %team, ?kind, admin = %admin_name, "application decided");
        self.audit
            .record(AuditEvent::decision(user, &team, kind, &admin_name));

        let decided_at = record
            .decision
            .as_ref()
            .map(|d| d.decided_at)
            .unwrap_or_else(Local::now);
        let notice = texts::decision_for_applicant(kind, &record.team_name, &admin_name, decided_at);
        let mut line = texts::decision_annotation(kind, &admin_name);
        let delivered = match self.messenger.send_html(user.private_chat(), &notice).await {
            Ok(_) => true,
            Err(e) => {
                warn!(user = user.0, "failed to notify applicant of decision: {e}");
                line.push('\n');
                line.push_str(texts::DECISION_NOT_DELIVERED);
                false
            }
        };

        if let Some(msg) = q.message {
            self.annotate(msg, q.message_text.as_deref(), &line).await;
        }
        if delivered {
            self.answer(q, None, false).await
        } else {
            self.answer(q, Some(texts::DECISION_NOT_DELIVERED), true).await
        }
    }

    async fn end_chat(&self, q: &CallbackQuery, user: UserId) -> Result<()> {
        if !self.store.close_session(user).await {
            return self.answer(q, Some(texts::CHAT_NOT_OPEN), false).await;
        }
        let admin_name = q.sender.full_name();
        info!(user = user.0, admin = %admin_name, "chat session closed");
        self.audit
            .record(AuditEvent::session(user, false, &admin_name));

        if let Err(e) = self
            .messenger
            .send_html(
                user.private_chat(),
                &texts::chat_ended_for_user(&admin_name, Local::now()),
            )
            .await
        {
            warn!(user = user.0, "failed to tell user the chat ended: {e}");
        }
        if let Some(msg) = q.message {
            self.annotate(msg, q.message_text.as_deref(), &texts::chat_ended_annotation(&admin_name))
                .await;
        }
        self.answer(q, None, false).await
    }

    async fn annotate(&self, msg: MessageRef, original: Option<&str>, line: &str) {
        let html = texts::annotate(original, line);
        if let Err(e) = self.messenger.edit_html(msg, &html).await {
            warn!(msg = %msg, "failed to annotate admin message: {e}");
        }
    }

    async fn edit_or_send(&self, q: &CallbackQuery, html: &str) -> Result<()> {
        if let Some(msg) = q.message {
            if self.messenger.capabilities().supports_edit {
                match self.messenger.edit_html(msg, html).await {
                    Ok(()) => return Ok(()),
                    Err(e) => warn!(msg = %msg, "edit failed, sending instead: {e}"),
                }
            }
        }
        self.messenger
            .send_html(reply_chat(q), html)
            .await
            .map(|_| ())
    }

    async fn answer(&self, q: &CallbackQuery, text: Option<&str>, alert: bool) -> Result<()> {
        self.messenger
            .answer_callback_query(&q.callback_id, text, alert)
            .await
    }
}

fn decision_payload(kind: DecisionKind, user_id: UserId, team: &TeamId) -> String {
    CallbackAction::Decide {
        kind,
        user_id,
        team_id: team.clone(),
    }
    .encode()
}

fn reply_chat(q: &CallbackQuery) -> ChatId {
    q.chat_id()
        .unwrap_or_else(|| q.sender.user_id.private_chat())
}
