//! Message Store: correlation between user messages and their copies in the
//! admin group, plus the per-user admin chat sessions.
//!
//! Links are keyed by `(direction, source)`; a second index maps each target
//! back to its link so replies can be resolved from either end in O(1).
//! Links are never evicted.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::domain::{MessageRef, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    UserToAdmin,
    AdminToUser,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::UserToAdmin => "user_to_admin",
            Direction::AdminToUser => "admin_to_user",
        }
    }
}

/// One relayed message: `source` is what was received, `target` the copy we sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageLink {
    pub source: MessageRef,
    pub target: MessageRef,
    pub user_id: UserId,
    pub direction: Direction,
}

impl MessageLink {
    /// The end of the link that lives in the user's private chat.
    pub fn user_side(&self) -> MessageRef {
        match self.direction {
            Direction::UserToAdmin => self.source,
            Direction::AdminToUser => self.target,
        }
    }

    /// The end of the link that lives in the admin group.
    pub fn admin_side(&self) -> MessageRef {
        match self.direction {
            Direction::UserToAdmin => self.target,
            Direction::AdminToUser => self.source,
        }
    }
}

/// Open admin↔user thread, created by the first admin reply to a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveChatSession {
    pub assigned_admin_id: UserId,
    pub admin_name: String,
    /// Latest admin-group message to thread the user's follow-ups under.
    pub thread: MessageRef,
    pub is_open: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    links: HashMap<(Direction, MessageRef), MessageLink>,
    by_target: HashMap<MessageRef, (Direction, MessageRef)>,
    sessions: HashMap<UserId, ActiveChatSession>,
}

#[derive(Debug, Default)]
pub struct MessageStore {
    state: Mutex<StoreState>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a relayed message. Re-recording the same `(direction, source)`
    /// replaces the previous link instead of adding a second one.
    pub async fn record_link(&self, link: MessageLink) {
        let mut st = self.state.lock().await;
        let key = (link.direction, link.source);
        if let Some(old) = st.links.insert(key, link) {
            if old.target != link.target {
                st.by_target.remove(&old.target);
            }
        }
        // A target belongs to exactly one link; drop whatever owned it before.
        if let Some(prev_key) = st.by_target.insert(link.target, key) {
            if prev_key != key {
                st.links.remove(&prev_key);
            }
        }
    }

    /// Link whose source is `source` (either direction).
    pub async fn lookup(&self, source: MessageRef) -> Option<MessageLink> {
        let st = self.state.lock().await;
        [Direction::UserToAdmin, Direction::AdminToUser]
            .into_iter()
            .find_map(|d| st.links.get(&(d, source)).copied())
    }

    pub async fn find_by_target(&self, target: MessageRef) -> Option<MessageLink> {
        let st = self.state.lock().await;
        let key = st.by_target.get(&target)?;
        st.links.get(key).copied()
    }

    /// Resolve a message from either end: as a target first, then as a source.
    pub async fn resolve(&self, message: MessageRef) -> Option<MessageLink> {
        if let Some(link) = self.find_by_target(message).await {
            return Some(link);
        }
        self.lookup(message).await
    }

    pub async fn link_count(&self) -> usize {
        self.state.lock().await.links.len()
    }

    /// Open (or refresh) the session for `user`. Returns true when it was not open before.
    pub async fn open_session(
        &self,
        user: UserId,
        admin_id: UserId,
        admin_name: &str,
        thread: MessageRef,
    ) -> bool {
        let mut st = self.state.lock().await;
        let was_open = st.sessions.get(&user).is_some_and(|s| s.is_open);
        st.sessions.insert(
            user,
            ActiveChatSession {
                assigned_admin_id: admin_id,
                admin_name: admin_name.to_string(),
                thread,
                is_open: true,
            },
        );
        !was_open
    }

    /// Close the session; the entry stays around. Returns true if it was open.
    pub async fn close_session(&self, user: UserId) -> bool {
        let mut st = self.state.lock().await;
        match st.sessions.get_mut(&user) {
            Some(s) if s.is_open => {
                s.is_open = false;
                true
            }
            _ => false,
        }
    }

    pub async fn session(&self, user: UserId) -> Option<ActiveChatSession> {
        self.state.lock().await.sessions.get(&user).cloned()
    }

    /// Thread of the user's open session, if any.
    pub async fn open_thread(&self, user: UserId) -> Option<MessageRef> {
        let st = self.state.lock().await;
        st.sessions
            .get(&user)
            .filter(|s| s.is_open)
            .map(|s| s.thread)
    }

    pub async fn active_sessions(&self) -> usize {
        let st = self.state.lock().await;
        st.sessions.values().filter(|s| s.is_open).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatId, MessageId};

    const ADMIN: ChatId = ChatId(-100);

    fn mref(chat: i64, id: i32) -> MessageRef {
        MessageRef::new(ChatId(chat), MessageId(id))
    }

    fn up(user: i64, user_msg: i32, group_msg: i32) -> MessageLink {
        MessageLink {
            source: mref(user, user_msg),
            target: MessageRef::new(ADMIN, MessageId(group_msg)),
            user_id: UserId(user),
            direction: Direction::UserToAdmin,
        }
    }

    #[tokio::test]
    async fn resolves_both_directions() {
        let store = MessageStore::new();
        let link = up(7, 1, 500);
        store.record_link(link).await;

        assert_eq!(store.lookup(mref(7, 1)).await, Some(link));
        let by_target = store.find_by_target(link.target).await.unwrap();
        assert_eq!(by_target.user_id, UserId(7));
        assert_eq!(store.resolve(link.target).await, Some(link));
        assert_eq!(store.resolve(link.source).await, Some(link));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = MessageStore::new();
        assert_eq!(store.lookup(mref(1, 1)).await, None);
        assert_eq!(store.find_by_target(mref(1, 1)).await, None);
        assert_eq!(store.resolve(mref(1, 1)).await, None);
    }

    #[tokio::test]
    async fn same_chat_local_ids_do_not_collide_across_chats() {
        let store = MessageStore::new();
        // user message 10 in chat 7 and group message 10 are different messages
        store.record_link(up(7, 10, 10)).await;
        let l = store.lookup(mref(7, 10)).await.unwrap();
        assert_eq!(l.target, MessageRef::new(ADMIN, MessageId(10)));
        assert_eq!(store.lookup(MessageRef::new(ADMIN, MessageId(10))).await, None);
    }

    #[tokio::test]
    async fn rerecording_a_source_overwrites() {
        let store = MessageStore::new();
        store.record_link(up(7, 1, 500)).await;
        store.record_link(up(7, 1, 501)).await;

        assert_eq!(store.link_count().await, 1);
        assert_eq!(
            store.lookup(mref(7, 1)).await.unwrap().target,
            MessageRef::new(ADMIN, MessageId(501))
        );
        assert_eq!(
            store
                .find_by_target(MessageRef::new(ADMIN, MessageId(500)))
                .await,
            None
        );
    }

    #[tokio::test]
    async fn a_target_maps_to_one_user() {
        let store = MessageStore::new();
        store.record_link(up(7, 1, 500)).await;
        store.record_link(up(8, 2, 500)).await;

        let owner = store
            .find_by_target(MessageRef::new(ADMIN, MessageId(500)))
            .await
            .unwrap();
        assert_eq!(owner.user_id, UserId(8));
        assert_eq!(store.link_count().await, 1);
    }

    #[tokio::test]
    async fn link_sides_follow_direction() {
        let down = MessageLink {
            source: MessageRef::new(ADMIN, MessageId(600)),
            target: mref(7, 3),
            user_id: UserId(7),
            direction: Direction::AdminToUser,
        };
        assert_eq!(down.admin_side(), down.source);
        assert_eq!(down.user_side(), down.target);
        let u = up(7, 1, 500);
        assert_eq!(u.admin_side(), u.target);
    }

    #[tokio::test]
    async fn sessions_open_refresh_and_close() {
        let store = MessageStore::new();
        let user = UserId(7);
        let t1 = MessageRef::new(ADMIN, MessageId(1));
        let t2 = MessageRef::new(ADMIN, MessageId(2));

        assert!(store.open_session(user, UserId(1), "Admin", t1).await);
        assert!(!store.open_session(user, UserId(1), "Admin", t2).await);
        assert_eq!(store.open_thread(user).await, Some(t2));
        assert_eq!(store.active_sessions().await, 1);

        assert!(store.close_session(user).await);
        assert!(!store.close_session(user).await);
        assert_eq!(store.open_thread(user).await, None);
        // closed sessions are kept
        assert!(store.session(user).await.is_some_and(|s| !s.is_open));
        assert!(store.open_session(user, UserId(2), "Other", t1).await);
    }
}
