//! Per-user application flow: team → reason → experience.
//!
//! `transition` is pure; `ConversationRegistry` holds the current state of
//! every user and applies transitions under its lock.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::domain::{Sender, TeamId, UserId};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingReason {
        team: TeamId,
        applicant: Sender,
    },
    AwaitingExperience {
        team: TeamId,
        applicant: Sender,
        reason: String,
    },
}

impl ConversationState {
    pub fn is_in_flow(&self) -> bool {
        !matches!(self, ConversationState::Idle)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    SelectTeam { team: TeamId, applicant: Sender },
    Text(String),
    Cancel,
}

/// Answers collected by a finished flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationDraft {
    pub applicant: Sender,
    pub team: TeamId,
    pub reason: String,
    pub experience: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Team chosen; ask for the reason.
    Started { team: TeamId },
    /// Reason stored; ask about experience.
    AskExperience { team: TeamId },
    /// Both answers in; the state is back to `Idle`.
    Completed(ApplicationDraft),
    /// Flow aborted (or there was nothing to abort).
    Cancelled { was_in_flow: bool },
    /// Text outside the flow; not for the state machine.
    NotInFlow,
}

pub fn transition(state: ConversationState, input: Input) -> (ConversationState, Step) {
    use ConversationState as S;

    match (state, input) {
        (_, Input::SelectTeam { team, applicant }) => (
            S::AwaitingReason {
                team: team.clone(),
                applicant,
            },
            Step::Started { team },
        ),
        (state, Input::Cancel) => (
            S::Idle,
            Step::Cancelled {
                was_in_flow: state.is_in_flow(),
            },
        ),
        (S::AwaitingReason { team, applicant }, Input::Text(reason)) => (
            S::AwaitingExperience {
                team: team.clone(),
                applicant,
                reason,
            },
            Step::AskExperience { team },
        ),
        (
            S::AwaitingExperience {
                team,
                applicant,
                reason,
            },
            Input::Text(experience),
        ) => (
            S::Idle,
            Step::Completed(ApplicationDraft {
                applicant,
                team,
                reason,
                experience,
            }),
        ),
        (S::Idle, Input::Text(_)) => (S::Idle, Step::NotInFlow),
    }
}

#[derive(Debug, Default)]
pub struct ConversationRegistry {
    states: Mutex<HashMap<UserId, ConversationState>>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn apply(&self, user: UserId, input: Input) -> Step {
        let mut states = self.states.lock().await;
        let current = states.remove(&user).unwrap_or_default();
        let (next, step) = transition(current, input);
        if next.is_in_flow() {
            states.insert(user, next);
        }
        step
    }

    pub async fn is_in_flow(&self, user: UserId) -> bool {
        self.states.lock().await.contains_key(&user)
    }

    pub async fn reset(&self, user: UserId) {
        self.states.lock().await.remove(&user);
    }
}
