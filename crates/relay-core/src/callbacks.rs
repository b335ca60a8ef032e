//! Inline-button payloads, dispatched by prefix.
//!
//! - `team_<name>`: the whole payload is the team id
//! - `accept_<userId>_<teamId>` / `reject_<userId>_<teamId>`
//! - `end_chat_<userId>`

use crate::{
    applications::DecisionKind,
    domain::{TeamId, UserId},
    errors::Error,
    Result,
};

const TEAM_PREFIX: &str = "team_";
const END_CHAT_PREFIX: &str = "end_chat_";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    SelectTeam(TeamId),
    Decide {
        kind: DecisionKind,
        user_id: UserId,
        team_id: TeamId,
    },
    EndChat(UserId),
}

impl CallbackAction {
    pub fn parse(data: &str) -> Result<Self> {
        if data.starts_with(TEAM_PREFIX) {
            return Ok(Self::SelectTeam(TeamId::new(data)));
        }

        if let Some(rest) = data.strip_prefix(END_CHAT_PREFIX) {
            return Ok(Self::EndChat(parse_user(rest, data)?));
        }

        // Team ids contain underscores, so only split off the first two fields.
        let mut parts = data.splitn(3, '_');
        let kind = match parts.next() {
            Some("accept") => DecisionKind::Accepted,
            Some("reject") => DecisionKind::Rejected,
            _ => return Err(Error::InvalidCallback(data.to_string())),
        };
        let user_id = parse_user(parts.next().unwrap_or(""), data)?;
        let team_id = parts
            .next()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::InvalidCallback(data.to_string()))?;

        Ok(Self::Decide {
            kind,
            user_id,
            team_id: TeamId::new(team_id),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            Self::SelectTeam(team) => team.to_string(),
            Self::Decide {
                kind,
                user_id,
                team_id,
            } => {
                let verb = match kind {
                    DecisionKind::Accepted => "accept",
                    DecisionKind::Rejected => "reject",
                };
                format!("{verb}_{user_id}_{team_id}")
            }
            Self::EndChat(user) => format!("{END_CHAT_PREFIX}{user}"),
        }
    }
}

fn parse_user(raw: &str, data: &str) -> Result<UserId> {
    raw.parse::<i64>()
        .map(UserId)
        .map_err(|_| Error::InvalidCallback(data.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_keeps_underscored_team_id() {
        let action = CallbackAction::parse("reject_12345_team_exams").unwrap();
        assert_eq!(
            action,
            CallbackAction::Decide {
                kind: DecisionKind::Rejected,
                user_id: UserId(12345),
                team_id: TeamId::new("team_exams"),
            }
        );
        assert_eq!(action.encode(), "reject_12345_team_exams");
    }

    #[test]
    fn team_and_end_chat_payloads() {
        assert_eq!(
            CallbackAction::parse("team_social").unwrap(),
            CallbackAction::SelectTeam(TeamId::new("team_social"))
        );
        assert_eq!(
            CallbackAction::parse("end_chat_99").unwrap(),
            CallbackAction::EndChat(UserId(99))
        );
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        for bad in [
            "",
            "accept",
            "accept_",
            "accept_abc_team_exams",
            "accept_12",
            "accept_12_",
            "end_chat_x",
            "nope_1_team_exams",
        ] {
            assert!(
                matches!(CallbackAction::parse(bad), Err(Error::InvalidCallback(_))),
                "expected {bad:?} to be rejected"
            );
        }
    }
}
