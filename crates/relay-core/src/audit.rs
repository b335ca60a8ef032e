//! Append-only audit trail of relayed messages, applications and admin actions.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::{
    applications::DecisionKind,
    config::Config,
    domain::{MessageRef, Sender, TeamId, UserId},
    errors::Error,
    formatting::truncate_text,
    store::Direction,
    Result,
};

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Default, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl AuditEvent {
    fn base(event: &str, user_id: UserId) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            user_id: Some(user_id.0),
            ..Self::default()
        }
    }

    pub fn relay(
        direction: Direction,
        user_id: UserId,
        source: MessageRef,
        target: MessageRef,
        content: Option<&str>,
    ) -> Self {
        Self {
            direction: Some(direction.as_str().to_string()),
            source: Some(source.to_string()),
            target: Some(target.to_string()),
            content: content.map(str::to_string),
            ..Self::base("relay", user_id)
        }
    }

    pub fn application(applicant: &Sender, team: &TeamId) -> Self {
        Self {
            username: applicant.username.clone(),
            team: Some(team.to_string()),
            ..Self::base("application", applicant.user_id)
        }
    }

    pub fn decision(user_id: UserId, team: &TeamId, kind: DecisionKind, admin: &str) -> Self {
        let kind = match kind {
            DecisionKind::Accepted => "accepted",
            DecisionKind::Rejected => "rejected",
        };
        Self {
            team: Some(team.to_string()),
            decision: Some(kind.to_string()),
            admin: Some(admin.to_string()),
            ..Self::base("decision", user_id)
        }
    }

    pub fn session(user_id: UserId, opened: bool, admin: &str) -> Self {
        let event = if opened {
            "session_opened"
        } else {
            "session_closed"
        };
        Self {
            admin: Some(admin.to_string()),
            ..Self::base(event, user_id)
        }
    }

    pub fn error(user_id: UserId, error: &str, context: Option<&str>) -> Self {
        Self {
            error: Some(error.to_string()),
            context: context.map(str::to_string),
            ..Self::base("error", user_id)
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.audit_log_path.clone(), cfg.audit_log_json)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort write; failures only reach the log.
    pub fn record(&self, event: AuditEvent) {
        let name = event.event.clone();
        if let Err(e) = self.write(event) {
            warn!(event = %name, path = %self.path.display(), "audit write failed: {e}");
        }
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.content {
            event.content = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }
        if let Some(s) = &event.error {
            event.error = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            match v {
                serde_json::Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}
