use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::ChatId, errors::Error, Result};

/// Typed configuration for the relay bot.
///
/// Everything comes from the environment; a `.env` file in the working
/// directory is loaded first without overriding variables that are already set.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub bot_token: String,
    pub admin_chat_id: ChatId,

    // Persistence
    pub data_dir: PathBuf,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,

    // Outbound flood control
    pub throttle_global: Duration,
    pub throttle_per_chat: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (the process environment in `load`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        // Required
        let bot_token = get("BOT_TOKEN").ok_or_else(|| {
            Error::Config("BOT_TOKEN environment variable is required".to_string())
        })?;
        let admin_chat_id = get("ADMIN_GROUP_ID")
            .ok_or_else(|| {
                Error::Config("ADMIN_GROUP_ID environment variable is required".to_string())
            })?
            .trim()
            .parse::<i64>()
            .map_err(|e| Error::Config(format!("ADMIN_GROUP_ID is not a valid chat id: {e}")))?;
        if admin_chat_id == 0 {
            return Err(Error::Config(
                "ADMIN_GROUP_ID environment variable is set but invalid (0)".to_string(),
            ));
        }

        let data_dir = get("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let audit_log_path = PathBuf::from(
            get("AUDIT_LOG_PATH").unwrap_or_else(|| "/tmp/relay-bot-audit.log".to_string()),
        );
        let audit_log_json = get("AUDIT_LOG_JSON").map(|s| parse_bool(&s)).unwrap_or(false);

        let throttle_global =
            Duration::from_millis(get("THROTTLE_GLOBAL_MS").and_then(parse_u64).unwrap_or(40));
        let throttle_per_chat = Duration::from_millis(
            get("THROTTLE_PER_CHAT_MS")
                .and_then(parse_u64)
                .unwrap_or(1050),
        );

        Ok(Self {
            bot_token,
            admin_chat_id: ChatId(admin_chat_id),
            data_dir,
            audit_log_path,
            audit_log_json,
            throttle_global,
            throttle_per_chat,
        })
    }

    pub fn applications_file(&self) -> PathBuf {
        self.data_dir.join("applications.json")
    }

    pub fn users_file(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_u64(s: String) -> Option<u64> {
    s.trim().parse::<u64>().ok()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn missing_token_aborts() {
        let err = Config::from_lookup(lookup(&[("ADMIN_GROUP_ID", "-100")])).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("BOT_TOKEN")));
    }

    #[test]
    fn zero_or_garbage_admin_chat_aborts() {
        for bad in ["0", "abc", "   "] {
            let err = Config::from_lookup(lookup(&[("BOT_TOKEN", "t"), ("ADMIN_GROUP_ID", bad)]))
                .unwrap_err();
            assert!(matches!(err, Error::Config(ref m) if m.contains("ADMIN_GROUP_ID")));
        }
    }

    #[test]
    fn defaults_fill_optional_values() {
        let cfg = Config::from_lookup(lookup(&[
            ("BOT_TOKEN", "t"),
            ("ADMIN_GROUP_ID", "-1001234"),
            ("AUDIT_LOG_JSON", "yes"),
        ]))
        .unwrap();
        assert_eq!(cfg.admin_chat_id, ChatId(-1001234));
        assert_eq!(cfg.applications_file(), PathBuf::from("./applications.json"));
        assert!(cfg.audit_log_json);
        assert_eq!(cfg.throttle_per_chat, Duration::from_millis(1050));
    }
}
