//! Persistence port and its JSON-file implementation.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use chrono::Local;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::{
    applications::{ApplicationRecord, Snapshot, UserProfile},
    config::Config,
    domain::UserId,
    errors::Error,
    Result,
};

/// What the core needs from durable storage.
///
/// Writes are independent of message sends; there is no two-phase commit.
pub trait ApplicationRepository: Send + Sync {
    fn load_all(&self) -> Result<Snapshot>;
    fn append_application(&self, record: &ApplicationRecord) -> Result<()>;
    /// Replace the stored record for the same (user, team).
    fn update_application(&self, record: &ApplicationRecord) -> Result<()>;
    fn upsert_user(&self, id: UserId, profile: &UserProfile) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// `applications.json` + `users.json`, rewritten whole on every change.
///
/// Writes are refused until `load_all` succeeded, so files that could not be
/// read are never replaced by a partial snapshot. A file that reads but does
/// not parse is moved aside to `<name>.corrupt-<time>` and loaded as empty.
pub struct JsonFileRepository {
    applications_path: PathBuf,
    users_path: PathBuf,
    /// `None` until loaded.
    mirror: Mutex<Option<Snapshot>>,
}

impl JsonFileRepository {
    pub fn new(applications_path: impl Into<PathBuf>, users_path: impl Into<PathBuf>) -> Self {
        Self {
            applications_path: applications_path.into(),
            users_path: users_path.into(),
            mirror: Mutex::new(None),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        fs::create_dir_all(&cfg.data_dir)?;
        Ok(Self::new(cfg.applications_file(), cfg.users_file()))
    }

    fn mirror(&self) -> MutexGuard<'_, Option<Snapshot>> {
        self.mirror.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `change` to the loaded snapshot, then write it back.
    fn write_with(
        &self,
        change: impl FnOnce(&mut Snapshot),
        write: impl FnOnce(&Self, &Snapshot) -> Result<()>,
    ) -> Result<()> {
        let mut guard = self.mirror();
        let Some(snapshot) = guard.as_mut() else {
            return Err(Error::Storage(
                "data files were not loaded, refusing to overwrite them".to_string(),
            ));
        };
        change(snapshot);
        write(self, &*snapshot)
    }

    fn write_applications(&self, snapshot: &Snapshot) -> Result<()> {
        write_json(&self.applications_path, &snapshot.applications)
    }

    fn write_users(&self, snapshot: &Snapshot) -> Result<()> {
        write_json(&self.users_path, &snapshot.users)
    }
}

impl ApplicationRepository for JsonFileRepository {
    fn load_all(&self) -> Result<Snapshot> {
        let snapshot = Snapshot {
            applications: load_or_quarantine(&self.applications_path)?,
            users: load_or_quarantine(&self.users_path)?,
        };
        *self.mirror() = Some(snapshot.clone());
        Ok(snapshot)
    }

    fn append_application(&self, record: &ApplicationRecord) -> Result<()> {
        self.write_with(
            |m| m.applications.push(record.clone()),
            Self::write_applications,
        )
    }

    fn update_application(&self, record: &ApplicationRecord) -> Result<()> {
        let user = record.applicant.user_id;
        self.write_with(
            |m| match m
                .applications
                .iter_mut()
                .find(|a| a.is_for(user, &record.team_id))
            {
                Some(existing) => *existing = record.clone(),
                None => m.applications.push(record.clone()),
            },
            Self::write_applications,
        )
    }

    fn upsert_user(&self, id: UserId, profile: &UserProfile) -> Result<()> {
        self.write_with(
            |m| {
                m.users.insert(id, profile.clone());
            },
            Self::write_users,
        )
    }

    fn clear(&self) -> Result<()> {
        // An explicit wipe is allowed even when the old files were unreadable.
        let mut guard = self.mirror();
        let empty = guard.insert(Snapshot::default());
        self.write_applications(empty)?;
        self.write_users(empty)
    }
}

/// Parse `path`; on a JSON error, move the file aside and start that part empty.
fn load_or_quarantine<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match read_json_or_default(path) {
        Err(Error::Json(e)) => {
            let backup = corrupt_backup_path(path);
            fs::rename(path, &backup)?;
            error!(
                path = %path.display(),
                backup = %backup.display(),
                "data file could not be parsed, moved aside: {e}"
            );
            Ok(T::default())
        }
        other => other,
    }
}

fn corrupt_backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".corrupt-{}", Local::now().format("%Y%m%d%H%M%S")));
    PathBuf::from(name)
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        debug!(path = %path.display(), "data file missing, starting empty");
        return Ok(T::default());
    }
    let txt = fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(&txt)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let txt = serde_json::to_string_pretty(value)?;
    fs::write(path, txt)?;
    Ok(())
}
