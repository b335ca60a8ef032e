//! Application records and user profiles.
//!
//! `ApplicationBook` owns the in-memory snapshot and writes through an
//! `ApplicationRepository`. A failed write is logged and the in-memory state
//! keeps serving requests. Writes run on the blocking pool, outside the
//! snapshot lock, in the order the snapshot changed.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    domain::{Sender, TeamId, UserId},
    errors::Error,
    persistence::ApplicationRepository,
    Result,
};

/// Timestamps are written as RFC 3339. Older data files carry naive ISO
/// timestamps (`2025-01-01T10:00:00.123456`); those are read as local time.
mod local_time {
    use chrono::{DateTime, Local, NaiveDateTime};
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Local>, s: S) -> Result<S::Ok, S::Error> {
        at.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Local>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Local>> {
        let raw = raw.trim();
        if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
            return Some(at.with_timezone(&Local));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .and_then(|naive| naive.and_local_timezone(Local).earliest())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Accepted,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    pub decided_by: String,
    #[serde(with = "local_time")]
    pub decided_at: DateTime<Local>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    #[serde(rename = "user_info")]
    pub applicant: Sender,
    #[serde(rename = "selected_team")]
    pub team_id: TeamId,
    pub team_name: String,
    pub reason: String,
    pub experience: String,
    #[serde(with = "local_time")]
    pub timestamp: DateTime<Local>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
}

impl ApplicationRecord {
    pub fn is_for(&self, user: UserId, team: &TeamId) -> bool {
        self.applicant.user_id == user && &self.team_id == team
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedTeam {
    pub team_id: TeamId,
    pub team_name: String,
    #[serde(with = "local_time")]
    pub timestamp: DateTime<Local>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(with = "local_time")]
    pub first_seen: DateTime<Local>,
    #[serde(with = "local_time")]
    pub last_active: DateTime<Local>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub applications: Vec<AppliedTeam>,
}

impl UserProfile {
    fn new(sender: &Sender, now: DateTime<Local>) -> Self {
        Self {
            first_name: sender.first_name.clone(),
            last_name: sender.last_name.clone(),
            username: sender.username.clone(),
            first_seen: now,
            last_active: now,
            message_count: 0,
            applications: Vec::new(),
        }
    }
}

/// Everything the persistence collaborator stores.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub applications: Vec<ApplicationRecord>,
    pub users: BTreeMap<UserId, UserProfile>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    AlreadyApplied,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecisionOutcome {
    Decided(ApplicationRecord),
    /// First decision wins; the existing one is returned.
    AlreadyDecided(Decision),
    NotFound,
}

#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub total_applications: usize,
    pub total_applicants: usize,
    pub team_counts: BTreeMap<TeamId, usize>,
    pub pending: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub total_users: usize,
    pub total_messages: u64,
    /// Most recently active first.
    pub recent_users: Vec<(UserId, UserProfile)>,
}

const RECENT_USERS: usize = 10;

pub struct ApplicationBook {
    repo: Arc<dyn ApplicationRepository>,
    state: Mutex<Snapshot>,
    /// Held by a mutation from its snapshot change until its write is done.
    writes: Mutex<()>,
}

impl ApplicationBook {
    /// Load the last snapshot. An unreadable store starts empty in memory; the
    /// repository is expected to refuse writes over data it could not read.
    pub fn load(repo: Arc<dyn ApplicationRepository>) -> Self {
        let snapshot = match repo.load_all() {
            Ok(s) => {
                info!(
                    applications = s.applications.len(),
                    users = s.users.len(),
                    "loaded application data"
                );
                s
            }
            Err(e) => {
                error!("failed to load application data, serving from memory only: {e}");
                Snapshot::default()
            }
        };
        Self {
            repo,
            state: Mutex::new(snapshot),
            writes: Mutex::new(()),
        }
    }

    /// Run a repository write on the blocking pool.
    async fn persist<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&dyn ApplicationRepository) -> Result<()> + Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        tokio::task::spawn_blocking(move || op(&*repo))
            .await
            .map_err(|e| Error::External(format!("persistence task failed: {e}")))?
    }

    pub async fn has_applied(&self, user: UserId, team: &TeamId) -> bool {
        self.count_applications(user, team).await > 0
    }

    pub async fn count_applications(&self, user: UserId, team: &TeamId) -> usize {
        let st = self.state.lock().await;
        st.applications
            .iter()
            .filter(|a| a.is_for(user, team))
            .count()
    }

    /// Append a completed application. Duplicates for the same (user, team) are refused.
    pub async fn submit(&self, record: ApplicationRecord) -> SubmitOutcome {
        let _turn = self.writes.lock().await;
        let user = record.applicant.user_id;
        let profile = {
            let mut st = self.state.lock().await;
            if st
                .applications
                .iter()
                .any(|a| a.is_for(user, &record.team_id))
            {
                return SubmitOutcome::AlreadyApplied;
            }

            let profile = st
                .users
                .entry(user)
                .or_insert_with(|| UserProfile::new(&record.applicant, record.timestamp));
            profile.applications.push(AppliedTeam {
                team_id: record.team_id.clone(),
                team_name: record.team_name.clone(),
                timestamp: record.timestamp,
            });
            profile.last_active = record.timestamp;
            let profile = profile.clone();

            st.applications.push(record.clone());
            profile
        };

        let team = record.team_id.clone();
        if let Err(e) = self
            .persist(move |repo| repo.append_application(&record))
            .await
        {
            error!(user = user.0, team = %team, "failed to persist application: {e}");
        }
        if let Err(e) = self
            .persist(move |repo| repo.upsert_user(user, &profile))
            .await
        {
            error!(user = user.0, "failed to persist user profile: {e}");
        }
        SubmitOutcome::Submitted
    }

    pub async fn decide(
        &self,
        user: UserId,
        team: &TeamId,
        kind: DecisionKind,
        admin_name: &str,
    ) -> DecisionOutcome {
        let _turn = self.writes.lock().await;
        let record = {
            let mut st = self.state.lock().await;
            let Some(record) = st.applications.iter_mut().find(|a| a.is_for(user, team)) else {
                return DecisionOutcome::NotFound;
            };
            if let Some(existing) = &record.decision {
                warn!(user = user.0, team = %team, "application already decided");
                return DecisionOutcome::AlreadyDecided(existing.clone());
            }

            record.decision = Some(Decision {
                kind,
                decided_by: admin_name.to_string(),
                decided_at: Local::now(),
            });
            record.clone()
        };

        let stored = record.clone();
        if let Err(e) = self
            .persist(move |repo| repo.update_application(&stored))
            .await
        {
            error!(user = user.0, team = %team, "failed to persist decision: {e}");
        }
        DecisionOutcome::Decided(record)
    }

    /// Track user activity; `counted` bumps the message counter.
    pub async fn touch_user(&self, sender: &Sender, counted: bool) {
        let now = Local::now();
        let user = sender.user_id;
        let _turn = self.writes.lock().await;
        let profile = {
            let mut st = self.state.lock().await;
            let profile = st
                .users
                .entry(user)
                .or_insert_with(|| UserProfile::new(sender, now));
            profile.first_name = sender.first_name.clone();
            profile.last_name = sender.last_name.clone();
            profile.username = sender.username.clone();
            profile.last_active = now;
            if counted {
                profile.message_count += 1;
            }
            profile.clone()
        };

        if let Err(e) = self
            .persist(move |repo| repo.upsert_user(user, &profile))
            .await
        {
            error!(user = user.0, "failed to persist user profile: {e}");
        }
    }

    pub async fn stats(&self) -> Stats {
        let st = self.state.lock().await;
        let mut stats = Stats {
            total_applications: st.applications.len(),
            total_users: st.users.len(),
            ..Stats::default()
        };

        let mut applicants = HashSet::new();
        for a in &st.applications {
            applicants.insert(a.applicant.user_id);
            *stats.team_counts.entry(a.team_id.clone()).or_insert(0) += 1;
            match a.decision.as_ref().map(|d| d.kind) {
                None => stats.pending += 1,
                Some(DecisionKind::Accepted) => stats.accepted += 1,
                Some(DecisionKind::Rejected) => stats.rejected += 1,
            }
        }
        stats.total_applicants = applicants.len();
        stats.total_messages = st.users.values().map(|u| u.message_count).sum();

        let mut recent: Vec<(UserId, UserProfile)> =
            st.users.iter().map(|(id, p)| (*id, p.clone())).collect();
        recent.sort_by(|a, b| b.1.last_active.cmp(&a.1.last_active));
        recent.truncate(RECENT_USERS);
        stats.recent_users = recent;

        stats
    }

    /// Wipe applications and users. Memory is cleared even if the store write fails.
    pub async fn clear(&self) -> Result<()> {
        let _turn = self.writes.lock().await;
        *self.state.lock().await = Snapshot::default();
        self.persist(|repo| repo.clear()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        persistence::JsonFileRepository,
        testing::{sender, FakeRepository},
    };
    use std::{fs, path::PathBuf};

    fn record(user: i64, team: &str) -> ApplicationRecord {
        ApplicationRecord {
            applicant: sender(user),
            team_id: TeamId::new(team),
            team_name: "Team".to_string(),
            reason: "r".to_string(),
            experience: "e".to_string(),
            timestamp: Local::now(),
            decision: None,
        }
    }

    #[tokio::test]
    async fn duplicate_submission_is_refused() {
        let repo = Arc::new(FakeRepository::default());
        let book = ApplicationBook::load(repo.clone());

        assert_eq!(
            book.submit(record(1, "team_exams")).await,
            SubmitOutcome::Submitted
        );
        assert_eq!(
            book.submit(record(1, "team_exams")).await,
            SubmitOutcome::AlreadyApplied
        );
        assert_eq!(
            book.submit(record(1, "team_social")).await,
            SubmitOutcome::Submitted
        );

        let team = TeamId::new("team_exams");
        assert_eq!(book.count_applications(UserId(1), &team).await, 1);
        assert_eq!(repo.snapshot().applications.len(), 2);
        assert_eq!(
            repo.snapshot().users[&UserId(1)].applications.len(),
            2
        );
    }

    #[tokio::test]
    async fn first_decision_wins() {
        let repo = Arc::new(FakeRepository::default());
        let book = ApplicationBook::load(repo.clone());
        book.submit(record(1, "team_exams")).await;
        let team = TeamId::new("team_exams");

        let first = book
            .decide(UserId(1), &team, DecisionKind::Rejected, "Admin A")
            .await;
        assert!(matches!(first, DecisionOutcome::Decided(ref r)
            if r.decision.as_ref().map(|d| d.kind) == Some(DecisionKind::Rejected)));

        let second = book
            .decide(UserId(1), &team, DecisionKind::Accepted, "Admin B")
            .await;
        match second {
            DecisionOutcome::AlreadyDecided(d) => {
                assert_eq!(d.kind, DecisionKind::Rejected);
                assert_eq!(d.decided_by, "Admin A");
            }
            other => panic!("expected AlreadyDecided, got {other:?}"),
        }
        assert_eq!(
            repo.snapshot().applications[0].decision.as_ref().map(|d| d.kind),
            Some(DecisionKind::Rejected)
        );

        assert_eq!(
            book.decide(UserId(2), &team, DecisionKind::Accepted, "x")
                .await,
            DecisionOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn persistence_failure_keeps_memory_serving() {
        let repo = Arc::new(FakeRepository::failing());
        let book = ApplicationBook::load(repo.clone());

        assert_eq!(
            book.submit(record(3, "team_support")).await,
            SubmitOutcome::Submitted
        );
        assert!(
            book.has_applied(UserId(3), &TeamId::new("team_support"))
                .await
        );
        assert!(repo.snapshot().applications.is_empty());
    }

    #[tokio::test]
    async fn stats_count_teams_users_and_messages() {
        let repo = Arc::new(FakeRepository::default());
        let book = ApplicationBook::load(repo);
        book.submit(record(1, "team_exams")).await;
        book.submit(record(2, "team_exams")).await;
        book.submit(record(2, "team_social")).await;
        book.decide(
            UserId(2),
            &TeamId::new("team_social"),
            DecisionKind::Accepted,
            "a",
        )
        .await;
        book.touch_user(&sender(5), true).await;
        book.touch_user(&sender(5), true).await;
        book.touch_user(&sender(5), false).await;

        let s = book.stats().await;
        assert_eq!(s.total_applications, 3);
        assert_eq!(s.total_applicants, 2);
        assert_eq!(s.team_counts[&TeamId::new("team_exams")], 2);
        assert_eq!((s.pending, s.accepted, s.rejected), (2, 1, 0));
        assert_eq!(s.total_users, 3);
        assert_eq!(s.total_messages, 2);
        assert_eq!(s.recent_users[0].0, UserId(5));
    }

    #[tokio::test]
    async fn clear_wipes_everything() {
        let repo = Arc::new(FakeRepository::default());
        let book = ApplicationBook::load(repo.clone());
        book.submit(record(1, "team_exams")).await;

        book.clear().await.unwrap();
        assert!(
            !book
                .has_applied(UserId(1), &TeamId::new("team_exams"))
                .await
        );
        assert_eq!(repo.snapshot(), Snapshot::default());
    }

    #[test]
    fn naive_and_offset_timestamps_both_parse() {
        let naive = local_time::parse("2025-01-01T10:00:00.123456").unwrap();
        assert_eq!(naive.format("%H:%M:%S").to_string(), "10:00:00");
        assert!(local_time::parse("2025-01-01 10:00:00").is_some());
        assert!(local_time::parse("2025-01-01T10:00:00+03:00").is_some());
        assert!(local_time::parse("yesterday").is_none());
    }

    #[tokio::test]
    async fn records_from_older_data_files_survive_new_submissions() {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = PathBuf::from(format!("/tmp/relay-book-legacy-{}-{ts}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let (apps, users) = (dir.join("applications.json"), dir.join("users.json"));
        fs::write(
            &apps,
            r#"[{"user_info": {"user_id": 1, "username": null, "first_name": "Ali", "last_name": null,
                "timestamp": "2025-01-01T09:59:00.000001"},
              "selected_team": "team_exams", "team_name": "تيم الاختبارات",
              "reason": "r", "experience": "e", "timestamp": "2025-01-01T10:00:00.123456"}]"#,
        )
        .unwrap();
        fs::write(
            &users,
            r#"{"1": {"first_name": "Ali", "last_name": null, "username": null,
                "first_seen": "2025-01-01T10:00:00.123456", "applications": [],
                "last_active": "2025-01-01T10:00:00.123456"}}"#,
        )
        .unwrap();

        let book = ApplicationBook::load(Arc::new(JsonFileRepository::new(&apps, &users)));
        assert!(book.has_applied(UserId(1), &TeamId::new("team_exams")).await);
        book.submit(record(2, "team_social")).await;
        book.touch_user(&sender(3), true).await;

        let reloaded = JsonFileRepository::new(&apps, &users).load_all().unwrap();
        let owners: Vec<i64> = reloaded
            .applications
            .iter()
            .map(|a| a.applicant.user_id.0)
            .collect();
        assert_eq!(owners, vec![1, 2]);
        assert_eq!(reloaded.users.len(), 3);
        let _ = fs::remove_dir_all(&dir);
    }
}
