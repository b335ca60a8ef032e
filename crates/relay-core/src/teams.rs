use crate::domain::TeamId;

/// Teams users can apply to, in display order.
#[derive(Clone, Debug)]
pub struct TeamCatalog {
    teams: Vec<(TeamId, String)>,
}

/// Shown when a stored team id is no longer in the catalogue.
pub const UNKNOWN_TEAM_NAME: &str = "غير معروف";

impl Default for TeamCatalog {
    fn default() -> Self {
        Self::new([
            ("team_exams", "تيم الاختبارات"),
            ("team_collections", "تيم التجميعات"),
            ("team_social", "تيم السوشيال"),
            ("team_support", "تيم الدعم الفني"),
        ])
    }
}

impl TeamCatalog {
    pub fn new<I, K, V>(teams: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            teams: teams
                .into_iter()
                .map(|(k, v)| (TeamId::new(k), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, id: &TeamId) -> Option<&str> {
        self.teams
            .iter()
            .find(|(t, _)| t == id)
            .map(|(_, name)| name.as_str())
    }

    pub fn contains(&self, id: &TeamId) -> bool {
        self.get(id).is_some()
    }

    pub fn name_or_unknown(&self, id: &TeamId) -> &str {
        self.get(id).unwrap_or(UNKNOWN_TEAM_NAME)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TeamId, &str)> {
        self.teams.iter().map(|(id, name)| (id, name.as_str()))
    }
}
