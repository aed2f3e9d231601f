//! Engine configuration.

use ruleline_storage::{Dialect, MatchStore};

/// Configuration for a rule registry.
///
/// Controls the SQL dialect and where match state is stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Dialect all generated SQL targets.
    pub dialect: Dialect,

    /// Name of the match table.
    pub match_table: String,

    /// Name of the ancillary id table.
    pub match_ids_table: String,

    /// Upper bound on matches claimed per rule by one dispatch pass.
    pub dispatch_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Sqlite,
            match_table: "rule_matches".to_string(),
            match_ids_table: "rule_match_ids".to_string(),
            dispatch_batch_size: 100,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration targeting SQLite.
    #[must_use]
    pub fn sqlite() -> Self {
        Self::default()
    }

    /// Creates a configuration targeting PostgreSQL.
    #[must_use]
    pub fn postgres() -> Self {
        Self {
            dialect: Dialect::Postgres,
            ..Self::default()
        }
    }

    /// Builder method to set the dialect.
    #[must_use]
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Builder method to set the match table names.
    #[must_use]
    pub fn with_tables(mut self, matches: impl Into<String>, ids: impl Into<String>) -> Self {
        self.match_table = matches.into();
        self.match_ids_table = ids.into();
        self
    }

    /// Builder method to set the dispatch batch size.
    #[must_use]
    pub fn with_dispatch_batch_size(mut self, size: usize) -> Self {
        self.dispatch_batch_size = size.max(1);
        self
    }

    /// The match store these settings describe.
    #[must_use]
    pub fn match_store(&self) -> MatchStore {
        MatchStore::new(self.dialect, &self.match_table, &self.match_ids_table)
    }
}
