//! Schema and context configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When registered setup scripts run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupMode {
    /// Only when the store is new (missing or empty file, fresh memory database).
    #[default]
    Fresh,
    /// On the first context of every schema instance.
    Always,
}

/// Journal modes accepted while bulk mode is active.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JournalMode {
    #[default]
    Off,
    Memory,
    Delete,
    Truncate,
    Persist,
    Wal,
}

impl JournalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalMode::Off => "OFF",
            JournalMode::Memory => "MEMORY",
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Wal => "WAL",
        }
    }
}

/// Pragmas applied while a context is in bulk mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Page cache size in pages (negative values are KiB, as in SQLite).
    pub cache_size: i64,
    pub journal_mode: JournalMode,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            cache_size: 80_000_000,
            journal_mode: JournalMode::Off,
        }
    }
}

/// SQLite schema configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Path to the SQLite database file; empty or `:memory:` for an in-memory database
    pub db_path: String,
    /// Commit every mutating statement immediately
    pub auto_commit: bool,
    /// Expand a leading `~` in `db_path`
    pub expand_user: bool,
    /// Copy the database file into memory on first use; writes are not persisted
    pub mirror: bool,
    /// Warn about questionable table designs when tables are registered
    pub strict: bool,
    pub setup: SetupMode,
    /// Engine busy timeout for every connection, in milliseconds
    pub busy_timeout_ms: Option<u64>,
    pub bulk: BulkConfig,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            db_path: String::from(":memory:"),
            auto_commit: true,
            expand_user: true,
            mirror: false,
            strict: false,
            setup: SetupMode::Fresh,
            busy_timeout_ms: None,
            bulk: BulkConfig::default(),
        }
    }
}

impl SqliteConfig {
    /// Create a config for the database at `db_path` with default settings
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_setup(mut self, setup: SetupMode) -> Self {
        self.setup = setup;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn busy_timeout(&self) -> Option<Duration> {
        self.busy_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: SqliteConfig =
            serde_json::from_str(r#"{"db_path": "data.db", "bulk": {"journal_mode": "MEMORY"}}"#)
                .unwrap();
        assert_eq!(config.db_path, "data.db");
        assert!(config.auto_commit);
        assert_eq!(config.setup, SetupMode::Fresh);
        assert_eq!(config.bulk.journal_mode, JournalMode::Memory);
        assert_eq!(config.bulk.cache_size, 80_000_000);
    }

    #[test]
    fn busy_timeout_round_trips_through_millis() {
        let config = SqliteConfig::new("x.db").with_busy_timeout(Duration::from_millis(250));
        assert_eq!(config.busy_timeout(), Some(Duration::from_millis(250)));
    }
}
