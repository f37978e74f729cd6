use std::time::Duration;

use crate::storage::ConnectOptions;

/// Runtime settings for a ledger instance.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// SQLite database file
    pub database_path: String,
    pub max_connections: u32,
    /// How long SQLite waits on its own write lock before failing a statement
    pub busy_timeout: Duration,
    /// How long a mutation waits for its class lock(s)
    pub lock_timeout: Duration,
    /// How many times a mutation re-resolves its classes when a concurrent
    /// move changed them before the locks were taken
    pub max_lock_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: "feeledger.db".to_string(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(10),
            max_lock_retries: 3,
        }
    }
}

impl LedgerConfig {
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Self::default()
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.database_path)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            max_connections: self.max_connections,
            busy_timeout: self.busy_timeout,
            create_if_missing: false,
        }
    }
}
