//! # SQLite Credential Store
//!
//! User-set provider keys in a single SQLite file (`.prism/credentials.db`
//! by default), with schema-versioned migrations.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::CredentialStore;
use crate::models::Provider;

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// SQLite-backed credential store
pub struct SqliteCredentialStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCredentialStore {
    /// Where the server keeps keys unless `credentials_db` says otherwise
    pub const DEFAULT_PATH: &'static str = ".prism/credentials.db";

    /// Open database at a specific path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn =
            Connection::open(path.as_ref()).context("Failed to open credentials database")?;
        Self::from_connection(conn)
    }

    /// Private database that disappears with the process (tests, CLI runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Run schema migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS credentials (
                    provider TEXT PRIMARY KEY,
                    secret TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                [],
            )?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        tracing::debug!(
            "Credential store initialized with schema version {}",
            SCHEMA_VERSION
        );

        Ok(())
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn load(&self, provider: Provider) -> Result<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.query_row(
            "SELECT secret FROM credentials WHERE provider = ?1",
            params![provider.id()],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to load credential")
    }

    fn save(&self, provider: Provider, secret: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO credentials (provider, secret, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(provider) DO UPDATE SET secret = excluded.secret,
                                                updated_at = excluded.updated_at
            "#,
            params![provider.id(), secret],
        )
        .context("Failed to save credential")?;

        Ok(())
    }

    fn remove(&self, provider: Provider) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "DELETE FROM credentials WHERE provider = ?1",
            params![provider.id()],
        )
        .context("Failed to remove credential")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialResolver;

    #[test]
    fn test_save_load_remove() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        assert_eq!(store.load(Provider::OpenAI).unwrap(), None);

        store.save(Provider::OpenAI, "sk-1").unwrap();
        store.save(Provider::OpenAI, "sk-2").unwrap();
        assert_eq!(store.load(Provider::OpenAI).unwrap().as_deref(), Some("sk-2"));

        store.remove(Provider::OpenAI).unwrap();
        assert_eq!(store.load(Provider::OpenAI).unwrap(), None);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        store.run_migrations().unwrap();
        store.save(Provider::Gemini, "g").unwrap();
        assert_eq!(store.load(Provider::Gemini).unwrap().as_deref(), Some("g"));
    }

    #[test]
    fn test_resolver_over_sqlite() {
        let store = Arc::new(SqliteCredentialStore::open_in_memory().unwrap());
        let resolver = CredentialResolver::new(store).with_override(Provider::Anthropic, "env");

        resolver.set(Provider::Anthropic, "user").unwrap();
        assert_eq!(resolver.get(Provider::Anthropic).as_deref(), Some("user"));

        resolver.clear(Provider::Anthropic).unwrap();
        assert_eq!(resolver.get(Provider::Anthropic).as_deref(), Some("env"));
    }
}
