//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees
//! that migrations are run before any other operation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

use palaver_shared::constants::EDIT_WINDOW;

use crate::error::Result;
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
    edit_window: Duration,
}

impl Database {
    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        tracing::info!(path = %path.display(), "opening database");

        // Run schema migrations.
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn,
            edit_window: EDIT_WINDOW,
        })
    }

    /// Open a fresh in-memory database.  Used by tests and available for
    /// ephemeral deployments.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn,
            edit_window: EDIT_WINDOW,
        })
    }

    /// Override the edit/delete window (defaults to
    /// [`palaver_shared::constants::EDIT_WINDOW`]).
    pub fn set_edit_window(&mut self, window: Duration) {
        self.edit_window = window;
    }

    /// The window inside which a sender may still edit or delete a message.
    pub fn edit_window(&self) -> Duration {
        self.edit_window
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed CRUD helpers, but direct access is
    /// occasionally needed for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
        assert_eq!(db.edit_window(), EDIT_WINDOW);
    }

    #[test]
    fn in_memory_runs_migrations() {
        let db = Database::open_in_memory().expect("should open");
        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'messages'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
