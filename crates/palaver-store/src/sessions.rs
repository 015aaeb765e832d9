use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use palaver_shared::types::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{column_timestamp, column_uuid, Session};

impl Database {
    /// Issue a fresh session token for `user_id`.
    pub fn insert_session(&self, user_id: UserId, ttl: std::time::Duration) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            token: Uuid::new_v4(),
            user_id,
            created_at: now,
            expires_at: now
                + chrono::Duration::from_std(ttl)
                    .map_err(|e| StoreError::Validation(format!("session ttl out of range: {e}")))?,
        };

        self.conn().execute(
            "INSERT INTO sessions (token, user_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                session.token.to_string(),
                session.user_id.to_string(),
                session.created_at.to_rfc3339(),
                session.expires_at.to_rfc3339(),
            ],
        )?;

        Ok(session)
    }

    /// Resolve a bearer token to its session.
    ///
    /// Expired sessions are removed on sight and reported as
    /// [`StoreError::NotFound`], so callers never see a stale token succeed.
    pub fn get_session(&self, token: Uuid) -> Result<Session> {
        let session = self
            .conn()
            .query_row(
                "SELECT token, user_id, created_at, expires_at
                 FROM sessions WHERE token = ?1",
                params![token.to_string()],
                row_to_session,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        if session.expires_at <= Utc::now() {
            self.delete_session(token)?;
            return Err(StoreError::NotFound);
        }

        Ok(session)
    }

    /// Remove a session.  Removing an unknown token is a no-op.
    pub fn delete_session(&self, token: Uuid) -> Result<()> {
        self.conn().execute(
            "DELETE FROM sessions WHERE token = ?1",
            params![token.to_string()],
        )?;
        Ok(())
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let token_str: String = row.get(0)?;
    let user_str: String = row.get(1)?;
    let created_str: String = row.get(2)?;
    let expires_str: String = row.get(3)?;

    Ok(Session {
        token: column_uuid(0, &token_str)?,
        user_id: UserId(column_uuid(1, &user_str)?),
        created_at: column_timestamp(2, &created_str)?,
        expires_at: column_timestamp(3, &expires_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn issue_and_resolve_session() {
        let db = db();
        let user = db.create_user("a@example.com", "A", "h", "s").unwrap();

        let session = db
            .insert_session(user.id, Duration::from_secs(3600))
            .unwrap();
        let resolved = db.get_session(session.token).unwrap();
        assert_eq!(resolved.user_id, user.id);
    }

    #[test]
    fn expired_session_is_gone() {
        let db = db();
        let user = db.create_user("a@example.com", "A", "h", "s").unwrap();

        let session = db.insert_session(user.id, Duration::ZERO).unwrap();
        assert!(matches!(
            db.get_session(session.token),
            Err(StoreError::NotFound)
        ));

        // The expired row was purged, not just rejected.
        let remaining: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn logout_deletes_session() {
        let db = db();
        let user = db.create_user("a@example.com", "A", "h", "s").unwrap();

        let session = db
            .insert_session(user.id, Duration::from_secs(3600))
            .unwrap();
        db.delete_session(session.token).unwrap();
        assert!(matches!(
            db.get_session(session.token),
            Err(StoreError::NotFound)
        ));
    }
}
