use chrono::{DateTime, Utc};
use rusqlite::params;

use palaver_shared::types::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{column_timestamp, column_uuid, User};

const USER_COLUMNS: &str = "id, email, display_name, password_hash, password_salt, \
     avatar_url, is_online, last_seen, created_at, updated_at";

impl Database {
    /// Insert a new user.  The email must be unique; a duplicate fails with
    /// [`StoreError::Conflict`] and nothing is written.
    pub fn create_user(
        &self,
        email: &str,
        display_name: &str,
        password_hash: &str,
        password_salt: &str,
    ) -> Result<User> {
        let user = User {
            id: UserId::new(),
            email: email.to_string(),
            display_name: display_name.to_string(),
            password_hash: password_hash.to_string(),
            password_salt: password_salt.to_string(),
            avatar_url: String::new(),
            is_online: false,
            last_seen: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let inserted = self.conn().execute(
            "INSERT INTO users (id, email, display_name, password_hash, password_salt,
                                avatar_url, is_online, last_seen, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                user.id.to_string(),
                user.email,
                user.display_name,
                user.password_hash,
                user.password_salt,
                user.avatar_url,
                user.is_online,
                user.last_seen.to_rfc3339(),
                user.created_at.to_rfc3339(),
                user.updated_at.to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => Ok(user),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict("email already exists".into()))
            }
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// All users except `of`, most recently seen first -- the sidebar
    /// ordering.
    pub fn list_peers(&self, of: UserId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id != ?1 ORDER BY last_seen DESC"
        ))?;

        let rows = stmt.query_map(params![of.to_string()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Flip the online flag and refresh `last_seen`.  Called on every
    /// connect/disconnect of the user's live connection.
    pub fn set_presence(&self, id: UserId, online: bool, seen_at: DateTime<Utc>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET is_online = ?1, last_seen = ?2, updated_at = ?2 WHERE id = ?3",
            params![online, seen_at.to_rfc3339(), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn set_avatar(&self, id: UserId, avatar_url: &str) -> Result<User> {
        let affected = self.conn().execute(
            "UPDATE users SET avatar_url = ?1, updated_at = ?2 WHERE id = ?3",
            params![avatar_url, Utc::now().to_rfc3339(), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_user(id)
    }
}

fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let last_seen_str: String = row.get(7)?;
    let created_str: String = row.get(8)?;
    let updated_str: String = row.get(9)?;

    Ok(User {
        id: UserId(column_uuid(0, &id_str)?),
        email: row.get(1)?,
        display_name: row.get(2)?,
        password_hash: row.get(3)?,
        password_salt: row.get(4)?,
        avatar_url: row.get(5)?,
        is_online: row.get(6)?,
        last_seen: column_timestamp(7, &last_seen_str)?,
        created_at: column_timestamp(8, &created_str)?,
        updated_at: column_timestamp(9, &updated_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_fetch_user() {
        let db = db();
        let created = db
            .create_user("ada@example.com", "Ada", "hash", "salt")
            .unwrap();

        let fetched = db.get_user(created.id).unwrap();
        assert_eq!(fetched, created);

        let by_email = db.get_user_by_email("ada@example.com").unwrap();
        assert_eq!(by_email.id, created.id);
    }

    #[test]
    fn duplicate_email_is_conflict() {
        let db = db();
        db.create_user("ada@example.com", "Ada", "h", "s").unwrap();

        let result = db.create_user("ada@example.com", "Other", "h2", "s2");
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn unknown_user_is_not_found() {
        let db = db();
        assert!(matches!(db.get_user(UserId::new()), Err(StoreError::NotFound)));
        assert!(matches!(
            db.get_user_by_email("ghost@example.com"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn peers_exclude_self_and_sort_by_last_seen() {
        let db = db();
        let a = db.create_user("a@example.com", "A", "h", "s").unwrap();
        let b = db.create_user("b@example.com", "B", "h", "s").unwrap();
        let c = db.create_user("c@example.com", "C", "h", "s").unwrap();

        let base = Utc::now();
        db.set_presence(b.id, false, base - chrono::Duration::hours(2))
            .unwrap();
        db.set_presence(c.id, true, base).unwrap();

        let peers = db.list_peers(a.id).unwrap();
        let ids: Vec<_> = peers.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![c.id, b.id]);
    }

    #[test]
    fn set_presence_updates_flags() {
        let db = db();
        let user = db.create_user("a@example.com", "A", "h", "s").unwrap();

        let seen = Utc::now() + chrono::Duration::minutes(1);
        db.set_presence(user.id, true, seen).unwrap();

        let fetched = db.get_user(user.id).unwrap();
        assert!(fetched.is_online);
        assert_eq!(fetched.last_seen, seen);
    }

    #[test]
    fn public_projection_hides_credentials() {
        let db = db();
        let user = db
            .create_user("a@example.com", "A", "secret-hash", "salt")
            .unwrap();

        let raw = serde_json::to_string(&user.public()).unwrap();
        assert!(!raw.contains("secret-hash"));
        assert!(raw.contains("\"displayName\":\"A\""));
    }
}
