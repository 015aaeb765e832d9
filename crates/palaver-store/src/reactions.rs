use chrono::Utc;
use rusqlite::params;

use palaver_shared::protocol::Reaction;
use palaver_shared::types::{MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{column_timestamp, column_uuid};

impl Database {
    /// Attach `user_id`'s reaction to a message.
    ///
    /// Re-adding the identical (user, emoji) pair fails with
    /// [`StoreError::Conflict`]; a different emoji replaces the user's
    /// previous reaction, keeping at most one reaction per user.  Returns the
    /// message's reaction list after the change.
    pub fn add_reaction(
        &self,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> Result<Vec<Reaction>> {
        if emoji.trim().is_empty() {
            return Err(StoreError::Validation("emoji is required".into()));
        }

        // The message must resolve before anything changes.
        self.message_row(message_id)?;

        let existing: Option<String> = self
            .conn()
            .query_row(
                "SELECT emoji FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                params![message_id.to_string(), user_id.to_string()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Sqlite(other)),
            })?;

        if existing.as_deref() == Some(emoji) {
            return Err(StoreError::Conflict(
                "already reacted with this emoji".into(),
            ));
        }

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
            params![message_id.to_string(), user_id.to_string()],
        )?;
        tx.execute(
            "INSERT INTO reactions (message_id, user_id, emoji, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                message_id.to_string(),
                user_id.to_string(),
                emoji,
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        self.reactions_for(message_id)
    }

    /// Remove `user_id`'s reaction if present; a no-op otherwise.  Returns
    /// the remaining reaction list.
    pub fn remove_reaction(&self, message_id: MessageId, user_id: UserId) -> Result<Vec<Reaction>> {
        self.message_row(message_id)?;

        self.conn().execute(
            "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
            params![message_id.to_string(), user_id.to_string()],
        )?;

        self.reactions_for(message_id)
    }

    /// All reactions on a message, oldest first.
    pub fn reactions_for(&self, message_id: MessageId) -> Result<Vec<Reaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, emoji, created_at FROM reactions
             WHERE message_id = ?1 ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            let user_raw: String = row.get(0)?;
            let emoji: String = row.get(1)?;
            let created_raw: String = row.get(2)?;
            Ok(Reaction {
                user_id: UserId(column_uuid(0, &user_raw)?),
                emoji,
                created_at: column_timestamp(2, &created_raw)?,
            })
        })?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }
}
