//! Message CRUD and aggregation: create, conversation fetch, read receipts,
//! windowed edit/soft-delete, unread counts.
//!
//! Every operation is one logical transaction.  Queries hand back
//! [`MessageRecord`]s with reactions, read receipts and the resolved reply
//! preview attached.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::params;

use palaver_shared::protocol::{MessageRecord, ReadReceipt, ReplyPreview};
use palaver_shared::types::{DeliveryStatus, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{column_timestamp, column_uuid, MessageContent, MessageRow};

const MSG_COLUMNS: &str = "id, sender_id, receiver_id, text, image_url, voice_url, \
     voice_duration, status, edited_at, reply_to, is_deleted, created_at, updated_at";

impl Database {
    /// Persist a new message with status `sent` and return the stored record
    /// with its reply reference resolved.
    pub fn create_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: MessageContent,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRecord> {
        if content.text.is_none() && content.image_url.is_none() && content.voice.is_none() {
            return Err(StoreError::Validation(
                "message requires text, image, or voice content".into(),
            ));
        }

        // Both ends of the FK must resolve before we write anything.
        self.get_user(receiver_id)?;
        if let Some(parent) = reply_to {
            self.message_row(parent)?;
        }

        let id = MessageId::new();
        let now = Utc::now();
        let (text, image_url, voice_url, voice_duration) = content.into_columns();

        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, text, image_url, voice_url,
                                   voice_duration, status, edited_at, reply_to, is_deleted,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'sent', NULL, ?8, 0, ?9, ?9)",
            params![
                id.to_string(),
                sender_id.to_string(),
                receiver_id.to_string(),
                text,
                image_url,
                voice_url,
                voice_duration,
                reply_to.map(|r| r.to_string()),
                now.to_rfc3339(),
            ],
        )?;

        tracing::debug!(id = %id, sender = %sender_id, receiver = %receiver_id, "message stored");

        self.get_message(id)
    }

    /// Fetch one message with children attached.
    pub fn get_message(&self, id: MessageId) -> Result<MessageRecord> {
        let row = self.message_row(id)?;
        self.assemble(row)
    }

    /// All messages between `a` and `b` in either direction, ascending by
    /// creation time, replies resolved.
    pub fn fetch_conversation(&self, a: UserId, b: UserId) -> Result<Vec<MessageRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MSG_COLUMNS} FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map(params![a.to_string(), b.to_string()], row_to_message_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(self.assemble(row?)?);
        }
        Ok(records)
    }

    /// Append a read receipt from `reader` to every unread message sent by
    /// `sender`, flipping their status to `read`.  Returns the affected ids;
    /// reapplying is a no-op that returns an empty list.
    pub fn mark_read(&self, reader: UserId, sender: UserId) -> Result<Vec<MessageId>> {
        let tx = self.conn().unchecked_transaction()?;

        let ids = {
            let mut stmt = tx.prepare(
                "SELECT m.id FROM messages m
                 WHERE m.sender_id = ?1 AND m.receiver_id = ?2
                   AND NOT EXISTS (SELECT 1 FROM read_receipts r
                                   WHERE r.message_id = m.id AND r.user_id = ?2)
                 ORDER BY m.created_at ASC",
            )?;
            let rows = stmt.query_map(params![sender.to_string(), reader.to_string()], |row| {
                let raw: String = row.get(0)?;
                Ok(MessageId(column_uuid(0, &raw)?))
            })?;

            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            ids
        };

        let now = Utc::now().to_rfc3339();
        for id in &ids {
            tx.execute(
                "INSERT INTO read_receipts (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
                params![id.to_string(), reader.to_string(), now],
            )?;
            tx.execute(
                "UPDATE messages SET status = 'read', updated_at = ?1 WHERE id = ?2",
                params![now, id.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(ids)
    }

    /// Replace the text of a message.  Only the sender may edit, and only
    /// while the message is younger than the edit window.
    pub fn edit_message(
        &self,
        id: MessageId,
        requester: UserId,
        new_text: &str,
    ) -> Result<MessageRecord> {
        if new_text.trim().is_empty() {
            return Err(StoreError::Validation("message text is required".into()));
        }

        let row = self.message_row(id)?;
        self.check_mutable(&row, requester, "edit")?;

        let now = Utc::now();
        self.conn().execute(
            "UPDATE messages SET text = ?1, edited_at = ?2, updated_at = ?2 WHERE id = ?3",
            params![new_text, now.to_rfc3339(), id.to_string()],
        )?;

        self.get_message(id)
    }

    /// Tombstone a message: set the deleted flag and clear text, image and
    /// voice content, keeping the identifier and its relationships intact.
    /// Same sender-only, in-window guards as [`Database::edit_message`].
    pub fn soft_delete(&self, id: MessageId, requester: UserId) -> Result<MessageRecord> {
        let row = self.message_row(id)?;
        self.check_mutable(&row, requester, "delete")?;

        self.conn().execute(
            "UPDATE messages
             SET is_deleted = 1, text = NULL, image_url = NULL, voice_url = NULL,
                 voice_duration = 0, updated_at = ?1
             WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )?;

        tracing::debug!(id = %id, "message soft-deleted");

        self.get_message(id)
    }

    /// Per-sender counts of messages addressed to `user` that `user` has not
    /// read yet.  Senders with nothing unread are absent from the map.
    pub fn unread_counts(&self, user: UserId) -> Result<HashMap<UserId, i64>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.sender_id, COUNT(*) FROM messages m
             WHERE m.receiver_id = ?1
               AND NOT EXISTS (SELECT 1 FROM read_receipts r
                               WHERE r.message_id = m.id AND r.user_id = ?1)
             GROUP BY m.sender_id",
        )?;

        let rows = stmt.query_map(params![user.to_string()], |row| {
            let sender_raw: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((UserId(column_uuid(0, &sender_raw)?), count))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (sender, count) = row?;
            counts.insert(sender, count);
        }
        Ok(counts)
    }

    // -- internals ----------------------------------------------------------

    pub(crate) fn message_row(&self, id: MessageId) -> Result<MessageRow> {
        self.conn()
            .query_row(
                &format!("SELECT {MSG_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    fn check_mutable(&self, row: &MessageRow, requester: UserId, verb: &str) -> Result<()> {
        if row.sender_id != requester {
            return Err(StoreError::Forbidden(format!(
                "only the sender can {verb} a message"
            )));
        }

        let age = Utc::now()
            .signed_duration_since(row.created_at)
            .to_std()
            .unwrap_or_default();
        if age >= self.edit_window() {
            return Err(StoreError::Forbidden(format!(
                "message is too old to {verb}"
            )));
        }

        Ok(())
    }

    pub(crate) fn read_receipts_for(&self, id: MessageId) -> Result<Vec<ReadReceipt>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, read_at FROM read_receipts
             WHERE message_id = ?1 ORDER BY read_at ASC",
        )?;

        let rows = stmt.query_map(params![id.to_string()], |row| {
            let user_raw: String = row.get(0)?;
            let read_raw: String = row.get(1)?;
            Ok(ReadReceipt {
                user_id: UserId(column_uuid(0, &user_raw)?),
                read_at: column_timestamp(1, &read_raw)?,
            })
        })?;

        let mut receipts = Vec::new();
        for row in rows {
            receipts.push(row?);
        }
        Ok(receipts)
    }

    /// Resolve a reply reference.  A missing parent resolves to `None`; a
    /// soft-deleted parent resolves to a tombstoned preview.
    fn reply_preview(&self, id: MessageId) -> Result<Option<Box<ReplyPreview>>> {
        match self.message_row(id) {
            Ok(row) => Ok(Some(Box::new(ReplyPreview {
                id: row.id,
                sender_id: row.sender_id,
                text: row.text,
                image_url: row.image_url,
                is_deleted: row.is_deleted,
            }))),
            Err(StoreError::NotFound) => Ok(None),
            Err(other) => Err(other),
        }
    }

    pub(crate) fn assemble(&self, row: MessageRow) -> Result<MessageRecord> {
        let reactions = self.reactions_for(row.id)?;
        let read_by = self.read_receipts_for(row.id)?;
        let reply_to = match row.reply_to {
            Some(parent) => self.reply_preview(parent)?,
            None => None,
        };

        Ok(MessageRecord {
            id: row.id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            text: row.text,
            image_url: row.image_url,
            voice_url: row.voice_url,
            voice_duration: row.voice_duration,
            status: row.status,
            reactions,
            edited_at: row.edited_at,
            reply_to,
            read_by,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn row_to_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let status_str: String = row.get(7)?;
    let edited_str: Option<String> = row.get(8)?;
    let reply_str: Option<String> = row.get(9)?;
    let created_str: String = row.get(11)?;
    let updated_str: String = row.get(12)?;

    let status = DeliveryStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown delivery status: {status_str}").into(),
        )
    })?;

    let edited_at = match edited_str {
        Some(raw) => Some(column_timestamp(8, &raw)?),
        None => None,
    };
    let reply_to = match reply_str {
        Some(raw) => Some(MessageId(column_uuid(9, &raw)?)),
        None => None,
    };

    Ok(MessageRow {
        id: MessageId(column_uuid(0, &id_str)?),
        sender_id: UserId(column_uuid(1, &sender_str)?),
        receiver_id: UserId(column_uuid(2, &receiver_str)?),
        text: row.get(3)?,
        image_url: row.get(4)?,
        voice_url: row.get(5)?,
        voice_duration: row.get(6)?,
        status,
        edited_at,
        reply_to,
        is_deleted: row.get(10)?,
        created_at: column_timestamp(11, &created_str)?,
        updated_at: column_timestamp(12, &updated_str)?,
    })
}
