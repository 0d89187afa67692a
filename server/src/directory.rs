//! Conversation directory: membership lookup for the relay.
//!
//! The relay only ever reads membership. The unseen flags are written by the
//! persistence hooks in `conversations`, never by the dispatcher.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::Serialize;

use crate::db::models::{ConversationRow, MemberRow};
use crate::db::DbPool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub id: String,
    /// Member usernames in the order they were added.
    pub members: Vec<String>,
    /// username -> true while that member has unread content
    #[serde(skip)]
    pub new_message: BTreeMap<String, bool>,
    /// Unix seconds
    pub created: i64,
}

impl Conversation {
    pub fn is_member(&self, username: &str) -> bool {
        self.members.iter().any(|m| m == username)
    }

    pub fn unseen_for(&self, username: &str) -> Option<bool> {
        self.new_message.get(username).copied()
    }

    fn from_rows(row: ConversationRow, members: Vec<MemberRow>) -> Self {
        let new_message = members
            .iter()
            .map(|m| (m.username.clone(), m.new_message))
            .collect();
        Conversation {
            id: row.id,
            members: members.into_iter().map(|m| m.username).collect(),
            new_message,
            created: row.created,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("conversation {0} not found")]
    NotFound(String),

    #[error("a conversation needs two distinct members")]
    SelfConversation,

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for DirectoryError {
    fn from(err: rusqlite::Error) -> Self {
        DirectoryError::Storage(err.to_string())
    }
}

/// Lookup-by-id and membership operations of the persistence layer.
pub trait ConversationDirectory: Send + Sync {
    fn get_by_id(&self, id: &str) -> Result<Conversation, DirectoryError>;

    fn get_for_user(&self, username: &str) -> Result<Vec<Conversation>, DirectoryError>;

    /// Create a two-member conversation, members ordered `[sender, recipient]`.
    fn create(&self, sender: &str, recipient: &str) -> Result<Conversation, DirectoryError>;

    fn mark_unseen(&self, username: &str, id: &str) -> Result<(), DirectoryError>;

    /// Flag the conversation unseen for every member except `sender`, as one
    /// unit. Fails with NotFound, changing nothing, when `sender` is not a
    /// member. Returns how many members were flagged.
    fn mark_unseen_except(&self, sender: &str, id: &str) -> Result<usize, DirectoryError>;

    fn mark_seen(&self, username: &str, id: &str) -> Result<(), DirectoryError>;
}

pub type SharedDirectory = Arc<dyn ConversationDirectory>;

/// Directory backed by the relay's SQLite database.
#[derive(Clone)]
pub struct SqliteDirectory {
    db: DbPool,
}

impl SqliteDirectory {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, DirectoryError> {
        self.db
            .lock()
            .map_err(|e| DirectoryError::Storage(format!("DB lock error: {}", e)))
    }

    fn set_flag(&self, username: &str, id: &str, unseen: bool) -> Result<(), DirectoryError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE conversation_members SET new_message = ?1
             WHERE conversation_id = ?2 AND username = ?3",
            rusqlite::params![unseen, id, username],
        )?;
        if updated == 0 {
            return Err(DirectoryError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

fn load_members(
    conn: &rusqlite::Connection,
    conversation_id: &str,
) -> Result<Vec<MemberRow>, DirectoryError> {
    let mut stmt = conn.prepare(
        "SELECT conversation_id, username, position, new_message
         FROM conversation_members
         WHERE conversation_id = ?1
         ORDER BY position ASC",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![conversation_id], |row| {
            Ok(MemberRow {
                conversation_id: row.get(0)?,
                username: row.get(1)?,
                position: row.get(2)?,
                new_message: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

impl ConversationDirectory for SqliteDirectory {
    fn get_by_id(&self, id: &str) -> Result<Conversation, DirectoryError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, created FROM conversations WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    Ok(ConversationRow {
                        id: row.get(0)?,
                        created: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))?;

        let members = load_members(&conn, &row.id)?;
        Ok(Conversation::from_rows(row, members))
    }

    fn get_for_user(&self, username: &str) -> Result<Vec<Conversation>, DirectoryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.created
             FROM conversations c
             JOIN conversation_members m ON m.conversation_id = c.id
             WHERE m.username = ?1
             ORDER BY c.created DESC, c.id DESC",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![username], |row| {
                Ok(ConversationRow {
                    id: row.get(0)?,
                    created: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| {
                let members = load_members(&conn, &row.id)?;
                Ok(Conversation::from_rows(row, members))
            })
            .collect()
    }

    fn create(&self, sender: &str, recipient: &str) -> Result<Conversation, DirectoryError> {
        if sender == recipient {
            return Err(DirectoryError::SelfConversation);
        }

        let id = uuid::Uuid::now_v7().to_string();
        let created = Utc::now().timestamp();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, created) VALUES (?1, ?2)",
            rusqlite::params![id, created],
        )?;
        for (position, username) in [sender, recipient].iter().enumerate() {
            tx.execute(
                "INSERT INTO conversation_members (conversation_id, username, position, new_message)
                 VALUES (?1, ?2, ?3, 0)",
                rusqlite::params![id, username, position as i64],
            )?;
        }
        tx.commit()?;

        tracing::debug!(conversation_id = %id, sender = %sender, recipient = %recipient, "Conversation created");

        Ok(Conversation {
            id,
            members: vec![sender.to_string(), recipient.to_string()],
            new_message: BTreeMap::from([
                (sender.to_string(), false),
                (recipient.to_string(), false),
            ]),
            created,
        })
    }

    fn mark_unseen(&self, username: &str, id: &str) -> Result<(), DirectoryError> {
        self.set_flag(username, id, true)
    }

    fn mark_unseen_except(&self, sender: &str, id: &str) -> Result<usize, DirectoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let is_member = tx
            .query_row(
                "SELECT 1 FROM conversation_members
                 WHERE conversation_id = ?1 AND username = ?2",
                rusqlite::params![id, sender],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !is_member {
            return Err(DirectoryError::NotFound(id.to_string()));
        }

        let flagged = tx.execute(
            "UPDATE conversation_members SET new_message = 1
             WHERE conversation_id = ?1 AND username != ?2",
            rusqlite::params![id, sender],
        )?;
        tx.commit()?;

        Ok(flagged)
    }

    fn mark_seen(&self, username: &str, id: &str) -> Result<(), DirectoryError> {
        self.set_flag(username, id, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> SqliteDirectory {
        SqliteDirectory::new(crate::db::init_memory_db().unwrap())
    }

    #[test]
    fn test_create_and_get_by_id_preserves_member_order() {
        let dir = directory();
        let conv = dir.create("alice", "bob").unwrap();

        let fetched = dir.get_by_id(&conv.id).unwrap();
        assert_eq!(fetched.members, vec!["alice", "bob"]);
        assert_eq!(fetched.unseen_for("alice"), Some(false));
        assert_eq!(fetched.unseen_for("bob"), Some(false));
        assert_eq!(fetched, conv);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let dir = directory();
        let err = dir.get_by_id("does-not-exist").unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));
    }

    #[test]
    fn test_self_conversation_rejected() {
        let dir = directory();
        assert!(matches!(
            dir.create("alice", "alice"),
            Err(DirectoryError::SelfConversation)
        ));
    }

    #[test]
    fn test_get_for_user_only_returns_memberships() {
        let dir = directory();
        let ab = dir.create("alice", "bob").unwrap();
        let ac = dir.create("carol", "alice").unwrap();
        dir.create("bob", "carol").unwrap();

        let mut ids: Vec<String> = dir
            .get_for_user("alice")
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        ids.sort();
        let mut expected = vec![ab.id, ac.id];
        expected.sort();
        assert_eq!(ids, expected);

        assert!(dir.get_for_user("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_unseen_flag_is_per_member() {
        let dir = directory();
        let conv = dir.create("alice", "bob").unwrap();

        dir.mark_unseen("bob", &conv.id).unwrap();
        let fetched = dir.get_by_id(&conv.id).unwrap();
        assert_eq!(fetched.unseen_for("bob"), Some(true));
        assert_eq!(fetched.unseen_for("alice"), Some(false));

        dir.mark_seen("bob", &conv.id).unwrap();
        let fetched = dir.get_by_id(&conv.id).unwrap();
        assert_eq!(fetched.unseen_for("bob"), Some(false));
    }

    #[test]
    fn test_mark_unseen_except_flags_every_other_member() {
        let db = crate::db::init_memory_db().unwrap();
        let dir = SqliteDirectory::new(db.clone());
        let conv = dir.create("alice", "bob").unwrap();
        db.lock()
            .unwrap()
            .execute(
                "INSERT INTO conversation_members (conversation_id, username, position, new_message)
                 VALUES (?1, 'carol', 2, 0)",
                rusqlite::params![conv.id],
            )
            .unwrap();

        assert_eq!(dir.mark_unseen_except("alice", &conv.id).unwrap(), 2);

        let fetched = dir.get_by_id(&conv.id).unwrap();
        assert_eq!(fetched.unseen_for("alice"), Some(false));
        assert_eq!(fetched.unseen_for("bob"), Some(true));
        assert_eq!(fetched.unseen_for("carol"), Some(true));
    }

    #[test]
    fn test_mark_unseen_except_non_member_changes_nothing() {
        let dir = directory();
        let conv = dir.create("alice", "bob").unwrap();

        assert!(matches!(
            dir.mark_unseen_except("mallory", &conv.id),
            Err(DirectoryError::NotFound(_))
        ));
        assert!(matches!(
            dir.mark_unseen_except("alice", "missing"),
            Err(DirectoryError::NotFound(_))
        ));

        let fetched = dir.get_by_id(&conv.id).unwrap();
        assert_eq!(fetched.unseen_for("alice"), Some(false));
        assert_eq!(fetched.unseen_for("bob"), Some(false));
    }

    #[test]
    fn test_mark_non_member_is_not_found() {
        let dir = directory();
        let conv = dir.create("alice", "bob").unwrap();
        assert!(matches!(
            dir.mark_unseen("mallory", &conv.id),
            Err(DirectoryError::NotFound(_))
        ));
    }
}
