use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: Conversation directory

CREATE TABLE conversations (
    id TEXT PRIMARY KEY,
    created INTEGER NOT NULL
);

-- Members keep their insertion order through position.
-- new_message is the per-member unseen flag.
CREATE TABLE conversation_members (
    conversation_id TEXT NOT NULL,
    username TEXT NOT NULL,
    position INTEGER NOT NULL,
    new_message INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (conversation_id, username),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX idx_conversation_members_username ON conversation_members(username);
",
    )])
}
