/// Database row types.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.

/// Row in the conversations table
#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    /// Unix seconds
    pub created: i64,
}

/// Row in the conversation_members table
#[derive(Debug, Clone)]
pub struct MemberRow {
    pub conversation_id: String,
    pub username: String,
    pub position: i64,
    pub new_message: bool,
}
