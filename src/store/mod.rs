//! Relational persistence: conversations, messages, and board decisions.
//!
//! Grounded on `claw-memory::store::MemoryStore` (`rusqlite` + a single mutex-guarded connection,
//! WAL mode, upsert-by-id writes). Every query runs inside [`tokio::task::spawn_blocking`] so a
//! slow disk never stalls the async runtime — the one divergence from the grounding source, which
//! is itself synchronous end-to-end.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::TheresError;
use crate::llm::message::Role;

fn db_error(e: impl std::fmt::Display) -> TheresError {
    TheresError::Unknown(format!("relational store error: {e}"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardDecisionRecord {
    pub id: String,
    pub question: String,
    pub context: Option<String>,
    pub opinions_json: String,
    pub synthesis_json: String,
    pub confidence: String,
    pub recommendation: String,
    pub created_at: DateTime<Utc>,
}

pub struct RelationalStore {
    conn: Arc<Mutex<Connection>>,
}

impl RelationalStore {
    pub fn open(path: &Path) -> Result<Self, TheresError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(db_error)?;
            }
        }
        let conn = Connection::open(path).map_err(db_error)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;").map_err(db_error)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at);

            CREATE TABLE IF NOT EXISTS board_decisions (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                context TEXT,
                opinions_json TEXT NOT NULL,
                synthesis_json TEXT NOT NULL,
                confidence TEXT NOT NULL,
                recommendation TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_board_decisions_created ON board_decisions(created_at);
            ",
        )
        .map_err(db_error)?;
        Ok(RelationalStore { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self, TheresError> {
        Self::open(Path::new(":memory:"))
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, TheresError>
    where
        F: FnOnce(&Connection) -> Result<T, TheresError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| TheresError::Unknown(format!("relational store task panicked: {e}")))?
    }

    pub async fn create_conversation(&self, title: Option<String>) -> Result<ConversationRecord, TheresError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let record = ConversationRecord { id, title, created_at: now, updated_at: now };
        let insert = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO conversations (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![insert.id, insert.title, insert.created_at.to_rfc3339(), insert.updated_at.to_rfc3339()],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await?;
        Ok(record)
    }

    pub async fn add_message(&self, conversation_id: &str, role: Role, content: &str) -> Result<MessageRecord, TheresError> {
        let record = MessageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        let insert = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    insert.id,
                    insert.conversation_id,
                    role_to_str(insert.role),
                    insert.content,
                    insert.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_error)?;
            conn.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![insert.created_at.to_rfc3339(), insert.conversation_id],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await?;
        Ok(record)
    }

    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageRecord>, TheresError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT id, conversation_id, role, content, created_at FROM messages WHERE conversation_id = ?1 ORDER BY created_at ASC")
                .map_err(db_error)?;
            let rows = stmt
                .query_map(params![conversation_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .map_err(db_error)?
                .filter_map(|r| r.ok())
                .filter_map(|(id, conversation_id, role, content, created_at)| {
                    Some(MessageRecord {
                        id,
                        conversation_id,
                        role: role_from_str(&role)?,
                        content,
                        created_at: DateTime::parse_from_rfc3339(&created_at).ok()?.with_timezone(&Utc),
                    })
                })
                .collect();
            Ok(rows)
        })
        .await
    }

    pub async fn list_conversations(&self, limit: usize) -> Result<Vec<ConversationRecord>, TheresError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT id, title, created_at, updated_at FROM conversations ORDER BY updated_at DESC LIMIT ?1")
                .map_err(db_error)?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?, row.get::<_, String>(2)?, row.get::<_, String>(3)?))
                })
                .map_err(db_error)?
                .filter_map(|r| r.ok())
                .filter_map(|(id, title, created_at, updated_at)| {
                    Some(ConversationRecord {
                        id,
                        title,
                        created_at: DateTime::parse_from_rfc3339(&created_at).ok()?.with_timezone(&Utc),
                        updated_at: DateTime::parse_from_rfc3339(&updated_at).ok()?.with_timezone(&Utc),
                    })
                })
                .collect();
            Ok(rows)
        })
        .await
    }

    pub async fn persist_board_decision(&self, decision: &BoardDecisionRecord) -> Result<(), TheresError> {
        let decision = decision.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO board_decisions (id, question, context, opinions_json, synthesis_json, confidence, recommendation, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    decision.id,
                    decision.question,
                    decision.context,
                    decision.opinions_json,
                    decision.synthesis_json,
                    decision.confidence,
                    decision.recommendation,
                    decision.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await
    }

    pub async fn get_decision(&self, id: &str) -> Result<Option<BoardDecisionRecord>, TheresError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT id, question, context, opinions_json, synthesis_json, confidence, recommendation, created_at FROM board_decisions WHERE id = ?1")
                .map_err(db_error)?;
            let record = stmt
                .query_row(params![id], row_to_decision)
                .ok();
            Ok(record)
        })
        .await
    }

    pub async fn list_decisions(&self, limit: usize) -> Result<Vec<BoardDecisionRecord>, TheresError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT id, question, context, opinions_json, synthesis_json, confidence, recommendation, created_at FROM board_decisions ORDER BY created_at DESC LIMIT ?1")
                .map_err(db_error)?;
            let rows = stmt
                .query_map(params![limit as i64], row_to_decision)
                .map_err(db_error)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
        .await
    }

    pub async fn delete_decision(&self, id: &str) -> Result<bool, TheresError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let rows = conn.execute("DELETE FROM board_decisions WHERE id = ?1", params![id]).map_err(db_error)?;
            Ok(rows > 0)
        })
        .await
    }
}

fn row_to_decision(row: &rusqlite::Row) -> rusqlite::Result<BoardDecisionRecord> {
    let created_at: String = row.get(7)?;
    Ok(BoardDecisionRecord {
        id: row.get(0)?,
        question: row.get(1)?,
        context: row.get(2)?,
        opinions_json: row.get(3)?,
        synthesis_json: row.get(4)?,
        confidence: row.get(5)?,
        recommendation: row.get(6)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn role_from_str(s: &str) -> Option<Role> {
    match s {
        "system" => Some(Role::System),
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "tool" => Some(Role::Tool),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conversation_and_message_round_trip() {
        let store = RelationalStore::open_in_memory().unwrap();
        let conversation = store.create_conversation(Some("Q3 planning".to_string())).await.unwrap();
        store.add_message(&conversation.id, Role::User, "what should we prioritize?").await.unwrap();
        store.add_message(&conversation.id, Role::Assistant, "let's start with onboarding.").await.unwrap();

        let messages = store.list_messages(&conversation.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn list_conversations_is_anti_chronological_by_last_update() {
        let store = RelationalStore::open_in_memory().unwrap();
        let first = store.create_conversation(None).await.unwrap();
        let second = store.create_conversation(None).await.unwrap();
        store.add_message(&first.id, Role::User, "bumping this one").await.unwrap();

        let conversations = store.list_conversations(10).await.unwrap();
        assert_eq!(conversations[0].id, first.id);
        assert_eq!(conversations[1].id, second.id);
    }

    #[tokio::test]
    async fn board_decision_persists_and_is_queryable_and_deletable() {
        let store = RelationalStore::open_in_memory().unwrap();
        let decision = BoardDecisionRecord {
            id: "abc123".to_string(),
            question: "should we expand to a second location?".to_string(),
            context: None,
            opinions_json: "[]".to_string(),
            synthesis_json: "{}".to_string(),
            confidence: "medium".to_string(),
            recommendation: "wait one more quarter".to_string(),
            created_at: Utc::now(),
        };
        store.persist_board_decision(&decision).await.unwrap();

        let fetched = store.get_decision("abc123").await.unwrap().unwrap();
        assert_eq!(fetched.recommendation, "wait one more quarter");

        let listed = store.list_decisions(10).await.unwrap();
        assert_eq!(listed.len(), 1);

        assert!(store.delete_decision("abc123").await.unwrap());
        assert!(store.get_decision("abc123").await.unwrap().is_none());
    }
}
