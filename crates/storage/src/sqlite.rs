use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use civic_core::{
    generate_public_id, Conversation, DialogueState, Incident, IncidentHistoryEntry,
    IncidentStatus, KbChunk, KbDocument, Message, NewIncident, PendingIntent, Sender, SlotState,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::{
    status_change_note, ConversationStore, IncidentRepository, KnowledgeRepository,
    StorageError, TurnCommit, INCIDENT_CREATED_NOTE, PUBLIC_ID_ATTEMPTS,
};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid sqlite url {}", database_url))?
            .create_if_missing(true);

        // every connection to `:memory:` opens its own empty database
        let in_memory = database_url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        debug!(database_url, "sqlite store ready");
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
              id TEXT PRIMARY KEY,
              session_id TEXT NOT NULL UNIQUE,
              created_at TEXT NOT NULL,
              pending_intent TEXT,
              slot_state TEXT NOT NULL DEFAULT '{}'
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
              seq INTEGER PRIMARY KEY AUTOINCREMENT,
              conversation_id TEXT NOT NULL REFERENCES conversations(id),
              sender TEXT NOT NULL,
              text TEXT NOT NULL,
              timestamp TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
              id TEXT PRIMARY KEY,
              public_id TEXT NOT NULL UNIQUE,
              title TEXT NOT NULL,
              category TEXT NOT NULL,
              location_text TEXT,
              contact_email TEXT,
              description TEXT NOT NULL,
              status TEXT NOT NULL,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS incident_history (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              public_id TEXT NOT NULL REFERENCES incidents(public_id),
              status TEXT NOT NULL,
              note TEXT NOT NULL,
              timestamp TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kb_documents (
              id TEXT PRIMARY KEY,
              position INTEGER NOT NULL,
              title TEXT NOT NULL,
              body TEXT NOT NULL,
              source_url TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kb_chunks (
              id TEXT PRIMARY KEY,
              doc_id TEXT NOT NULL REFERENCES kb_documents(id),
              idx INTEGER NOT NULL,
              text TEXT NOT NULL,
              embedding TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Reads an RFC3339 column; a corrupt value is logged and read as now.
fn row_timestamp(row: &SqliteRow, column: &'static str) -> DateTime<Utc> {
    let raw: String = row.get(column);
    raw.parse().unwrap_or_else(|error| {
        warn!(column, value = %raw, error = %error, "unreadable stored timestamp, using now");
        Utc::now()
    })
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn conversation_from_row(row: &SqliteRow) -> Conversation {
    let id: String = row.get("id");
    let pending: Option<String> = row.get("pending_intent");
    let raw_slots: Option<String> = row.get("slot_state");
    let slots = SlotState::decode(raw_slots.as_deref()).unwrap_or_else(|error| {
        warn!(conversation_id = %id, error = %error, "unreadable slot state, starting empty");
        SlotState::default()
    });

    Conversation {
        session_id: row.get("session_id"),
        created_at: row_timestamp(row, "created_at"),
        state: DialogueState::from_stored(pending.as_deref(), slots),
        id,
    }
}

fn incident_from_row(row: &SqliteRow) -> Result<Incident> {
    let status: String = row.get("status");
    let status = IncidentStatus::parse(&status)
        .ok_or_else(|| anyhow!("stored incident has unknown status `{}`", status))?;

    Ok(Incident {
        id: row.get("id"),
        public_id: row.get("public_id"),
        title: row.get("title"),
        category: row.get("category"),
        location_text: row.get("location_text"),
        contact_email: row.get("contact_email"),
        description: row.get("description"),
        status,
        created_at: row_timestamp(row, "created_at"),
        updated_at: row_timestamp(row, "updated_at"),
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let sender: String = row.get("sender");
    let sender =
        Sender::parse(&sender).ok_or_else(|| anyhow!("stored message has unknown sender `{}`", sender))?;

    Ok(Message {
        conversation_id: row.get("conversation_id"),
        sender,
        text: row.get("text"),
        timestamp: row_timestamp(row, "timestamp"),
        seq: row.get("seq"),
    })
}

async fn insert_message(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    sender: Sender,
    text: &str,
    timestamp: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO messages (conversation_id, sender, text, timestamp)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(conversation_id)
    .bind(sender.as_str())
    .bind(text)
    .bind(timestamp.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn insert_history(
    conn: &mut SqliteConnection,
    public_id: &str,
    status: IncidentStatus,
    note: &str,
    timestamp: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO incident_history (public_id, status, note, timestamp)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(public_id)
    .bind(status.as_str())
    .bind(note)
    .bind(timestamp.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Inserts the incident together with its creation history entry.
async fn insert_incident(conn: &mut SqliteConnection, incident: &Incident) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO incidents (
          id, public_id, title, category, location_text, contact_email,
          description, status, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&incident.id)
    .bind(&incident.public_id)
    .bind(&incident.title)
    .bind(&incident.category)
    .bind(&incident.location_text)
    .bind(&incident.contact_email)
    .bind(&incident.description)
    .bind(incident.status.as_str())
    .bind(incident.created_at.to_rfc3339())
    .bind(incident.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    insert_history(
        conn,
        &incident.public_id,
        incident.status,
        INCIDENT_CREATED_NOTE,
        incident.created_at,
    )
    .await
}

impl ConversationStore for SqliteStore {
    async fn find_by_session(&self, session_id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT id, session_id, created_at, pending_intent, slot_state
            FROM conversations
            WHERE session_id = ?1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn create(&self, session_id: &str) -> Result<Conversation> {
        let fresh = Conversation::new(session_id);

        sqlx::query(
            r#"
            INSERT INTO conversations (id, session_id, created_at, pending_intent, slot_state)
            VALUES (?1, ?2, ?3, NULL, '{}')
            ON CONFLICT(session_id) DO NOTHING
            "#,
        )
        .bind(&fresh.id)
        .bind(session_id)
        .bind(fresh.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_by_session(session_id)
            .await?
            .ok_or_else(|| anyhow!("conversation for session {} vanished after insert", session_id))
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        sender: Sender,
        text: &str,
    ) -> Result<Message> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM conversations WHERE id = ?1")
            .bind(conversation_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Err(StorageError::ConversationNotFound(conversation_id.to_string()).into());
        }

        let timestamp = Utc::now();
        let seq = insert_message(&mut tx, conversation_id, sender, text, timestamp).await?;
        tx.commit().await?;

        Ok(Message {
            conversation_id: conversation_id.to_string(),
            sender,
            text: text.to_string(),
            timestamp,
            seq,
        })
    }

    async fn save_state(&self, conversation_id: &str, state: &DialogueState) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET pending_intent = ?2, slot_state = ?3
            WHERE id = ?1
            "#,
        )
        .bind(conversation_id)
        .bind(state.pending_intent().map(PendingIntent::as_str))
        .bind(state.slot_state_json())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ConversationNotFound(conversation_id.to_string()).into());
        }
        Ok(())
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, conversation_id, sender, text, timestamp
            FROM messages
            WHERE conversation_id = ?1
            ORDER BY seq
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn commit_turn(&self, commit: TurnCommit) -> Result<()> {
        let TurnCommit {
            conversation,
            messages,
            incident,
        } = commit;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, session_id, created_at, pending_intent, slot_state)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
              pending_intent=excluded.pending_intent,
              slot_state=excluded.slot_state
            "#,
        )
        .bind(&conversation.id)
        .bind(&conversation.session_id)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.state.pending_intent().map(PendingIntent::as_str))
        .bind(conversation.state.slot_state_json())
        .execute(&mut *tx)
        .await?;

        let timestamp = Utc::now();
        for message in &messages {
            insert_message(&mut tx, &conversation.id, message.sender, &message.text, timestamp)
                .await?;
        }

        if let Some(incident) = &incident {
            if let Err(error) = insert_incident(&mut tx, incident).await {
                if is_unique_violation(&error) {
                    return Err(StorageError::DuplicatePublicId(incident.public_id.clone()).into());
                }
                return Err(error.into());
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

impl IncidentRepository for SqliteStore {
    async fn create_incident(&self, new: NewIncident, status: IncidentStatus) -> Result<Incident> {
        for _ in 0..PUBLIC_ID_ATTEMPTS {
            let incident = Incident::from_new(new.clone(), generate_public_id(), status);
            let mut tx = self.pool.begin().await?;

            match insert_incident(&mut tx, &incident).await {
                Ok(()) => {
                    tx.commit().await?;
                    return Ok(incident);
                }
                Err(error) if is_unique_violation(&error) => {
                    warn!(public_id = %incident.public_id, "public id collision, retrying");
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(anyhow!("could not allocate an unused incident public id"))
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Incident>> {
        let row = sqlx::query(
            r#"
            SELECT id, public_id, title, category, location_text, contact_email,
                   description, status, created_at, updated_at
            FROM incidents
            WHERE public_id = ?1
            "#,
        )
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(incident_from_row).transpose()
    }

    async fn incident_history(&self, public_id: &str) -> Result<Vec<IncidentHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT status, note, timestamp
            FROM incident_history
            WHERE public_id = ?1
            ORDER BY id
            "#,
        )
        .bind(public_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(IncidentHistoryEntry {
                    status: IncidentStatus::parse(&status)
                        .ok_or_else(|| anyhow!("stored history has unknown status `{}`", status))?,
                    note: row.get("note"),
                    timestamp: row_timestamp(row, "timestamp"),
                })
            })
            .collect()
    }

    async fn list_incidents(&self, offset: usize, limit: usize) -> Result<Vec<Incident>> {
        let rows = sqlx::query(
            r#"
            SELECT id, public_id, title, category, location_text, contact_email,
                   description, status, created_at, updated_at
            FROM incidents
            ORDER BY rowid
            LIMIT ?1 OFFSET ?2
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(incident_from_row).collect()
    }

    async fn update_status(
        &self,
        public_id: &str,
        status: IncidentStatus,
        note: Option<&str>,
    ) -> Result<Incident> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE incidents
            SET status = ?2, updated_at = ?3
            WHERE public_id = ?1
            "#,
        )
        .bind(public_id)
        .bind(status.as_str())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::IncidentNotFound(public_id.to_string()).into());
        }

        insert_history(&mut tx, public_id, status, &status_change_note(status, note), now).await?;
        tx.commit().await?;

        self.find_by_public_id(public_id)
            .await?
            .ok_or_else(|| StorageError::IncidentNotFound(public_id.to_string()).into())
    }
}

impl KnowledgeRepository for SqliteStore {
    async fn list_documents(&self) -> Result<Vec<KbDocument>> {
        let doc_rows = sqlx::query(
            r#"
            SELECT id, title, body, source_url
            FROM kb_documents
            ORDER BY position
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let chunk_rows = sqlx::query(
            r#"
            SELECT id, doc_id, text, embedding
            FROM kb_chunks
            ORDER BY doc_id, idx
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut docs = doc_rows
            .iter()
            .map(|row| KbDocument {
                id: row.get("id"),
                title: row.get("title"),
                body: row.get("body"),
                source_url: row.get("source_url"),
                chunks: Vec::new(),
            })
            .collect::<Vec<_>>();

        for row in &chunk_rows {
            let doc_id: String = row.get("doc_id");
            if let Some(doc) = docs.iter_mut().find(|doc| doc.id == doc_id) {
                doc.chunks.push(KbChunk {
                    id: row.get("id"),
                    text: row.get("text"),
                    embedding: row.get("embedding"),
                });
            }
        }

        Ok(docs)
    }

    async fn upsert_document(&self, doc: &KbDocument) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO kb_documents (id, position, title, body, source_url)
            VALUES (?1, (SELECT COALESCE(MAX(position), -1) + 1 FROM kb_documents), ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
              title=excluded.title,
              body=excluded.body,
              source_url=excluded.source_url
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.title)
        .bind(&doc.body)
        .bind(&doc.source_url)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM kb_chunks WHERE doc_id = ?1")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await?;

        for (idx, chunk) in doc.chunks.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO kb_chunks (id, doc_id, idx, text, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(&chunk.id)
            .bind(&doc.id)
            .bind(idx as i64)
            .bind(&chunk.text)
            .bind(&chunk.embedding)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
