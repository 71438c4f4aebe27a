use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// A single turn's message within a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Append-only conversational context for one caller. Tracks the last
/// backend routed to so follow-up queries ("describe it", "show me more")
/// can resolve `context_indicators` without re-stating the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub messages: Vec<Message>,
    pub last_backend: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Session {
    pub fn new(id: Uuid, now: i64) -> Self {
        Self {
            id,
            messages: Vec::new(),
            last_backend: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>, now: i64) {
        self.messages.push(Message {
            role,
            content: content.into(),
            ts: now,
        });
        self.updated_at = now;
    }

    pub fn set_last_backend(&mut self, backend: impl Into<String>, now: i64) {
        self.last_backend = Some(backend.into());
        self.updated_at = now;
    }

    /// Most recent user message, if any — used by the smart router to
    /// fall back on context when the current query is a bare follow-up.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// One append-log record: a session id plus the message that was just
/// pushed, mirroring `session_manager.add_message`'s write-through shape
/// (`examples/original_source/devops_agent/cli_helper.py`'s call sites).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogRecord {
    session_id: Uuid,
    message: Message,
}

/// Multi-session store: an in-memory `DashMap` of live sessions plus an
/// append-only on-disk log (spec.md §6: "session log (append records)",
/// §5: "per-session serialization; no cross-session coordination
/// needed"). The log is write-only from this process's perspective —
/// persistent *session storage* (replaying the log back into sessions on
/// restart) is spec.md §1's explicit out-of-scope external collaborator,
/// so this store only ever appends, never replays.
pub struct SessionStore {
    sessions: DashMap<Uuid, Session>,
    log_path: PathBuf,
    log_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(log_path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            log_path: log_path.into(),
            log_lock: Mutex::new(()),
        })
    }

    /// Fetch the session for `id`, creating a fresh one if this is its
    /// first turn.
    pub fn get_or_create(&self, id: Uuid, now: i64) -> Session {
        self.sessions
            .entry(id)
            .or_insert_with(|| Session::new(id, now))
            .clone()
    }

    /// Persist a mutated session back into the map and append its latest
    /// message to the on-disk log.
    pub async fn save(&self, session: Session) {
        let latest = session.messages.last().cloned();
        let id = session.id;
        self.sessions.insert(id, session);
        if let Some(message) = latest {
            self.append_log(LogRecord { session_id: id, message }).await;
        }
    }

    async fn append_log(&self, record: LogRecord) {
        let Ok(line) = serde_json::to_string(&record) else {
            return;
        };
        let _guard = self.log_lock.lock().await;
        if let Ok(mut file) = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
        {
            use tokio::io::AsyncWriteExt;
            let _ = file.write_all(line.as_bytes()).await;
            let _ = file.write_all(b"\n").await;
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_updates_timestamp() {
        let mut session = Session::new(Uuid::nil(), 100);
        session.push(Role::User, "list pods", 200);
        assert_eq!(session.updated_at, 200);
        assert_eq!(session.created_at, 100);
        assert_eq!(session.messages.len(), 1);
    }

    #[test]
    fn test_last_backend_tracks_routing() {
        let mut session = Session::new(Uuid::nil(), 0);
        assert!(session.last_backend.is_none());
        session.set_last_backend("docker", 1);
        assert_eq!(session.last_backend.as_deref(), Some("docker"));
    }

    #[test]
    fn test_last_user_message_skips_assistant_turns() {
        let mut session = Session::new(Uuid::nil(), 0);
        session.push(Role::User, "list pods", 1);
        session.push(Role::Assistant, "here are the pods", 2);
        assert_eq!(session.last_user_message(), Some("list pods"));
    }

    #[tokio::test]
    async fn test_get_or_create_is_stable_across_turns() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions.log"));
        let id = Uuid::nil();

        let mut session = store.get_or_create(id, 0);
        session.push(Role::User, "list pods", 1);
        session.set_last_backend("docker", 1);
        store.save(session).await;

        let reloaded = store.get_or_create(id, 2);
        assert_eq!(reloaded.messages.len(), 1);
        assert_eq!(reloaded.last_backend.as_deref(), Some("docker"));
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_save_appends_latest_message_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("sessions.log");
        let store = SessionStore::new(log_path.clone());
        let id = Uuid::nil();

        let mut session = store.get_or_create(id, 0);
        session.push(Role::User, "list pods", 1);
        store.save(session.clone()).await;
        session.push(Role::Assistant, "done", 2);
        store.save(session).await;

        let contents = tokio::fs::read_to_string(&log_path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("done"));
    }
}
