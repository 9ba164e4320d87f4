//! Checkpoint Store (C4): per-thread snapshot of ReAct state, pluggable backend.
//!
//! Trait shape grounded in the teacher's `memory::Checkpointer<S>`
//! (`put`/`get_tuple`/`list` keyed by thread), narrowed to the
//! `{GetState, UpdateState, Delete}` capability set spec §4.4 actually needs.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("thread_id required")]
    ThreadIdRequired,
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<CheckpointError> for crate::error::AgentError {
    fn from(err: CheckpointError) -> Self {
        crate::error::AgentError::internal(err)
    }
}

/// Persists per-thread `S` snapshots so an interrupted run can resume
/// (spec §4.4, §4.6 step 6). `UpdateState` always replaces the full
/// snapshot; callers read-modify-write (e.g. to clear `tool_references`).
#[async_trait]
pub trait Checkpointer<S>: Send + Sync
where
    S: Clone + Send + Sync + 'static,
{
    async fn get_state(&self, thread_id: &str) -> Result<Option<S>, CheckpointError>;
    async fn update_state(&self, thread_id: &str, state: S) -> Result<(), CheckpointError>;
    /// Deletes one thread's checkpoint, or every checkpoint when `thread_id` is `None`.
    async fn delete(&self, thread_id: Option<&str>) -> Result<(), CheckpointError>;
}

/// In-memory backend; checkpoints expire with process lifetime (spec §3 Lifecycles).
#[derive(Default)]
pub struct MemorySaver<S> {
    states: DashMap<String, S>,
}

impl<S> MemorySaver<S> {
    pub fn new() -> Self {
        MemorySaver {
            states: DashMap::new(),
        }
    }
}

#[async_trait]
impl<S> Checkpointer<S> for MemorySaver<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn get_state(&self, thread_id: &str) -> Result<Option<S>, CheckpointError> {
        if thread_id.is_empty() {
            return Err(CheckpointError::ThreadIdRequired);
        }
        Ok(self.states.get(thread_id).map(|r| r.clone()))
    }

    async fn update_state(&self, thread_id: &str, state: S) -> Result<(), CheckpointError> {
        if thread_id.is_empty() {
            return Err(CheckpointError::ThreadIdRequired);
        }
        self.states.insert(thread_id.to_string(), state);
        Ok(())
    }

    async fn delete(&self, thread_id: Option<&str>) -> Result<(), CheckpointError> {
        match thread_id {
            Some(id) => {
                self.states.remove(id);
            }
            None => self.states.clear(),
        }
        Ok(())
    }
}

/// Durable backend over a single SQLite table, keyed by `thread_id`, storing
/// the serialized state as a JSON blob (spec §6 persisted state layout).
pub struct SqliteSaver<S> {
    conn: std::sync::Mutex<rusqlite::Connection>,
    _marker: std::marker::PhantomData<S>,
}

impl<S> SqliteSaver<S>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn open(path: &str) -> Result<Self, CheckpointError> {
        let conn = rusqlite::Connection::open(path).map_err(|e| CheckpointError::Storage(e.to_string()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT PRIMARY KEY,
                state_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        Ok(SqliteSaver {
            conn: std::sync::Mutex::new(conn),
            _marker: std::marker::PhantomData,
        })
    }
}

#[async_trait]
impl<S> Checkpointer<S> for SqliteSaver<S>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn get_state(&self, thread_id: &str) -> Result<Option<S>, CheckpointError> {
        if thread_id.is_empty() {
            return Err(CheckpointError::ThreadIdRequired);
        }
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        let row: Option<String> = conn
            .query_row(
                "SELECT state_json FROM checkpoints WHERE thread_id = ?1",
                [thread_id],
                |row| row.get(0),
            )
            .ok();
        match row {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CheckpointError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn update_state(&self, thread_id: &str, state: S) -> Result<(), CheckpointError> {
        if thread_id.is_empty() {
            return Err(CheckpointError::ThreadIdRequired);
        }
        let json = serde_json::to_string(&state).map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        conn.execute(
            "INSERT INTO checkpoints (thread_id, state_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(thread_id) DO UPDATE SET state_json = excluded.state_json, updated_at = excluded.updated_at",
            rusqlite::params![thread_id, json, now],
        )
        .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, thread_id: Option<&str>) -> Result<(), CheckpointError> {
        let conn = self.conn.lock().expect("sqlite connection lock poisoned");
        match thread_id {
            Some(id) => conn.execute("DELETE FROM checkpoints WHERE thread_id = ?1", [id]),
            None => conn.execute("DELETE FROM checkpoints", []),
        }
        .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        Ok(())
    }
}
