//! In-process history backend.
//! Not persistent across restarts; used for local runs and tests.

use async_trait::async_trait;
use std::collections::{ BTreeMap, HashMap };
use std::sync::{ Arc, Mutex, RwLock };

use crate::error::{ StoreError, Table };
use crate::history::HistoryBackend;
use crate::models::chat::{ ChatMessage, Session };

type Partition = Arc<Mutex<BTreeMap<i64, ChatMessage>>>;

/// Each collection starts out unprovisioned (`None`), like a fresh database.
/// Messages are partitioned per session so writers on different sessions
/// only share the brief partition lookup.
#[derive(Default)]
pub struct MemoryBackend {
    sessions: RwLock<Option<HashMap<String, Session>>>,
    messages: RwLock<Option<HashMap<String, Partition>>>,
}

fn poisoned(what: &str) -> StoreError {
    StoreError::Backend(format!("{} lock poisoned", what))
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend with both collections already in place.
    pub fn provisioned() -> Self {
        Self {
            sessions: RwLock::new(Some(HashMap::new())),
            messages: RwLock::new(Some(HashMap::new())),
        }
    }

    fn partition(&self, session_id: &str, create: bool) -> Result<Option<Partition>, StoreError> {
        {
            let guard = self.messages.read().map_err(|_| poisoned("messages"))?;
            let table = guard.as_ref().ok_or(StoreError::ResourceMissing(Table::Messages))?;
            if let Some(partition) = table.get(session_id) {
                return Ok(Some(partition.clone()));
            }
            if !create {
                return Ok(None);
            }
        }
        let mut guard = self.messages.write().map_err(|_| poisoned("messages"))?;
        let table = guard.as_mut().ok_or(StoreError::ResourceMissing(Table::Messages))?;
        Ok(Some(table.entry(session_id.to_string()).or_default().clone()))
    }
}

#[async_trait]
impl HistoryBackend for MemoryBackend {
    async fn provision(&self, table: Table) -> Result<(), StoreError> {
        match table {
            Table::Sessions => {
                let mut guard = self.sessions.write().map_err(|_| poisoned("sessions"))?;
                guard.get_or_insert_with(HashMap::new);
            }
            Table::Messages => {
                let mut guard = self.messages.write().map_err(|_| poisoned("messages"))?;
                guard.get_or_insert_with(HashMap::new);
            }
        }
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let guard = self.sessions.read().map_err(|_| poisoned("sessions"))?;
        let table = guard.as_ref().ok_or(StoreError::ResourceMissing(Table::Sessions))?;
        Ok(table.get(session_id).cloned())
    }

    async fn create_session(&self, session: &Session) -> Result<(Session, bool), StoreError> {
        let mut guard = self.sessions.write().map_err(|_| poisoned("sessions"))?;
        let table = guard.as_mut().ok_or(StoreError::ResourceMissing(Table::Sessions))?;
        if let Some(existing) = table.get(&session.id) {
            return Ok((existing.clone(), false));
        }
        table.insert(session.id.clone(), session.clone());
        Ok((session.clone(), true))
    }

    async fn touch_session(&self, session_id: &str, updated_at: i64) -> Result<bool, StoreError> {
        let mut guard = self.sessions.write().map_err(|_| poisoned("sessions"))?;
        let table = guard.as_mut().ok_or(StoreError::ResourceMissing(Table::Sessions))?;
        match table.get_mut(session_id) {
            Some(session) => {
                session.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<bool, StoreError> {
        let partition = self
            .partition(&message.session_id, true)?
            .ok_or_else(|| StoreError::Backend("partition vanished".into()))?;
        let mut rows = partition.lock().map_err(|_| poisoned("partition"))?;
        if rows.contains_key(&message.timestamp) {
            return Ok(false);
        }
        rows.insert(message.timestamp, message.clone());
        Ok(true)
    }

    async fn query_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        match self.partition(session_id, false)? {
            Some(partition) => {
                let rows = partition.lock().map_err(|_| poisoned("partition"))?;
                Ok(rows.values().cloned().collect())
            }
            None => Ok(Vec::new()),
        }
    }

    async fn latest_timestamp(&self, session_id: &str) -> Result<Option<i64>, StoreError> {
        match self.partition(session_id, false)? {
            Some(partition) => {
                let rows = partition.lock().map_err(|_| poisoned("partition"))?;
                Ok(rows.keys().next_back().copied())
            }
            None => Ok(None),
        }
    }

    async fn delete_message(&self, session_id: &str, timestamp: i64) -> Result<(), StoreError> {
        if let Some(partition) = self.partition(session_id, false)? {
            let mut rows = partition.lock().map_err(|_| poisoned("partition"))?;
            rows.remove(&timestamp);
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
