pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::Utc;
use log::{ info, warn, debug };
use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use crate::cli::Args;
use crate::error::{ StoreError, Table };
use crate::models::chat::{ ChatMessage, Role, Session };

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

/// Upper bound on timestamp bumps when another writer holds the same key.
const MAX_TIMESTAMP_ATTEMPTS: usize = 16;

/// Raw key-based access to the Sessions and Messages collections.
///
/// Any call against a collection that does not exist yet must fail with
/// [`StoreError::ResourceMissing`] so [`SessionStore`] can provision and retry.
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    async fn provision(&self, table: Table) -> Result<(), StoreError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    /// Inserts `session` unless its id is taken. Returns the stored session and
    /// whether this call created it.
    async fn create_session(&self, session: &Session) -> Result<(Session, bool), StoreError>;

    /// Sets `updatedAt` only. Returns `false` when the session does not exist.
    async fn touch_session(&self, session_id: &str, updated_at: i64) -> Result<bool, StoreError>;

    /// Writes the message unless `(session_id, timestamp)` is already taken.
    async fn insert_message(&self, message: &ChatMessage) -> Result<bool, StoreError>;

    /// All messages of one partition, ascending by timestamp.
    async fn query_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError>;

    /// Timestamp of the newest message in the partition, if any.
    async fn latest_timestamp(&self, session_id: &str) -> Result<Option<i64>, StoreError>;

    async fn delete_message(&self, session_id: &str, timestamp: i64) -> Result<(), StoreError>;

    fn backend_name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub deleted: usize,
    pub failed: usize,
}

/// First timestamp to try for a new message: the wall clock, or one past the
/// newest stored message when the clock is behind it.
fn next_timestamp(now: i64, newest: Option<i64>) -> i64 {
    match newest {
        Some(newest) if newest >= now => newest + 1,
        _ => now,
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub struct SessionStore {
    backend: Arc<dyn HistoryBackend>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn HistoryBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }

    /// Provisions both collections. Meant to run once at startup; operations
    /// still recover on their own if this was skipped or failed.
    pub async fn provision(&self) -> Result<(), StoreError> {
        for table in [Table::Sessions, Table::Messages] {
            self.backend.provision(table).await?;
            info!("History table '{}' ready on {} backend", table, self.backend.backend_name());
        }
        Ok(())
    }

    /// Runs `op`; if its collection is missing, provisions it and runs `op`
    /// exactly one more time.
    async fn with_provisioning<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
        where F: Fn() -> Fut, Fut: Future<Output = Result<T, StoreError>>
    {
        match op().await {
            Err(StoreError::ResourceMissing(table)) => {
                warn!("History table '{}' does not exist. Creating it now...", table);
                self.backend.provision(table).await?;
                op().await
            }
            other => other,
        }
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        self.with_provisioning(|| self.backend.get_session(session_id)).await
    }

    /// Returns the session for `session_id`, creating it when absent. The flag
    /// is `true` only for the call that created it.
    pub async fn ensure_session(&self, session_id: &str) -> Result<(Session, bool), StoreError> {
        if let Some(existing) = self.get_session(session_id).await? {
            return Ok((existing, false));
        }
        let fresh = Session::new(session_id, now_millis());
        let (session, created) = self.with_provisioning(||
            self.backend.create_session(&fresh)
        ).await?;
        if created {
            info!("Created new session: {}", session_id);
        }
        Ok((session, created))
    }

    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        self.with_provisioning(|| self.backend.query_messages(session_id)).await
    }

    /// Appends a message and bumps the session's `updatedAt`, creating the
    /// session if needed. Returns the assigned timestamp.
    pub async fn append(
        &self,
        session_id: &str,
        role: Role,
        content: &str
    ) -> Result<i64, StoreError> {
        let newest = self.with_provisioning(|| self.backend.latest_timestamp(session_id)).await?;
        let mut timestamp = next_timestamp(now_millis(), newest);
        let mut attempts = 1;
        loop {
            let message = ChatMessage {
                session_id: session_id.to_string(),
                timestamp,
                role,
                content: content.to_string(),
            };
            if self.with_provisioning(|| self.backend.insert_message(&message)).await? {
                break;
            }
            if attempts >= MAX_TIMESTAMP_ATTEMPTS {
                return Err(
                    StoreError::Backend(
                        format!("could not allocate a unique timestamp in session {}", session_id)
                    )
                );
            }
            attempts += 1;
            debug!("Timestamp {} taken in session {}, retrying", timestamp, session_id);
            timestamp += 1;
        }

        let touched = self.with_provisioning(||
            self.backend.touch_session(session_id, timestamp)
        ).await?;
        if !touched {
            let session = Session::new(session_id, timestamp);
            let (_, created) = self.with_provisioning(||
                self.backend.create_session(&session)
            ).await?;
            if !created {
                self.with_provisioning(|| self.backend.touch_session(session_id, timestamp)).await?;
            }
        }

        Ok(timestamp)
    }

    /// Deletes every message of the session. A failed delete is logged and
    /// skipped; the session itself survives.
    pub async fn clear_messages(&self, session_id: &str) -> Result<ClearReport, StoreError> {
        let messages = self.list_messages(session_id).await?;
        let mut report = ClearReport::default();

        for message in &messages {
            match
                self.with_provisioning(||
                    self.backend.delete_message(&message.session_id, message.timestamp)
                ).await
            {
                Ok(()) => {
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!(
                        "Error deleting message {} of session {}: {}",
                        message.timestamp,
                        session_id,
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            "Cleared session {}: {} deleted, {} failed",
            session_id,
            report.deleted,
            report.failed
        );
        Ok(report)
    }
}

pub async fn create_history_backend(
    args: &Args
) -> Result<Arc<dyn HistoryBackend>, Box<dyn Error + Send + Sync>> {
    match args.history_type.to_lowercase().as_str() {
        "memory" => Ok(Arc::new(MemoryBackend::new())),
        "redis" => {
            let store = RedisBackend::new(&args.history_host, &args.history_redis_prefix)?;
            Ok(Arc::new(store))
        }
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported history store type: {}", args.history_type)
                    )
                )
            ),
    }
}

pub async fn initialize_session_store(
    args: &Args
) -> Result<Arc<SessionStore>, Box<dyn Error + Send + Sync>> {
    info!("Chat history will be stored in: {} at {}", args.history_type, args.history_host);
    let backend = create_history_backend(args).await?;
    let store = SessionStore::new(backend);
    if let Err(e) = store.provision().await {
        warn!("Provisioning history tables failed, will retry on first use: {}", e);
    }
    Ok(Arc::new(store))
}
