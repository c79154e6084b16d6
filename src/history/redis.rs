use async_trait::async_trait;
use log::{ debug, error };
use redis::{ AsyncCommands, Client };
use serde::{ Deserialize, Serialize };
use std::collections::HashMap;

use crate::error::{ StoreError, Table };
use crate::history::HistoryBackend;
use crate::models::chat::{ ChatMessage, Role, Session };

#[derive(Serialize, Deserialize)]
struct StoredMessage {
    role: Role,
    content: String,
    timestamp: i64,
}

/// Redis layout, per session id:
/// - `{prefix}session:{id}`: hash with `createdAt` / `updatedAt`
/// - `{prefix}messages:{id}`: hash of timestamp -> JSON message
/// - `{prefix}message-index:{id}`: sorted set of timestamps (score = timestamp)
///
/// Redis has no tables to create, so this backend never reports
/// `ResourceMissing` and provisioning only checks connectivity.
pub struct RedisBackend {
    client: Client,
    key_prefix: String,
}

impl RedisBackend {
    pub fn new(host: &str, key_prefix: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(host)?,
            key_prefix: key_prefix.to_string(),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn session_key(&self, session_id: &str) -> String {
        format!("{}session:{}", self.key_prefix, session_id)
    }

    fn messages_key(&self, session_id: &str) -> String {
        format!("{}messages:{}", self.key_prefix, session_id)
    }

    fn index_key(&self, session_id: &str) -> String {
        format!("{}message-index:{}", self.key_prefix, session_id)
    }

    /// HSETNX and the index ZADD in one MULTI/EXEC. Re-adding an existing
    /// timestamp to the index is a no-op, so a lost HSETNX leaves it intact.
    fn insert_pipeline(&self, message: &ChatMessage, json_msg: &str) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_nx(self.messages_key(&message.session_id), message.timestamp, json_msg)
            .zadd(self.index_key(&message.session_id), message.timestamp, message.timestamp)
            .ignore();
        pipe
    }

    fn session_from_fields(session_id: &str, fields: HashMap<String, i64>) -> Option<Session> {
        let created_at = *fields.get("createdAt")?;
        let updated_at = fields.get("updatedAt").copied().unwrap_or(created_at);
        Some(Session {
            id: session_id.to_string(),
            created_at,
            updated_at,
        })
    }
}

#[async_trait]
impl HistoryBackend for RedisBackend {
    async fn provision(&self, table: Table) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!("Redis keyspace for {} needs no provisioning", table);
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let mut conn = self.get_connection().await?;
        let fields: HashMap<String, i64> = conn.hgetall(self.session_key(session_id)).await?;
        Ok(Self::session_from_fields(session_id, fields))
    }

    async fn create_session(&self, session: &Session) -> Result<(Session, bool), StoreError> {
        let mut conn = self.get_connection().await?;
        let key = self.session_key(&session.id);
        let created: bool = conn.hset_nx(&key, "createdAt", session.created_at).await?;
        if created {
            let _: () = conn.hset(&key, "updatedAt", session.updated_at).await?;
            return Ok((session.clone(), true));
        }
        let fields: HashMap<String, i64> = conn.hgetall(&key).await?;
        let existing = Self::session_from_fields(&session.id, fields).unwrap_or_else(||
            session.clone()
        );
        Ok((existing, false))
    }

    async fn touch_session(&self, session_id: &str, updated_at: i64) -> Result<bool, StoreError> {
        let mut conn = self.get_connection().await?;
        let key = self.session_key(session_id);
        let exists: bool = conn.exists(&key).await?;
        if !exists {
            return Ok(false);
        }
        let _: () = conn.hset(&key, "updatedAt", updated_at).await?;
        Ok(true)
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<bool, StoreError> {
        let mut conn = self.get_connection().await?;
        let stored = StoredMessage {
            role: message.role,
            content: message.content.clone(),
            timestamp: message.timestamp,
        };
        let json_msg = serde_json::to_string(&stored)?;
        let (written,): (bool,) = self
            .insert_pipeline(message, &json_msg)
            .query_async(&mut conn).await?;
        Ok(written)
    }

    async fn query_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let mut conn = self.get_connection().await?;
        let stamps: Vec<i64> = conn.zrangebyscore(self.index_key(session_id), "-inf", "+inf").await?;
        if stamps.is_empty() {
            return Ok(Vec::new());
        }
        let entries: Vec<Option<String>> = redis
            ::cmd("HMGET")
            .arg(self.messages_key(session_id))
            .arg(&stamps)
            .query_async(&mut conn).await?;

        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries.into_iter().flatten() {
            match serde_json::from_str::<StoredMessage>(&entry) {
                Ok(msg) => {
                    messages.push(ChatMessage {
                        session_id: session_id.to_string(),
                        timestamp: msg.timestamp,
                        role: msg.role,
                        content: msg.content,
                    });
                }
                Err(e) => {
                    error!("Error parsing history entry: {}", e);
                }
            }
        }
        Ok(messages)
    }

    async fn latest_timestamp(&self, session_id: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.get_connection().await?;
        let newest: Vec<i64> = conn.zrevrange(self.index_key(session_id), 0, 0).await?;
        Ok(newest.first().copied())
    }

    async fn delete_message(&self, session_id: &str, timestamp: i64) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let _: () = conn.hdel(self.messages_key(session_id), timestamp).await?;
        let _: () = conn.zrem(self.index_key(session_id), timestamp).await?;
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "redis"
    }
}
