#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::{ Arc, Mutex };

use deepvalue_chat::agent::ChatAgent;
use deepvalue_chat::error::{ LlmError, StoreError, Table };
use deepvalue_chat::history::{ HistoryBackend, MemoryBackend, SessionStore };
use deepvalue_chat::llm::chat::{ ChatClient, Completion, DeltaStream, GenerationRequest, Usage };
use deepvalue_chat::llm::{ GenerationParams, ModelGateway };
use deepvalue_chat::models::chat::{ ChatMessage, Session };

/// Replays canned output and records every request it receives.
pub struct ScriptedClient {
    deltas: Vec<String>,
    fail_after: Option<usize>,
    completion: String,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedClient {
    pub fn streaming(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            fail_after: None,
            completion: deltas.concat(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Yields the first `n` deltas, then a stream error.
    pub fn failing_after(deltas: &[&str], n: usize) -> Self {
        Self { fail_after: Some(n), ..Self::streaming(deltas) }
    }

    pub fn recorded(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<Completion, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(Completion {
            text: self.completion.clone(),
            usage: Usage { input_tokens: 10, output_tokens: 5 },
        })
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<DeltaStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut items: Vec<Result<String, LlmError>> = self.deltas
            .iter()
            .take(self.fail_after.unwrap_or(usize::MAX))
            .cloned()
            .map(Ok)
            .collect();
        if self.fail_after.is_some() {
            items.push(Err(LlmError::Stream("connection reset".to_string())));
        }
        Ok(Box::pin(stream::iter(items)))
    }

    fn get_base_url(&self) -> Option<String> {
        None
    }

    fn backend_name(&self) -> &str {
        "scripted"
    }
}

/// Memory backend whose n-th delete call fails.
pub struct FlakyDeleteBackend {
    inner: MemoryBackend,
    deletes: AtomicUsize,
    fail_on: usize,
}

impl FlakyDeleteBackend {
    pub fn new(fail_on: usize) -> Self {
        Self { inner: MemoryBackend::new(), deletes: AtomicUsize::new(0), fail_on }
    }
}

#[async_trait]
impl HistoryBackend for FlakyDeleteBackend {
    async fn provision(&self, table: Table) -> Result<(), StoreError> {
        self.inner.provision(table).await
    }
    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        self.inner.get_session(id).await
    }
    async fn create_session(&self, s: &Session) -> Result<(Session, bool), StoreError> {
        self.inner.create_session(s).await
    }
    async fn touch_session(&self, id: &str, ts: i64) -> Result<bool, StoreError> {
        self.inner.touch_session(id, ts).await
    }
    async fn insert_message(&self, m: &ChatMessage) -> Result<bool, StoreError> {
        self.inner.insert_message(m).await
    }
    async fn query_messages(&self, id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        self.inner.query_messages(id).await
    }
    async fn latest_timestamp(&self, id: &str) -> Result<Option<i64>, StoreError> {
        self.inner.latest_timestamp(id).await
    }
    async fn delete_message(&self, id: &str, ts: i64) -> Result<(), StoreError> {
        let call = self.deletes.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(StoreError::Backend("throttled".to_string()));
        }
        self.inner.delete_message(id, ts).await
    }
    fn backend_name(&self) -> &str {
        "flaky"
    }
}

pub fn memory_store() -> Arc<SessionStore> {
    Arc::new(SessionStore::new(Arc::new(MemoryBackend::new())))
}

pub fn agent_with(client: Arc<ScriptedClient>, store: Arc<SessionStore>) -> ChatAgent {
    let gateway = Arc::new(ModelGateway::new(client, GenerationParams::default()));
    ChatAgent::new(store, gateway)
}
