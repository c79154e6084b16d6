use futures::stream::{ self, Stream, StreamExt };
use log::{ debug, error, info, warn };
use std::collections::VecDeque;
use std::error::Error;
use std::sync::Arc;
use uuid::Uuid;

use crate::cli::Args;
use crate::error::ChatError;
use crate::history::{ initialize_session_store, SessionStore };
use crate::llm::chat::{ new_client as new_chat_client, DeltaStream };
use crate::llm::{ GenerationParams, LlmConfig, LlmType, ModelGateway };
use crate::models::api::{ ChatReply, ChatRequest };
use crate::models::chat::{ ChatMessage, Role };
use crate::models::events::ChatEvent;
use crate::reasoning::{ split_reasoning, SegmentClassifier };

/// Runs chat turns: resolves the session, persists both sides of the
/// exchange and relays the model's output.
#[derive(Clone)]
pub struct ChatAgent {
    store: Arc<SessionStore>,
    gateway: Arc<ModelGateway>,
}

/// Where a streaming turn is between two pulls.
enum Phase {
    Start(ChatRequest),
    Relay {
        session_id: String,
        deltas: DeltaStream,
        classifier: SegmentClassifier,
    },
    Closed,
}

struct TurnState {
    agent: ChatAgent,
    phase: Phase,
    pending: VecDeque<ChatEvent>,
}

/// A turn whose user message is persisted and whose generation is open.
struct OpenedTurn {
    session_id: String,
    created: bool,
    deltas: DeltaStream,
}

pub fn new_session_id() -> String {
    format!("session_{}", Uuid::new_v4())
}

fn require_session_id(session_id: &str) -> Result<&str, ChatError> {
    let trimmed = session_id.trim();
    if trimmed.is_empty() {
        return Err(ChatError::Validation("sessionId is required".to_string()));
    }
    Ok(trimmed)
}

fn require_message(request: &ChatRequest) -> Result<(), ChatError> {
    if request.message.trim().is_empty() {
        return Err(ChatError::Validation("message is required".to_string()));
    }
    Ok(())
}

impl ChatAgent {
    pub fn new(store: Arc<SessionStore>, gateway: Arc<ModelGateway>) -> Self {
        Self { store, gateway }
    }

    pub async fn from_args(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let llm_type: LlmType = args.chat_llm_type.parse()?;
        let api_key = if !args.chat_api_key.is_empty() {
            Some(args.chat_api_key.clone())
        } else {
            None
        };
        let config = LlmConfig {
            llm_type,
            api_key,
            base_url: args.chat_base_url.clone(),
        };
        let client = new_chat_client(&config)?;

        let defaults = GenerationParams::default();
        let params = GenerationParams {
            model: args.chat_model.clone().unwrap_or(defaults.model),
            max_tokens: args.max_tokens,
            temperature: args.temperature,
            top_p: args.top_p,
            system: args.system_prompt.clone().unwrap_or(defaults.system),
        };
        let gateway = Arc::new(ModelGateway::new(client, params));
        let store = initialize_session_store(args).await?;
        info!("Session store ready on {} backend", store.backend_name());

        Ok(Self::new(store, gateway))
    }

    fn resolve_session_id(requested: Option<&str>) -> String {
        match requested.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => new_session_id(),
        }
    }

    /// Everything up to the first model byte: session, history, user turn.
    async fn begin_turn(
        &self,
        request: &ChatRequest
    ) -> Result<(String, bool, Vec<ChatMessage>), ChatError> {
        require_message(request)?;
        let session_id = Self::resolve_session_id(request.session_id.as_deref());
        let (_, created) = self.store.ensure_session(&session_id).await?;
        let history = self.store.list_messages(&session_id).await?;
        self.store.append(&session_id, Role::User, &request.message).await?;
        debug!("Session {}: user turn stored after {} prior messages", session_id, history.len());
        Ok((session_id, created, history))
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<OpenedTurn, ChatError> {
        let (session_id, created, history) = self.begin_turn(request).await?;
        let deltas = self.gateway.stream_deltas(&history, &request.message).await?;
        Ok(OpenedTurn { session_id, created, deltas })
    }

    /// Stores the answer exactly as the caller received it. Reasoning is never
    /// stored, so an answer that is empty after the split leaves no turn.
    async fn store_answer(&self, session_id: &str, answer: &str) -> Result<(), ChatError> {
        if answer.trim().is_empty() {
            warn!("Session {}: no answer text, assistant turn not stored", session_id);
            return Ok(());
        }
        self.store.append(session_id, Role::Assistant, answer).await?;
        Ok(())
    }

    /// Streams one turn as events. Nothing runs until the stream is polled and
    /// dropping it stops generation; the assistant turn is then never stored.
    pub fn stream_chat(&self, request: ChatRequest) -> impl Stream<Item = ChatEvent> + Send + 'static {
        let state = TurnState {
            agent: self.clone(),
            phase: Phase::Start(request),
            pending: VecDeque::new(),
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((event, state));
                }
                match std::mem::replace(&mut state.phase, Phase::Closed) {
                    Phase::Closed => {
                        return None;
                    }
                    Phase::Start(request) => {
                        match state.agent.open_stream(&request).await {
                            Ok(turn) => {
                                if turn.created {
                                    state.pending.push_back(ChatEvent::Session {
                                        session_id: turn.session_id.clone(),
                                    });
                                }
                                state.phase = Phase::Relay {
                                    session_id: turn.session_id,
                                    deltas: turn.deltas,
                                    classifier: SegmentClassifier::new(request.enable_reasoning),
                                };
                            }
                            Err(e) => {
                                error!("Failed to start chat turn: {}", e);
                                state.pending.push_back(ChatEvent::Error { error: e.public_message() });
                            }
                        }
                    }
                    Phase::Relay { session_id, mut deltas, mut classifier } => {
                        match deltas.next().await {
                            Some(Ok(delta)) => {
                                state.pending.extend(classifier.push(&delta));
                                state.phase = Phase::Relay { session_id, deltas, classifier };
                            }
                            Some(Err(e)) => {
                                let e = ChatError::from(e);
                                error!("Generation failed in session {}: {}", session_id, e);
                                state.pending.push_back(ChatEvent::Error { error: e.public_message() });
                            }
                            None => {
                                let (tail, answer) = classifier.finish();
                                state.pending.extend(tail);
                                match state.agent.store_answer(&session_id, &answer).await {
                                    Ok(()) => {
                                        info!("Session {}: turn completed", session_id);
                                        state.pending.push_back(ChatEvent::Done { content: answer });
                                    }
                                    Err(e) => {
                                        error!("Failed to store answer in session {}: {}", session_id, e);
                                        state.pending.push_back(ChatEvent::Error {
                                            error: e.public_message(),
                                        });
                                    }
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// One turn without streaming.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let (session_id, _, history) = self.begin_turn(&request).await?;
        let completion = self.gateway.complete(&history, &request.message).await?;

        let (response, reasoning) = if request.enable_reasoning {
            let segments = split_reasoning(&completion.text);
            debug!("Session {}: reply split by {:?}", session_id, segments.tier);
            (segments.answer, segments.reasoning)
        } else {
            (completion.text.clone(), String::new())
        };

        self.store_answer(&session_id, &response).await?;
        info!("Session {}: turn completed", session_id);

        Ok(ChatReply { response, reasoning, session_id })
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let session_id = require_session_id(session_id)?;
        Ok(self.store.list_messages(session_id).await?)
    }

    /// Deletes every message of the session and returns its id.
    pub async fn clear(&self, session_id: &str) -> Result<String, ChatError> {
        let session_id = require_session_id(session_id)?;
        self.store.clear_messages(session_id).await?;
        Ok(session_id.to_string())
    }
}
