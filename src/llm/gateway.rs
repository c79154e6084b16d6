use log::{ debug, info };
use std::sync::Arc;

use super::chat::{ ChatClient, Completion, DeltaStream, GenerationRequest };
use crate::error::LlmError;
use crate::models::chat::{ ChatMessage, Turn };

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "Reply in the same language as the user. Unless explicitly asked to create or generate \
content, refuse to make things up. When answering, quote the original source for key points \
and facts.";

/// Sampling parameters and instruction sent with every invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub system: String,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: "claude-3-7-sonnet-20250219".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            top_p: 0.9,
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Formats stored history for the backend and runs one-shot or streaming
/// generations through the configured [`ChatClient`].
pub struct ModelGateway {
    client: Arc<dyn ChatClient>,
    params: GenerationParams,
}

impl ModelGateway {
    pub fn new(client: Arc<dyn ChatClient>, params: GenerationParams) -> Self {
        info!(
            "Model gateway configured: Backend={}, Model={}, BaseURL={:?}",
            client.backend_name(),
            params.model,
            client.get_base_url().as_deref().unwrap_or("adapter default")
        );
        Self { client, params }
    }

    /// Stored turns in order, followed by the new user turn.
    pub fn format_history(history: &[ChatMessage], new_turn: &str) -> Vec<Turn> {
        history
            .iter()
            .map(Turn::from)
            .chain(std::iter::once(Turn::user(new_turn)))
            .collect()
    }

    fn request(&self, history: &[ChatMessage], new_turn: &str) -> GenerationRequest {
        GenerationRequest {
            model: self.params.model.clone(),
            messages: Self::format_history(history, new_turn),
            system: self.params.system.clone(),
            max_tokens: self.params.max_tokens,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
        }
    }

    pub async fn complete(
        &self,
        history: &[ChatMessage],
        new_turn: &str
    ) -> Result<Completion, LlmError> {
        let request = self.request(history, new_turn);
        debug!("Invoking {} with {} turns", self.params.model, request.messages.len());
        self.client.complete(&request).await
    }

    pub async fn stream_deltas(
        &self,
        history: &[ChatMessage],
        new_turn: &str
    ) -> Result<DeltaStream, LlmError> {
        let request = self.request(history, new_turn);
        debug!("Streaming {} with {} turns", self.params.model, request.messages.len());
        self.client.stream(&request).await
    }
}
