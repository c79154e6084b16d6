pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use futures::stream::{ self, Stream, StreamExt };
use serde::{ Deserialize, Serialize };
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use self::anthropic::AnthropicChatClient;
use self::openai::OpenAIChatClient;
use super::{ LlmConfig, LlmType };
use crate::error::LlmError;
use crate::models::chat::Turn;

/// Lazily produced text fragments, in emission order.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

/// One fully formatted invocation of the generation backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<Turn>,
    pub system: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, request: &GenerationRequest) -> Result<Completion, LlmError>;

    /// Opens a streaming generation. Dropping the returned stream closes the
    /// underlying connection.
    async fn stream(&self, request: &GenerationRequest) -> Result<DeltaStream, LlmError>;

    fn get_base_url(&self) -> Option<String>;

    fn backend_name(&self) -> &str;
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, LlmError> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Anthropic => {
            let specific_client = AnthropicChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::OpenAI | LlmType::Ollama => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

/// Fails with the backend's body when the response status is not 2xx.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(LlmError::Status { status: status.as_u16(), body })
}

/// What one SSE `data:` payload means to a provider.
#[derive(Debug, PartialEq)]
pub(crate) enum SseStep {
    Delta(String),
    Skip,
    Stop,
    Fail(String),
}

struct LineReader {
    bytes: ByteStream,
    buffer: Vec<u8>,
    ready: VecDeque<String>,
    exhausted: bool,
}

impl LineReader {
    fn drain_lines(&mut self, flush: bool) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&line[..line.len() - 1]);
        }
        if flush && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.push_line(&line);
        }
    }

    fn push_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches('\r');
        if let Some(data) = line.strip_prefix("data:") {
            self.ready.push_back(data.trim_start().to_string());
        }
    }

    async fn next_data(&mut self) -> Option<Result<String, LlmError>> {
        loop {
            if let Some(data) = self.ready.pop_front() {
                return Some(Ok(data));
            }
            if self.exhausted {
                return None;
            }
            match self.bytes.next().await {
                Some(Ok(chunk)) => {
                    self.buffer.extend_from_slice(&chunk);
                    self.drain_lines(false);
                }
                Some(Err(e)) => {
                    self.exhausted = true;
                    return Some(Err(LlmError::Http(e)));
                }
                None => {
                    self.exhausted = true;
                    self.drain_lines(true);
                }
            }
        }
    }
}

/// Turns an SSE byte stream into text deltas. Only partial lines are buffered
/// between network chunks; the stream ends at the provider's terminator or at
/// the first failure. A body that ends before the terminator is a failure.
pub(crate) fn sse_deltas<S, B>(bytes: S, parse: fn(&str) -> SseStep) -> DeltaStream
    where S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static, B: AsRef<[u8]> + 'static
{
    let reader = LineReader {
        bytes: Box::pin(bytes.map(|chunk| chunk.map(|b| b.as_ref().to_vec()))),
        buffer: Vec::new(),
        ready: VecDeque::new(),
        exhausted: false,
    };

    Box::pin(
        stream::unfold(Some(reader), move |state| async move {
            let mut reader = state?;
            loop {
                let next = match reader.next_data().await {
                    Some(next) => next,
                    None => {
                        let truncated = LlmError::Stream("stream ended before terminator".to_string());
                        return Some((Err(truncated), None));
                    }
                };
                match next {
                    Ok(data) =>
                        match parse(&data) {
                            SseStep::Delta(text) => {
                                return Some((Ok(text), Some(reader)));
                            }
                            SseStep::Skip => {
                                continue;
                            }
                            SseStep::Stop => {
                                return None;
                            }
                            SseStep::Fail(message) => {
                                return Some((Err(LlmError::Stream(message)), None));
                            }
                        }
                    Err(e) => {
                        return Some((Err(e), None));
                    }
                }
            }
        })
    )
}
