use async_trait::async_trait;
use log::{ debug, info };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };

use super::{
    check_status,
    sse_deltas,
    ChatClient,
    Completion,
    DeltaStream,
    GenerationRequest,
    SseStep,
    Usage,
};
use crate::error::LlmError;
use crate::llm::{ LlmConfig, LlmType };

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Chat-completions client for OpenAI and any server speaking the same
/// protocol (Ollama, vLLM, LM Studio).
pub struct OpenAIChatClient {
    http: HttpClient,
    base_url: String,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: Option<OpenAIDelta>,
    #[serde(rename = "finish_reason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

impl OpenAIChatClient {
    pub fn new(api_key: Option<String>, base_url: String) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|e|
                    LlmError::Config(format!("Invalid API key format: {}", e))
                )?
            );
        }

        let http = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self { http, base_url })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let default_base = match config.llm_type {
            LlmType::Ollama => OLLAMA_BASE_URL,
            _ => OPENAI_BASE_URL,
        };
        if config.llm_type == LlmType::OpenAI && config.api_key.is_none() {
            return Err(LlmError::Config("OpenAI API key is required".to_string()));
        }
        Self::new(
            config.api_key.clone(),
            config.base_url.clone().unwrap_or_else(|| default_base.to_string())
        )
    }

    fn url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    fn body<'a>(request: &'a GenerationRequest, stream: bool) -> OpenAIChatRequest<'a> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: request.system.clone(),
            });
        }
        messages.extend(
            request.messages.iter().map(|turn| OpenAIMessage {
                role: turn.role.to_string(),
                content: turn.content.clone(),
            })
        );

        OpenAIChatRequest {
            model: &request.model,
            messages,
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stream: if stream { Some(true) } else { None },
        }
    }
}

pub(crate) fn parse_stream_chunk(data: &str) -> SseStep {
    if data == "[DONE]" {
        return SseStep::Stop;
    }
    let chunk = match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("JSON parse error: {} for data: {}", e, data);
            return SseStep::Skip;
        }
    };
    let mut text = String::new();
    let mut finished = false;
    for choice in chunk.choices {
        if let Some(content) = choice.delta.and_then(|d| d.content) {
            text.push_str(&content);
        }
        if choice.finish_reason.is_some() {
            finished = true;
        }
    }
    if !text.is_empty() {
        SseStep::Delta(text)
    } else if finished {
        SseStep::Stop
    } else {
        SseStep::Skip
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<Completion, LlmError> {
        let resp = self.http.post(self.url()).json(&Self::body(request, false)).send().await?;
        let resp = check_status(resp).await?.json::<OpenAIResponse>().await?;

        let content = resp.choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Decode("No response from chat completions API".to_string()))?
            .message.content;
        let usage = resp.usage
            .map(|u| Usage { input_tokens: u.prompt_tokens, output_tokens: u.completion_tokens })
            .unwrap_or_default();
        info!(
            "Chat completion: {} input tokens, {} output tokens",
            usage.input_tokens,
            usage.output_tokens
        );

        Ok(Completion { text: content, usage })
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<DeltaStream, LlmError> {
        let resp = self.http.post(self.url()).json(&Self::body(request, true)).send().await?;
        let resp = check_status(resp).await?;
        Ok(sse_deltas(resp.bytes_stream(), parse_stream_chunk))
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }

    fn backend_name(&self) -> &str {
        "openai"
    }
}
