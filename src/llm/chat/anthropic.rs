use async_trait::async_trait;
use log::{ debug, info };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE } };
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
use crate::llm::LlmConfig;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicChatClient {
    http: HttpClient,
    base_url: String,
}

#[derive(Serialize)]
struct AnthropicContentBlock<'a> {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: &'a str,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: Vec<AnthropicContentBlock<'a>>,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<AnthropicMessage<'a>>,
    system: &'a str,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicResponseBlock>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicResponseBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize)]
struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<AnthropicDelta>,
    #[serde(default)]
    error: Option<AnthropicStreamError>,
}

#[derive(Deserialize)]
struct AnthropicDelta {
    #[serde(rename = "type", default)]
    delta_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicStreamError {
    #[serde(default)]
    message: String,
}

impl AnthropicChatClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&api_key).map_err(|e|
                LlmError::Config(format!("Invalid API key format: {}", e))
            )?
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));

        let http = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| LlmError::Config("Anthropic API key is required".to_string()))?;
        Self::new(api_key, config.base_url.clone())
    }

    fn url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    fn body<'a>(request: &'a GenerationRequest, stream: bool) -> AnthropicRequest<'a> {
        AnthropicRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            messages: request.messages
                .iter()
                .map(|turn| AnthropicMessage {
                    role: turn.role.as_str(),
                    content: vec![AnthropicContentBlock { block_type: "text", text: &turn.content }],
                })
                .collect(),
            system: &request.system,
            temperature: request.temperature,
            top_p: request.top_p,
            stream,
        }
    }
}

pub(crate) fn parse_stream_event(data: &str) -> SseStep {
    let event = match serde_json::from_str::<AnthropicStreamEvent>(data) {
        Ok(event) => event,
        Err(e) => {
            debug!("Skipping undecodable Anthropic event: {} for data: {}", e, data);
            return SseStep::Skip;
        }
    };
    match event.event_type.as_str() {
        "content_block_delta" =>
            match event.delta {
                Some(AnthropicDelta { delta_type, text: Some(text) }) if
                    delta_type == "text_delta" && !text.is_empty()
                => SseStep::Delta(text),
                _ => SseStep::Skip,
            }
        "message_stop" => SseStep::Stop,
        "error" =>
            SseStep::Fail(
                event.error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "unknown stream error".to_string())
            ),
        _ => SseStep::Skip,
    }
}

#[async_trait]
impl ChatClient for AnthropicChatClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<Completion, LlmError> {
        let resp = self.http.post(self.url()).json(&Self::body(request, false)).send().await?;
        let body = check_status(resp).await?.json::<AnthropicResponse>().await?;

        let text: String = body.content
            .iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .collect();
        info!(
            "Anthropic completion: {} input tokens, {} output tokens",
            body.usage.input_tokens,
            body.usage.output_tokens
        );

        Ok(Completion {
            text,
            usage: Usage {
                input_tokens: body.usage.input_tokens,
                output_tokens: body.usage.output_tokens,
            },
        })
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<DeltaStream, LlmError> {
        let resp = self.http.post(self.url()).json(&Self::body(request, true)).send().await?;
        let resp = check_status(resp).await?;
        Ok(sse_deltas(resp.bytes_stream(), parse_stream_event))
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }

    fn backend_name(&self) -> &str {
        "anthropic"
    }
}
