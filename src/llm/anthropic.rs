//! Streaming client for the Anthropic Messages API.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ProviderError;
use super::provider::{ChatStream, LlmProvider};
use super::sse::SseDecoder;
use super::types::{ChatEvent, ChatMessage, ChatRequest, Role, ToolCall, Usage};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Result<Self, ProviderError> {
        Self::with_base_url(api_key, API_URL.to_string())
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, ProviderError> {
        // No overall timeout: long chapters stream for minutes.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            api_key,
            client,
            base_url,
        })
    }
}

impl LlmProvider for AnthropicClient {
    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, ProviderError> {
        let body = MessagesRequest::from_chat(request);
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            if status == reqwest::StatusCode::BAD_REQUEST && is_context_overflow(&message) {
                return Err(ProviderError::ContextLengthExceeded(message));
            }
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(event_stream(body))
    }
}

fn is_context_overflow(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("prompt is too long") || lower.contains("context window")
}

// ---------------------------------------------------------------------------
// Request wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WireContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContent {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

impl<'a> MessagesRequest<'a> {
    fn from_chat(request: &'a ChatRequest) -> Self {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        Self {
            model: &request.model,
            max_tokens: request.max_tokens,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages: wire_messages(&request.messages),
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.input_schema,
                })
                .collect(),
            temperature: request.temperature,
            stream: true,
        }
    }
}

/// Converts history to alternating user/assistant turns. Tool results become
/// `tool_result` blocks in a user turn, merged with adjacent user content.
fn wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
    let mut out: Vec<WireMessage> = Vec::new();
    for message in messages {
        let (role, content) = match message.role {
            Role::System => continue,
            Role::User => ("user", text_block(&message.content)),
            Role::Tool => (
                "user",
                vec![WireContent::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message.content.clone(),
                    is_error: message.is_error,
                }],
            ),
            Role::Assistant => {
                let mut blocks = text_block(&message.content);
                blocks.extend(message.tool_calls.iter().map(|c| WireContent::ToolUse {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    input: c.arguments.clone(),
                }));
                ("assistant", blocks)
            }
        };
        if content.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.role == role => last.content.extend(content),
            _ => out.push(WireMessage { role, content }),
        }
    }
    out
}

fn text_block(text: &str) -> Vec<WireContent> {
    if text.trim().is_empty() {
        Vec::new()
    } else {
        vec![WireContent::Text {
            text: text.to_string(),
        }]
    }
}

// ---------------------------------------------------------------------------
// Response stream
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamPayload {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: BlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<Usage>,
    },
    MessageStop,
    Error {
        error: ErrorBody,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockStart {
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

struct PartialToolUse {
    id: String,
    name: String,
    json: String,
}

struct StreamState {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<ChatEvent, ProviderError>>,
    tools: HashMap<usize, PartialToolUse>,
    usage: Usage,
    stop_reason: Option<String>,
    done: bool,
}

impl StreamState {
    fn feed(&mut self, chunk: &[u8]) {
        for event in self.decoder.push(chunk) {
            if self.done {
                return;
            }
            if event.data.is_empty() {
                continue;
            }
            match serde_json::from_str::<StreamPayload>(&event.data) {
                Ok(payload) => self.apply(payload),
                Err(e) => self.fail(ProviderError::Stream(format!("invalid event payload: {e}"))),
            }
        }
    }

    fn apply(&mut self, payload: StreamPayload) {
        match payload {
            StreamPayload::MessageStart { message } => {
                self.usage.input_tokens = message.usage.input_tokens;
            }
            StreamPayload::ContentBlockStart {
                index,
                content_block: BlockStart::ToolUse { id, name },
            } => {
                self.tools.insert(
                    index,
                    PartialToolUse {
                        id,
                        name,
                        json: String::new(),
                    },
                );
            }
            StreamPayload::ContentBlockStart { .. } => {}
            StreamPayload::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } if !text.is_empty() => {
                    self.pending.push_back(Ok(ChatEvent::TextDelta(text)));
                }
                BlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(tool) = self.tools.get_mut(&index) {
                        tool.json.push_str(&partial_json);
                    }
                }
                _ => {}
            },
            StreamPayload::ContentBlockStop { index } => {
                if let Some(tool) = self.tools.remove(&index) {
                    self.finish_tool(tool);
                }
            }
            StreamPayload::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                }
            }
            StreamPayload::MessageStop => {
                self.pending.push_back(Ok(ChatEvent::Finished {
                    stop_reason: self.stop_reason.take(),
                    usage: self.usage,
                }));
                self.done = true;
            }
            StreamPayload::Error { error } => {
                let err = if is_context_overflow(&error.message) {
                    ProviderError::ContextLengthExceeded(error.message)
                } else {
                    ProviderError::Stream(format!("{}: {}", error.kind, error.message))
                };
                self.fail(err);
            }
            StreamPayload::Other => {}
        }
    }

    fn finish_tool(&mut self, tool: PartialToolUse) {
        let arguments = if tool.json.trim().is_empty() {
            Ok(Value::Object(Default::default()))
        } else {
            serde_json::from_str(&tool.json)
        };
        match arguments {
            Ok(arguments) => self.pending.push_back(Ok(ChatEvent::ToolCall(ToolCall {
                id: tool.id,
                name: tool.name,
                arguments,
            }))),
            Err(e) => self.fail(ProviderError::Stream(format!(
                "tool `{}` arguments are not valid JSON: {e}",
                tool.name
            ))),
        }
    }

    fn fail(&mut self, error: ProviderError) {
        self.pending.push_back(Err(error));
        self.done = true;
    }
}

fn event_stream(body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>) -> ChatStream {
    let state = StreamState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        tools: HashMap::new(),
        usage: Usage::default(),
        stop_reason: None,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => state.feed(&chunk),
                Some(Err(e)) => state.fail(ProviderError::NetworkError(e)),
                None => {
                    let reason = if state.decoder.has_pending() {
                        "stream ended inside an event"
                    } else {
                        "stream ended before message_stop"
                    };
                    state.fail(ProviderError::Stream(reason.to_string()));
                }
            }
        }
    })
    .boxed()
}
