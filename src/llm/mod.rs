pub mod anthropic;
pub mod error;
pub mod provider;
pub mod sse;
pub mod types;

pub use anthropic::AnthropicClient;
pub use error::ProviderError;
pub use provider::{ChatStream, LlmProvider, generate};
pub use types::{ChatEvent, ChatMessage, ChatRequest, ChatResponse, Role, ToolCall, ToolSpec, Usage};
