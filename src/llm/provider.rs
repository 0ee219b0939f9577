use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use super::error::ProviderError;
use super::types::{ChatEvent, ChatRequest, ChatResponse};

pub type ChatStream = BoxStream<'static, Result<ChatEvent, ProviderError>>;

/// A chat-completion backend that streams its output.
#[allow(async_fn_in_trait)]
pub trait LlmProvider {
    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, ProviderError>;
}

impl<P: LlmProvider> LlmProvider for Arc<P> {
    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, ProviderError> {
        (**self).stream(request).await
    }
}

/// Runs one completion to the end, forwarding text deltas to `on_text`.
///
/// Cancellation is checked before the request and before every stream item;
/// a cancelled call returns [`ProviderError::Cancelled`] and drops the stream.
pub async fn generate<P: LlmProvider>(
    provider: &P,
    request: &ChatRequest,
    cancel: &CancellationToken,
    mut on_text: impl FnMut(&str),
) -> Result<ChatResponse, ProviderError> {
    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        stream = provider.stream(request) => stream?,
    };

    let mut response = ChatResponse::default();
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            event = stream.next() => event,
        };
        match event {
            None => break,
            Some(Err(e)) => return Err(e),
            Some(Ok(ChatEvent::TextDelta(text))) => {
                on_text(&text);
                response.text.push_str(&text);
            }
            Some(Ok(ChatEvent::ToolCall(call))) => response.tool_calls.push(call),
            Some(Ok(ChatEvent::Finished { stop_reason, usage })) => {
                response.stop_reason = stop_reason;
                response.usage = usage;
            }
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use serde_json::json;

    use super::*;
    use crate::llm::types::{ChatMessage, ToolCall, Usage};

    struct FixedProvider {
        events: Vec<ChatEvent>,
        hang_after: bool,
    }

    impl LlmProvider for FixedProvider {
        async fn stream(&self, _request: &ChatRequest) -> Result<ChatStream, ProviderError> {
            let head = stream::iter(self.events.clone().into_iter().map(Ok));
            if self.hang_after {
                Ok(head.chain(stream::pending()).boxed())
            } else {
                Ok(head.boxed())
            }
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::new("m", vec![ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn collects_text_and_tool_calls() {
        let provider = FixedProvider {
            events: vec![
                ChatEvent::TextDelta("Hel".into()),
                ChatEvent::TextDelta("lo".into()),
                ChatEvent::ToolCall(ToolCall::new("c1", "noop", json!({}))),
                ChatEvent::Finished {
                    stop_reason: Some("tool_use".into()),
                    usage: Usage {
                        input_tokens: 3,
                        output_tokens: 4,
                    },
                },
            ],
            hang_after: false,
        };

        let mut seen = Vec::new();
        let response = generate(&provider, &request(), &CancellationToken::new(), |t| {
            seen.push(t.to_string())
        })
        .await
        .unwrap();

        assert_eq!(seen, vec!["Hel", "lo"]);
        assert_eq!(response.text, "Hello");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(response.usage.output_tokens, 4);
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_stalled_stream() {
        let provider = FixedProvider {
            events: vec![ChatEvent::TextDelta("partial".into())],
            hang_after: true,
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let request = request();
        let (result, _) = tokio::join!(generate(&provider, &request, &cancel, |_| {}), async {
            tokio::task::yield_now().await;
            trigger.cancel();
        });

        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_the_request() {
        let provider = FixedProvider {
            events: vec![],
            hang_after: false,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = generate(&provider, &request(), &cancel, |_| {}).await;
        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }
}
