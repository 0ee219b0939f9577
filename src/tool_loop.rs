//! Bounded conversational loop that executes model tool calls.
//!
//! Each round streams one model turn and dispatches every tool call the
//! moment it arrives, so work done before a dropped connection or a cancel
//! is kept. The results are appended to the history. The loop ends on the first turn without tool calls,
//! when the round limit is hit, or when the history grows past the token
//! budget. In the last case the history is summarized and the caller decides
//! how to continue (usually with [`seeded_history`]).

use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::llm::{
    ChatEvent, ChatMessage, ChatRequest, LlmProvider, ProviderError, Role, ToolCall, ToolSpec,
    generate,
};

/// Result of one tool invocation, fed back to the model verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(value: serde_json::Value) -> Self {
        Self {
            content: value.to_string(),
            is_error: false,
        }
    }

    pub fn failure(value: serde_json::Value) -> Self {
        Self {
            content: value.to_string(),
            is_error: true,
        }
    }
}

/// Executes tool calls on behalf of the loop.
#[allow(async_fn_in_trait)]
pub trait ToolDispatch {
    async fn dispatch(&mut self, call: &ToolCall) -> ToolOutput;
}

/// Character-based token estimate with a summarization threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBudget {
    pub context_limit: usize,
    /// Fraction of `context_limit` at which the history is summarized.
    pub high_water: f64,
    /// 1.0 over-counts English and roughly matches CJK.
    pub tokens_per_char: f64,
}

impl TokenBudget {
    pub fn new(context_limit: usize) -> Self {
        Self {
            context_limit,
            high_water: 0.8,
            tokens_per_char: 1.0,
        }
    }

    pub fn threshold(&self) -> usize {
        (self.context_limit as f64 * self.high_water) as usize
    }

    pub fn exceeded_by(&self, messages: &[ChatMessage]) -> bool {
        estimate_tokens(messages, self.tokens_per_char) > self.threshold()
    }
}

/// Rough token count of a history.
pub fn estimate_tokens(messages: &[ChatMessage], tokens_per_char: f64) -> usize {
    let chars: usize = messages.iter().map(ChatMessage::char_len).sum();
    (chars as f64 * tokens_per_char).ceil() as usize
}

/// Model settings for one conversation.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub model: String,
    /// Model turns allowed per [`ToolLoop::run`] call.
    pub max_rounds: usize,
    pub temperature: Option<f32>,
    /// Used for the summarization call; lower keeps summaries factual.
    pub summary_temperature: f32,
    pub max_tokens: u32,
    /// Summarize proactively once the estimate passes the high-water mark.
    pub budget: Option<TokenBudget>,
}

impl LoopConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_rounds: 20,
            temperature: None,
            summary_temperature: 0.2,
            max_tokens: 8192,
            budget: None,
        }
    }
}

/// How a [`ToolLoop::run`] call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    /// The model answered without requesting tools.
    Completed { text: String, rounds: usize },
    /// History is over budget; continue from this summary.
    NeedsReset { summary: String },
    RoundLimit { rounds: usize },
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error(transparent)]
    Provider(ProviderError),

    #[error("tool loop cancelled")]
    Cancelled,
}

impl From<ProviderError> for LoopError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Cancelled => LoopError::Cancelled,
            other => LoopError::Provider(other),
        }
    }
}

/// What one streamed model turn produced.
#[derive(Default)]
struct Turn {
    text: String,
    calls: Vec<ToolCall>,
    outputs: Vec<ToolOutput>,
}

impl Turn {
    /// Appends the turn to the history, each call followed by its result.
    fn record(self, history: &mut Vec<ChatMessage>) {
        if self.calls.is_empty() {
            if !self.text.is_empty() {
                history.push(ChatMessage::assistant(self.text));
            }
            return;
        }
        let ids: Vec<String> = self.calls.iter().map(|c| c.id.clone()).collect();
        history.push(ChatMessage::assistant_with_tools(self.text, self.calls));
        for (id, output) in ids.iter().zip(self.outputs) {
            history.push(ChatMessage::tool_result(id, output.content, output.is_error));
        }
    }
}

/// Runs the model, dispatches its tool calls and feeds the results back
/// until it answers without tools.
pub struct ToolLoop<'a, P> {
    provider: &'a P,
    config: &'a LoopConfig,
}

impl<'a, P: LlmProvider> ToolLoop<'a, P> {
    pub fn new(provider: &'a P, config: &'a LoopConfig) -> Self {
        Self { provider, config }
    }

    /// Appends every turn to `history` and returns once the model stops calling tools.
    ///
    /// When the context fills up, the history is summarized and
    /// [`LoopOutcome::NeedsReset`] is returned instead; the caller decides how to
    /// continue. Calls dispatched before a provider error or cancellation stay in
    /// `history`.
    pub async fn run(
        &self,
        history: &mut Vec<ChatMessage>,
        tools: &[ToolSpec],
        dispatch: &mut impl ToolDispatch,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome, LoopError> {
        for round in 1..=self.config.max_rounds {
            if cancel.is_cancelled() {
                return Err(LoopError::Cancelled);
            }

            if let Some(budget) = self.config.budget.filter(|b| b.exceeded_by(history)) {
                tracing::info!(
                    round,
                    estimated = estimate_tokens(history, budget.tokens_per_char),
                    threshold = budget.threshold(),
                    "history over budget, summarizing"
                );
                let summary = self.summarize(history, cancel).await?;
                return Ok(LoopOutcome::NeedsReset { summary });
            }

            tracing::debug!(round, messages = history.len(), "tool loop round");

            let mut request = ChatRequest::new(&self.config.model, history.clone())
                .with_tools(tools.to_vec())
                .with_max_tokens(self.config.max_tokens);
            request.temperature = self.config.temperature;

            let mut turn = Turn::default();
            let streamed = self.stream_turn(&request, dispatch, cancel, &mut turn).await;
            let dispatched = !turn.calls.is_empty();
            let text = turn.text.clone();
            turn.record(history);

            match streamed {
                Ok(()) => {}
                Err(e) if e.is_context_length() && !dispatched => {
                    tracing::warn!(round, error = %e, "context length exceeded, summarizing");
                    let summary = self.summarize(history, cancel).await?;
                    return Ok(LoopOutcome::NeedsReset { summary });
                }
                Err(e) => {
                    if dispatched {
                        tracing::warn!(round, error = %e, "stream ended early, dispatched calls kept");
                    }
                    return Err(e.into());
                }
            }

            if !dispatched {
                return Ok(LoopOutcome::Completed { text, rounds: round });
            }
        }

        tracing::warn!(rounds = self.config.max_rounds, "tool loop hit round limit");
        Ok(LoopOutcome::RoundLimit {
            rounds: self.config.max_rounds,
        })
    }

    /// Streams one model turn, dispatching each tool call as soon as it
    /// arrives. Calls dispatched before an error or cancellation stay in `turn`.
    async fn stream_turn(
        &self,
        request: &ChatRequest,
        dispatch: &mut impl ToolDispatch,
        cancel: &CancellationToken,
        turn: &mut Turn,
    ) -> Result<(), ProviderError> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            stream = self.provider.stream(request) => stream?,
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                event = stream.next() => event,
            };
            match event {
                None => return Ok(()),
                Some(Err(e)) => return Err(e),
                Some(Ok(ChatEvent::TextDelta(text))) => turn.text.push_str(&text),
                Some(Ok(ChatEvent::ToolCall(call))) => {
                    let output = dispatch.dispatch(&call).await;
                    tracing::debug!(
                        tool = %call.name,
                        is_error = output.is_error,
                        "tool executed"
                    );
                    turn.calls.push(call);
                    turn.outputs.push(output);
                }
                Some(Ok(ChatEvent::Finished { .. })) => {}
            }
        }
    }

    async fn summarize(
        &self,
        history: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<String, LoopError> {
        let request = ChatRequest::new(
            &self.config.model,
            vec![
                ChatMessage::system(
                    "Summarize the conversation below so the work can continue in a fresh \
                     context. Keep task IDs, paragraph IDs, the current workflow status, \
                     which paragraphs are done and which remain. Be concise and factual.",
                ),
                ChatMessage::user(transcript(history)),
            ],
        )
        .with_temperature(self.config.summary_temperature)
        .with_max_tokens(self.config.max_tokens);

        let response = generate(self.provider, &request, cancel, |_| {}).await?;
        Ok(response.text.trim().to_string())
    }
}

/// Plain-text rendering of the non-system history.
fn transcript(history: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in history.iter().filter(|m| m.role != Role::System) {
        let label = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool result",
            Role::System => continue,
        };
        if !message.content.is_empty() {
            out.push_str(&format!("[{label}] {}\n", message.content));
        }
        for call in &message.tool_calls {
            out.push_str(&format!("[tool call] {}({})\n", call.name, call.arguments));
        }
    }
    out
}

/// Fresh history that continues from a summary.
pub fn seeded_history(system_prompt: &str, summary: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(format!(
            "Summary of the work so far:\n{summary}\n\nContinue from where it left off."
        )),
    ]
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::{Script, ScriptedProvider};

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl ToolDispatch for Recorder {
        async fn dispatch(&mut self, call: &ToolCall) -> ToolOutput {
            self.calls.push(call.name.clone());
            if call.name == "broken" {
                ToolOutput::failure(json!({"success": false, "error": "nope"}))
            } else {
                ToolOutput::success(json!({"success": true}))
            }
        }
    }

    fn config() -> LoopConfig {
        LoopConfig::new("test-model")
    }

    #[tokio::test]
    async fn runs_until_a_turn_without_tools() {
        let provider = ScriptedProvider::new([
            Script::calls(vec![("first", json!({})), ("broken", json!({"a": 1}))]),
            Script::calls(vec![("second", json!({}))]),
            Script::text("all done"),
        ]);
        let config = config();
        let mut history = vec![ChatMessage::system("sys"), ChatMessage::user("go")];
        let mut recorder = Recorder::default();

        let outcome = ToolLoop::new(&provider, &config)
            .run(&mut history, &[], &mut recorder, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            LoopOutcome::Completed {
                text: "all done".into(),
                rounds: 3
            }
        );
        assert_eq!(recorder.calls, vec!["first", "broken", "second"]);

        // sys, user, (assistant, tool, tool), (assistant, tool), assistant
        assert_eq!(history.len(), 8);
        assert_eq!(history[3].tool_call_id.as_deref(), Some("call_0"));
        assert!(history[4].is_error);
        assert_eq!(history[7].content, "all done");
        assert_eq!(provider.requests()[2].messages.len(), 7);
    }

    #[tokio::test]
    async fn stops_at_round_limit() {
        let provider = ScriptedProvider::new([
            Script::calls(vec![("a", json!({}))]),
            Script::calls(vec![("b", json!({}))]),
        ]);
        let config = LoopConfig {
            max_rounds: 2,
            ..config()
        };
        let mut history = vec![ChatMessage::user("go")];

        let outcome = ToolLoop::new(&provider, &config)
            .run(&mut history, &[], &mut Recorder::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, LoopOutcome::RoundLimit { rounds: 2 });
    }

    #[tokio::test]
    async fn over_budget_history_is_summarized_at_low_temperature() {
        let provider = ScriptedProvider::new([Script::text("  summary text  ")]);
        let config = LoopConfig {
            temperature: Some(0.7),
            budget: Some(TokenBudget::new(10)),
            ..config()
        };
        let mut history = vec![
            ChatMessage::system("system prompt that is not summarized"),
            ChatMessage::user("这是一段很长的中文内容需要翻译"),
        ];

        let outcome = ToolLoop::new(&provider, &config)
            .run(&mut history, &[], &mut Recorder::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            LoopOutcome::NeedsReset {
                summary: "summary text".into()
            }
        );
        let requests = provider.requests();
        let request = &requests[0];
        assert_eq!(request.temperature, Some(0.2));
        assert!(request.tools.is_empty());
        assert!(!request.messages[1].content.contains("system prompt"));
        assert!(request.messages[1].content.contains("[user] 这是"));
    }

    #[tokio::test]
    async fn context_length_error_triggers_summary() {
        let provider = ScriptedProvider::new([
            Script::Fail(ProviderError::ContextLengthExceeded("prompt is too long".into())),
            Script::text("short summary"),
        ]);
        let config = config();
        let mut history = vec![ChatMessage::user("go")];

        let outcome = ToolLoop::new(&provider, &config)
            .run(&mut history, &[], &mut Recorder::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LoopOutcome::NeedsReset {
                summary: "short summary".into()
            }
        );
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let provider = ScriptedProvider::new([Script::Fail(ProviderError::ApiError {
            status: 500,
            message: "boom".into(),
        })]);
        let config = config();
        let err = ToolLoop::new(&provider, &config)
            .run(
                &mut vec![ChatMessage::user("go")],
                &[],
                &mut Recorder::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LoopError::Provider(ProviderError::ApiError { status: 500, .. })));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_calling() {
        let provider = ScriptedProvider::new([Script::text("unused")]);
        let config = config();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ToolLoop::new(&provider, &config)
            .run(&mut vec![ChatMessage::user("go")], &[], &mut Recorder::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LoopError::Cancelled));
        assert_eq!(provider.remaining(), 1);
    }

    #[tokio::test]
    async fn calls_streamed_before_a_failure_are_dispatched() {
        let provider = ScriptedProvider::new([Script::interrupted(
            vec![("first", json!({})), ("second", json!({}))],
            Some(ProviderError::Stream("connection reset".into())),
        )]);
        let config = config();
        let mut history = vec![ChatMessage::user("go")];
        let mut recorder = Recorder::default();

        let err = ToolLoop::new(&provider, &config)
            .run(&mut history, &[], &mut recorder, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, LoopError::Provider(ProviderError::Stream(_))));
        assert_eq!(recorder.calls, vec!["first", "second"]);
        // user, assistant, tool, tool
        assert_eq!(history.len(), 4);
        assert_eq!(history[1].tool_calls.len(), 2);
        assert_eq!(history[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn cancel_mid_turn_keeps_dispatched_calls() {
        let provider = ScriptedProvider::new([Script::interrupted(
            vec![("first", json!({}))],
            None,
        )]);
        let config = config();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut history = vec![ChatMessage::user("go")];
        let mut recorder = Recorder::default();

        let tool_loop = ToolLoop::new(&provider, &config);
        let (result, ()) = tokio::join!(
            tool_loop.run(&mut history, &[], &mut recorder, &cancel),
            async {
                tokio::task::yield_now().await;
                trigger.cancel();
            }
        );

        assert!(matches!(result, Err(LoopError::Cancelled)));
        assert_eq!(recorder.calls, vec!["first"]);
    }

    #[test]
    fn estimate_counts_characters() {
        let messages = vec![ChatMessage::user("abcd"), ChatMessage::assistant("你好")];
        assert_eq!(estimate_tokens(&messages, 1.0), 6);
        assert_eq!(estimate_tokens(&messages, 0.5), 3);
        assert!(TokenBudget::new(5).exceeded_by(&messages));
        assert!(!TokenBudget::new(100).exceeded_by(&messages));
    }

    #[test]
    fn seeded_history_starts_fresh() {
        let history = seeded_history("sys", "did p1..p3");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::System);
        assert!(history[1].content.contains("did p1..p3"));
    }
}
