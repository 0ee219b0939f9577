//! Scripted provider shared by the async tests.

use std::collections::VecDeque;

use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use serde_json::Value;

use crate::llm::{ChatEvent, ChatRequest, ChatStream, LlmProvider, ProviderError, ToolCall, Usage};

pub(crate) enum Script {
    Reply {
        text: String,
        tool_calls: Vec<ToolCall>,
    },
    Fail(ProviderError),
    /// Never yields; only cancellation ends the call.
    Hang,
    /// Streams the tool calls, then fails with `error` or stalls when it is `None`.
    Interrupted {
        tool_calls: Vec<ToolCall>,
        error: Option<ProviderError>,
    },
}

fn tool_calls(calls: Vec<(&str, Value)>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(i, (name, args))| ToolCall::new(format!("call_{i}"), name, args))
        .collect()
}

impl Script {
    pub(crate) fn text(text: &str) -> Self {
        Script::Reply {
            text: text.to_string(),
            tool_calls: Vec::new(),
        }
    }

    /// A turn that calls each `(name, arguments)` pair in order.
    pub(crate) fn calls(calls: Vec<(&str, Value)>) -> Self {
        Script::Reply {
            text: String::new(),
            tool_calls: tool_calls(calls),
        }
    }

    pub(crate) fn interrupted(calls: Vec<(&str, Value)>, error: Option<ProviderError>) -> Self {
        Script::Interrupted {
            tool_calls: tool_calls(calls),
            error,
        }
    }
}

pub(crate) struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.scripts.lock().len()
    }
}

impl LlmProvider for ScriptedProvider {
    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, ProviderError> {
        self.requests.lock().push(request.clone());
        let script = self.scripts.lock().pop_front();
        match script {
            None => Err(ProviderError::Stream("script exhausted".into())),
            Some(Script::Fail(e)) => Err(e),
            Some(Script::Hang) => Ok(stream::pending().boxed()),
            Some(Script::Interrupted { tool_calls, error }) => {
                let head = stream::iter(tool_calls.into_iter().map(|c| Ok(ChatEvent::ToolCall(c))));
                match error {
                    Some(e) => Ok(head.chain(stream::iter([Err(e)])).boxed()),
                    None => Ok(head.chain(stream::pending()).boxed()),
                }
            }
            Some(Script::Reply { text, tool_calls }) => {
                let stop_reason = if tool_calls.is_empty() {
                    "end_turn"
                } else {
                    "tool_use"
                };
                let mut events = Vec::new();
                if !text.is_empty() {
                    events.push(ChatEvent::TextDelta(text));
                }
                events.extend(tool_calls.into_iter().map(ChatEvent::ToolCall));
                events.push(ChatEvent::Finished {
                    stop_reason: Some(stop_reason.to_string()),
                    usage: Usage::default(),
                });
                Ok(stream::iter(events.into_iter().map(Ok)).boxed())
            }
        }
    }
}
