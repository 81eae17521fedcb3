//! Scripted providers for tests.
//!
//! A [`ScriptedProvider`] replays one [`ScriptedTurn`] per `stream` call
//! and records every request it receives.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use taskloom_core::error::ProviderError;
use taskloom_core::message::{FinishReason, ToolCallPart};
use taskloom_core::provider::{
    ModelInfo, Provider, ProviderEvent, ProviderRequest, ProviderResponse, TokenUsage,
};
use tokio::sync::{Notify, mpsc};

/// The events of one model response.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    events: Vec<ProviderEvent>,
    gate: Option<Arc<Notify>>,
    hang: bool,
}

impl ScriptedTurn {
    pub fn new(events: Vec<ProviderEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// Hold every event back until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Keep the stream open after the last event until the receiver drops.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

pub struct ScriptedProvider {
    model: ModelInfo,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self::with_model(test_model(), turns)
    }

    pub fn with_model(model: ModelInfo, turns: Vec<ScriptedTurn>) -> Self {
        Self {
            model,
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of `stream` calls made so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> ModelInfo {
        self.model.clone()
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError> {
        let call = {
            let mut requests = self.requests.lock();
            requests.push(request);
            requests.len()
        };
        let Some(turn) = self.turns.lock().pop_front() else {
            return Err(ProviderError::ApiError {
                status_code: 500,
                message: format!("no scripted turn for call #{call}"),
            });
        };

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            if let Some(gate) = turn.gate {
                gate.notified().await;
            }
            for event in turn.events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            if turn.hang {
                tx.closed().await;
            }
        });
        Ok(rx)
    }
}

/// A priced model that accepts attachments.
pub fn test_model() -> ModelInfo {
    ModelInfo {
        id: "test-model".into(),
        name: "Test Model".into(),
        provider: "scripted".into(),
        cost_per_1m_in: 3.0,
        cost_per_1m_out: 15.0,
        cost_per_1m_in_cached: 3.75,
        cost_per_1m_out_cached: 0.3,
        context_window: 200_000,
        default_max_tokens: 1024,
        supports_attachments: true,
        can_reason: false,
    }
}

pub fn tokens(input: u64, output: u64) -> TokenUsage {
    TokenUsage {
        input_tokens: input,
        output_tokens: output,
        ..TokenUsage::default()
    }
}

pub fn tool_call(id: &str, name: &str, input: &str) -> ToolCallPart {
    ToolCallPart {
        id: id.into(),
        name: name.into(),
        input: input.into(),
        finished: false,
    }
}

pub fn complete(
    content: &str,
    finish_reason: FinishReason,
    tool_calls: Vec<ToolCallPart>,
    usage: TokenUsage,
) -> ProviderEvent {
    ProviderEvent::Complete(ProviderResponse {
        content: content.into(),
        tool_calls,
        usage,
        finish_reason,
    })
}

/// A plain answer ending the turn.
pub fn text_turn(text: &str) -> ScriptedTurn {
    ScriptedTurn::new(vec![
        ProviderEvent::ContentDelta(text.into()),
        complete(text, FinishReason::EndTurn, vec![], tokens(10, 5)),
    ])
}

/// A response that streams the given tool calls and stops for tool use.
pub fn tool_turn(calls: Vec<ToolCallPart>) -> ScriptedTurn {
    let mut events = Vec::new();
    for call in &calls {
        events.push(ProviderEvent::ToolUseStart(ToolCallPart {
            input: String::new(),
            ..call.clone()
        }));
        events.push(ProviderEvent::ToolUseDelta {
            id: call.id.clone(),
            input: call.input.clone(),
        });
        events.push(ProviderEvent::ToolUseStop {
            id: call.id.clone(),
        });
    }
    events.push(complete("", FinishReason::ToolUse, calls, tokens(20, 10)));
    ScriptedTurn::new(events)
}
