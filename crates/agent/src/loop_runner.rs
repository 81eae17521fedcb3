//! The agent loop: one spawned worker per active session turn.

use std::sync::Arc;
use std::time::Duration;
use taskloom_core::error::{AgentError, ToolError};
use taskloom_core::event::{Broker, PubSubEvent, PubSubEventKind};
use taskloom_core::message::{
    Attachment, ContentPart, CreateMessageParams, FinishReason, Message, Role, ToolCallPart,
    ToolResultPart,
};
use taskloom_core::provider::{ModelInfo, Provider, ProviderEvent, ProviderRequest, TokenUsage};
use taskloom_core::store::{MessageStore, SessionStore};
use taskloom_core::tool::{Tool, ToolCall, ToolContext, ToolRegistry, ToolResponse};
use taskloom_core::{AgentEvent, AgentState};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::tracker::{Admission, RequestTracker};
use crate::usage;

const TOOL_CANCELED_MESSAGE: &str = "Tool execution canceled by user";
const PERMISSION_DENIED_MESSAGE: &str = "Permission denied";
const REQUEST_CANCELLED_MESSAGE: &str = "Request cancelled";

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(200);
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs turns for one agent definition.
///
/// Cheap to clone: every clone shares the same tracker, broker, tools and
/// stores, so a clone handed to a worker task sees cancellations made
/// through the original.
#[derive(Clone)]
pub struct AgentLoop {
    /// Agent identifier
    id: String,

    /// Display name
    name: String,

    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// Model description, including prices
    model: ModelInfo,

    /// Tools offered to the model
    tools: ToolRegistry,

    system_prompt: Option<String>,

    /// Max tokens per response
    max_tokens: u32,

    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,

    tracker: Arc<RequestTracker>,

    /// Terminal events of every turn
    broker: Arc<Broker<AgentEvent>>,
}

impl AgentLoop {
    /// Create an agent loop with no tools and no system prompt.
    pub fn new(
        id: impl Into<String>,
        provider: Arc<dyn Provider>,
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        let id = id.into();
        let model = provider.model();
        let max_tokens = if model.default_max_tokens > 0 {
            model.default_max_tokens
        } else {
            4096
        };
        Self {
            name: id.clone(),
            id,
            provider,
            model,
            tools: ToolRegistry::new(),
            system_prompt: None,
            max_tokens,
            sessions,
            messages,
            tracker: Arc::new(RequestTracker::new()),
            broker: Arc::new(Broker::default()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &ModelInfo {
        &self.model
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn state(&self) -> AgentState {
        self.tracker.state()
    }

    /// Terminal events of every turn this agent runs.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PubSubEvent<AgentEvent>>> {
        self.broker.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.tracker.is_busy()
    }

    pub fn is_session_busy(&self, session_id: &str) -> bool {
        self.tracker.is_session_busy(session_id)
    }

    pub fn queued_prompts(&self, session_id: &str) -> usize {
        self.tracker.queued_prompts(session_id)
    }

    pub fn clear_queue(&self, session_id: &str) {
        self.tracker.clear_queue(session_id);
    }

    /// Cancel the session's running turn, if any, and drop its queue.
    pub fn cancel(&self, session_id: &str) {
        self.tracker.cancel(session_id);
    }

    /// Cancel every session, then wait up to five seconds for the agent
    /// to go idle.
    pub async fn cancel_all(&self) {
        if !self.is_busy() {
            return;
        }
        for session_id in self.tracker.active_sessions() {
            self.cancel(&session_id);
        }

        let deadline = tokio::time::Instant::now() + CANCEL_TIMEOUT;
        while self.is_busy() {
            if tokio::time::Instant::now() >= deadline {
                warn!(agent = %self.id, "Timed out waiting for sessions to stop");
                return;
            }
            tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
        }
    }

    /// Start a turn for `session_id`.
    ///
    /// Returns `Ok(None)` when the session is already busy: `content` is
    /// queued and picked up by the running turn. Otherwise the receiver
    /// yields exactly one terminal event and then closes.
    pub fn run(
        &self,
        parent: &CancellationToken,
        session_id: &str,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Option<mpsc::Receiver<AgentEvent>>, AgentError> {
        let attachments = if self.model.supports_attachments {
            attachments
        } else {
            if !attachments.is_empty() {
                debug!(model = %self.model.id, "Dropping attachments the model cannot read");
            }
            Vec::new()
        };

        let (token, generation) = match self.tracker.try_begin_or_enqueue(session_id, parent, content)
        {
            Admission::Started { token, generation } => (token, generation),
            Admission::Queued => {
                debug!(session_id, "Session busy, prompt queued");
                return Ok(None);
            }
        };

        let (tx, rx) = mpsc::channel(1);
        let agent = self.clone();
        let session_id = session_id.to_string();
        let content = content.to_string();
        tokio::spawn(async move {
            debug!(agent = %agent.id, session_id = %session_id, "Request started");

            let worker = agent.clone();
            let worker_token = token.clone();
            let worker_session = session_id.clone();
            let handle = tokio::spawn(async move {
                worker
                    .process_generation(
                        &worker_token,
                        generation,
                        &worker_session,
                        &content,
                        attachments,
                    )
                    .await
            });

            let event = match handle.await {
                Ok(Ok(message)) => AgentEvent::response(message),
                Ok(Err(e)) => AgentEvent::error(e),
                Err(join) if join.is_panic() => {
                    AgentEvent::error(AgentError::Panic(panic_message(join.into_panic())))
                }
                Err(_) => AgentEvent::error(AgentError::RequestCancelled),
            };
            if let Some(e) = &event.error {
                if !e.is_cancelled() {
                    error!(agent = %agent.id, session_id = %session_id, error = %e, "Turn failed");
                }
            }

            debug!(agent = %agent.id, session_id = %session_id, "Request completed");
            agent.tracker.finish(&session_id, generation);
            token.cancel();

            agent.broker.publish(PubSubEventKind::Created, event.clone());
            // The caller may have dropped the receiver
            let _ = tx.send(event).await;
        });

        Ok(Some(rx))
    }

    async fn process_generation(
        &self,
        cancel: &CancellationToken,
        generation: u64,
        session_id: &str,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Message, AgentError> {
        let mut history = self
            .messages
            .list(session_id)
            .await
            .map_err(|e| AgentError::store("failed to list messages", e))?;
        let session = self
            .sessions
            .get(session_id)
            .await
            .map_err(|e| AgentError::store("failed to get session", e))?;

        if let Some(summary_id) = &session.summary_message_id {
            if let Some(index) = history.iter().position(|m| &m.id == summary_id) {
                history.drain(..index);
                history[0].role = Role::User;
            }
        }

        let parts = attachments.into_iter().map(ContentPart::from).collect();
        let user = self
            .create_user_message(session_id, content, parts)
            .await
            .map_err(|e| AgentError::store("failed to create user message", e))?;
        history.push(user);

        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::RequestCancelled);
            }

            let (mut assistant, tool_message) = self
                .stream_and_handle_events(cancel, session_id, &history)
                .await?;
            let finish = assistant.finish_reason();
            debug!(session_id, ?finish, tool_results = tool_message.is_some(), "Model turn finished");

            match (finish, tool_message) {
                (Some(FinishReason::ToolUse), Some(tool_message)) => {
                    history.push(assistant);
                    history.push(tool_message);
                    self.append_queued(session_id, &mut history).await?;
                }
                (Some(FinishReason::EndTurn), _) => {
                    history.push(assistant.clone());
                    // The turn unregisters in the same step that finds the
                    // queue empty, so a late prompt either lands here or
                    // starts a turn of its own.
                    loop {
                        let queued = self.tracker.finish_or_take_queued(session_id, generation);
                        if queued.is_empty() {
                            return Ok(assistant);
                        }
                        if self.append_prompts(session_id, queued, &mut history).await? > 0 {
                            break;
                        }
                    }
                }
                (Some(FinishReason::Canceled), _) => {
                    return Err(AgentError::RequestCancelled);
                }
                (None, _) => {
                    warn!(session_id, "Model turn ended without a finish reason, treating as canceled");
                    self.finish_message(
                        &mut assistant,
                        FinishReason::Canceled,
                        REQUEST_CANCELLED_MESSAGE,
                        "",
                    )
                    .await;
                    return Err(AgentError::RequestCancelled);
                }
                (Some(_), _) => return Ok(assistant),
            }
        }
    }

    /// Turn queued prompts into user messages. Returns how many were added.
    async fn append_queued(
        &self,
        session_id: &str,
        history: &mut Vec<Message>,
    ) -> Result<usize, AgentError> {
        let prompts = self.tracker.drain(session_id);
        self.append_prompts(session_id, prompts, history).await
    }

    async fn append_prompts(
        &self,
        session_id: &str,
        prompts: Vec<String>,
        history: &mut Vec<Message>,
    ) -> Result<usize, AgentError> {
        let mut added = 0;
        for prompt in prompts {
            if prompt.is_empty() {
                continue;
            }
            let message = self
                .create_user_message(session_id, &prompt, Vec::new())
                .await
                .map_err(|e| AgentError::store("failed to create user message for queued prompt", e))?;
            history.push(message);
            added += 1;
        }
        if added > 0 {
            info!(session_id, count = added, "Picked up queued prompts");
        }
        Ok(added)
    }

    async fn create_user_message(
        &self,
        session_id: &str,
        content: &str,
        attachments: Vec<ContentPart>,
    ) -> Result<Message, taskloom_core::StoreError> {
        let mut parts = vec![ContentPart::Text {
            text: content.to_string(),
        }];
        parts.extend(attachments);
        self.messages
            .create(session_id, CreateMessageParams::new(Role::User, parts))
            .await
    }

    /// Stream one assistant message, then run the tools it asked for.
    ///
    /// On error the assistant message has already been finished with
    /// `Canceled` or `Error`.
    async fn stream_and_handle_events(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
        history: &[Message],
    ) -> Result<(Message, Option<Message>), AgentError> {
        let mut assistant = self
            .messages
            .create(
                session_id,
                CreateMessageParams::new(Role::Assistant, Vec::new())
                    .with_model(&self.model.id, &self.model.provider),
            )
            .await
            .map_err(|e| AgentError::store("failed to create assistant message", e))?;

        let request = ProviderRequest {
            messages: history.to_vec(),
            tools: self.tools.definitions(),
            system_prompt: self.system_prompt.clone(),
            max_tokens: self.max_tokens,
        };

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::RequestCancelled),
            opened = self.provider.stream(request) => opened.map_err(AgentError::from),
        };
        let mut events = match opened {
            Ok(events) => events,
            Err(e) => return Err(self.fail_message(&mut assistant, e).await),
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(self
                        .abort_stream(session_id, &mut assistant, AgentError::RequestCancelled)
                        .await);
                }
                event = events.recv() => event,
            };
            let Some(event) = event else { break };
            if let Err(e) = self.apply_event(session_id, &mut assistant, event).await {
                return Err(self.abort_stream(session_id, &mut assistant, e).await);
            }
        }

        let calls = assistant.tool_calls();
        if calls.is_empty() {
            return Ok((assistant, None));
        }

        let results = self.run_tools(cancel, session_id, &mut assistant, &calls).await;
        let parts = results.into_iter().map(ContentPart::ToolResult).collect();
        let mut params = CreateMessageParams::new(Role::Tool, parts);
        params.provider = Some(self.model.provider.clone());
        let tool_message = self
            .messages
            .create(session_id, params)
            .await
            .map_err(|e| AgentError::store("failed to create tool message", e))?;

        Ok((assistant, Some(tool_message)))
    }

    /// Apply one provider event to the in-progress assistant message and
    /// persist it.
    async fn apply_event(
        &self,
        session_id: &str,
        assistant: &mut Message,
        event: ProviderEvent,
    ) -> Result<(), AgentError> {
        match event {
            ProviderEvent::ThinkingDelta(delta) => assistant.append_reasoning_content(&delta),
            ProviderEvent::SignatureDelta(delta) => assistant.append_reasoning_signature(&delta),
            ProviderEvent::ContentDelta(delta) => {
                assistant.finish_thinking();
                assistant.append_content(&delta);
            }
            ProviderEvent::ToolUseStart(call) => {
                assistant.finish_thinking();
                info!(session_id, tool = %call.name, call_id = %call.id, "Tool call started");
                assistant.add_tool_call(call);
            }
            ProviderEvent::ToolUseDelta { id, input } => {
                assistant.append_tool_call_input(&id, &input);
            }
            ProviderEvent::ToolUseStop { id } => {
                debug!(session_id, call_id = %id, "Finished tool call");
                assistant.finish_tool_call(&id);
            }
            ProviderEvent::Error(e) => return Err(AgentError::Provider(e)),
            ProviderEvent::Complete(response) => {
                assistant.finish_thinking();
                if !response.tool_calls.is_empty() {
                    assistant.set_tool_calls(response.tool_calls);
                }
                assistant.add_finish(response.finish_reason, "", "");
                self.update_message(assistant).await?;
                return self.track_usage(session_id, &response.usage).await;
            }
        }
        self.update_message(assistant).await
    }

    async fn update_message(&self, message: &Message) -> Result<(), AgentError> {
        self.messages
            .update(message)
            .await
            .map_err(|e| AgentError::store("failed to update message", e))
    }

    /// Add one completion's cost and tokens to the session.
    async fn track_usage(&self, session_id: &str, tokens: &TokenUsage) -> Result<(), AgentError> {
        let mut session = self
            .sessions
            .get(session_id)
            .await
            .map_err(|e| AgentError::store("failed to get session", e))?;
        let cost = usage::accrue(&mut session, &self.model, tokens);
        debug!(
            session_id,
            cost,
            input_tokens = tokens.input_tokens,
            output_tokens = tokens.output_tokens,
            "Tracked usage"
        );
        self.sessions
            .save(session)
            .await
            .map_err(|e| AgentError::store("failed to save session", e))?;
        Ok(())
    }

    /// Run the requested tools in order. Results are returned one per call.
    async fn run_tools(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
        assistant: &mut Message,
        calls: &[ToolCallPart],
    ) -> Vec<ToolResultPart> {
        let mut results = Vec::with_capacity(calls.len());
        for (i, call) in calls.iter().enumerate() {
            if cancel.is_cancelled() {
                self.cancel_remaining(assistant, &calls[i..], &mut results).await;
                break;
            }

            let Some(tool) = self.tools.get(&call.name) else {
                warn!(session_id, tool = %call.name, "Model requested an unknown tool");
                results.push(error_result(call, format!("Tool not found: {}", call.name)));
                continue;
            };

            let ctx = ToolContext {
                session_id: session_id.to_string(),
                message_id: assistant.id.clone(),
                cancel: cancel.child_token(),
            };
            let Some(outcome) = run_tool(tool, ctx, call, cancel).await else {
                self.cancel_remaining(assistant, &calls[i..], &mut results).await;
                break;
            };

            match outcome {
                Ok(response) => results.push(ToolResultPart {
                    tool_call_id: call.id.clone(),
                    name: call.name.clone(),
                    content: response.content,
                    metadata: response.metadata,
                    is_error: response.is_error,
                }),
                Err(ToolError::PermissionDenied { reason, .. }) => {
                    warn!(session_id, tool = %call.name, %reason, "Tool permission denied");
                    results.push(error_result(call, PERMISSION_DENIED_MESSAGE.into()));
                    results.extend(
                        calls[i + 1..]
                            .iter()
                            .map(|c| error_result(c, TOOL_CANCELED_MESSAGE.into())),
                    );
                    self.finish_message(
                        assistant,
                        FinishReason::PermissionDenied,
                        PERMISSION_DENIED_MESSAGE,
                        "",
                    )
                    .await;
                    break;
                }
                Err(e) => {
                    error!(session_id, tool = %call.name, call_id = %call.id, error = %e, "Tool execution error");
                    results.push(error_result(call, e.to_string()));
                }
            }
        }
        results
    }

    async fn cancel_remaining(
        &self,
        assistant: &mut Message,
        remaining: &[ToolCallPart],
        results: &mut Vec<ToolResultPart>,
    ) {
        self.finish_message(
            assistant,
            FinishReason::Canceled,
            REQUEST_CANCELLED_MESSAGE,
            "",
        )
        .await;
        results.extend(
            remaining
                .iter()
                .map(|c| error_result(c, TOOL_CANCELED_MESSAGE.into())),
        );
    }

    /// Close a stream that stopped early. Tool calls it had already recorded
    /// are finished and answered as canceled, so a later turn never replays
    /// a tool use without its result.
    async fn abort_stream(
        &self,
        session_id: &str,
        assistant: &mut Message,
        error: AgentError,
    ) -> AgentError {
        let calls = assistant.tool_calls();
        for call in calls.iter().filter(|c| !c.finished) {
            assistant.finish_tool_call(&call.id);
        }
        let error = self.fail_message(assistant, error).await;
        if calls.is_empty() {
            return error;
        }

        let parts = calls
            .iter()
            .map(|c| ContentPart::ToolResult(error_result(c, TOOL_CANCELED_MESSAGE.into())))
            .collect();
        let mut params = CreateMessageParams::new(Role::Tool, parts);
        params.provider = Some(self.model.provider.clone());
        if let Err(e) = self.messages.create(session_id, params).await {
            warn!(session_id, error = %e, "Failed to record canceled tool results");
        }
        error
    }

    /// Close the message for `error` and hand the error back.
    async fn fail_message(&self, assistant: &mut Message, error: AgentError) -> AgentError {
        if error.is_cancelled() {
            self.finish_message(
                assistant,
                FinishReason::Canceled,
                REQUEST_CANCELLED_MESSAGE,
                "",
            )
            .await;
        } else {
            self.finish_message(
                assistant,
                FinishReason::Error,
                "API Error",
                &error.to_string(),
            )
            .await;
        }
        error
    }

    async fn finish_message(
        &self,
        message: &mut Message,
        reason: FinishReason,
        text: &str,
        details: &str,
    ) {
        message.add_finish(reason, text, details);
        if let Err(e) = self.messages.update(message).await {
            warn!(message_id = %message.id, error = %e, "Failed to persist finished message");
        }
    }
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop")
            .field("id", &self.id)
            .field("model", &self.model.id)
            .field("tools", &self.tools.names())
            .field("tracker", &self.tracker)
            .finish()
    }
}

/// Run one tool in its own task. `None` means the turn was cancelled
/// first; the task is aborted.
async fn run_tool(
    tool: Arc<dyn Tool>,
    ctx: ToolContext,
    call: &ToolCallPart,
    cancel: &CancellationToken,
) -> Option<Result<ToolResponse, ToolError>> {
    let child = ctx.cancel.clone();
    let tool_name = call.name.clone();
    let call = ToolCall {
        id: call.id.clone(),
        name: call.name.clone(),
        input: call.input.clone(),
    };
    let mut handle = tokio::spawn(async move { tool.run(&ctx, call).await });

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            child.cancel();
            handle.abort();
            None
        }
        joined = &mut handle => Some(match joined {
            Ok(result) => result,
            Err(join) if join.is_panic() => Err(ToolError::ExecutionFailed {
                tool_name,
                reason: format!("tool panicked: {}", panic_message(join.into_panic())),
            }),
            Err(_) => Err(ToolError::Cancelled),
        }),
    }
}

fn error_result(call: &ToolCallPart, content: String) -> ToolResultPart {
    ToolResultPart {
        tool_call_id: call.id.clone(),
        name: call.name.clone(),
        content,
        metadata: None,
        is_error: true,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
