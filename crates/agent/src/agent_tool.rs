//! Delegation tool: exposes an [`AgentLoop`] as a tool of another agent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use taskloom_core::error::ToolError;
use taskloom_core::store::SessionStore;
use taskloom_core::tool::{Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};
use taskloom_core::{AgentEventKind, StoreError};
use tracing::{debug, info, warn};

use crate::loop_runner::AgentLoop;
use crate::usage;

/// Default ceiling on nested delegation.
pub const DEFAULT_MAX_DELEGATION_DEPTH: u32 = 4;

const DESCRIPTION: &str = "Delegates a task to a sub-agent. The sub-agent works in its own \
session with its own tools and returns its final answer.

HOW TO USE:
- Give a complete, self-contained prompt: the sub-agent cannot see this conversation
- Say exactly what information should come back in the answer
- Launch several agents in one response to work in parallel where possible

LIMITATIONS:
- The sub-agent's answer is not shown to the user; summarize it yourself
- Each call starts a fresh session with no memory of earlier calls";

#[derive(Debug, Deserialize)]
struct AgentParams {
    #[serde(default)]
    prompt: String,
}

#[derive(Debug, Serialize)]
struct AgentMetadata {
    session_id: String,
    cost: f64,
}

pub struct AgentTool {
    agent_id: String,
    name: String,
    agent: AgentLoop,
    sessions: Arc<dyn SessionStore>,
    max_depth: u32,
}

impl AgentTool {
    pub fn new(agent_id: impl Into<String>, agent: AgentLoop, sessions: Arc<dyn SessionStore>) -> Self {
        let agent_id = agent_id.into();
        Self {
            name: format!("agent_{agent_id}"),
            agent_id,
            agent,
            sessions,
            max_depth: DEFAULT_MAX_DELEGATION_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// How many delegations deep `session_id` already is. A top-level
    /// session is at depth zero.
    async fn depth_of(&self, session_id: &str) -> Result<u32, StoreError> {
        let mut depth = 0;
        let mut current = self.sessions.get(session_id).await?;
        while let Some(parent) = current.parent_session_id.take() {
            depth += 1;
            if depth > self.max_depth {
                break;
            }
            current = self.sessions.get(&parent).await?;
        }
        Ok(depth)
    }

    fn store_failure(&self, context: &str, e: StoreError) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason: format!("{context}: {e}"),
        }
    }

    /// Add the sub-session's cost to the caller's session.
    async fn roll_up_cost(&self, parent_id: &str, child_id: &str) -> Result<f64, StoreError> {
        let child = self.sessions.get(child_id).await?;
        let mut parent = self.sessions.get(parent_id).await?;
        usage::roll_up(&mut parent, &child);
        self.sessions.save(parent).await?;
        Ok(child.cost)
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: format!("Launch the {} agent. {DESCRIPTION}", self.agent_id),
            parameters: serde_json::json!({
                "prompt": {
                    "type": "string",
                    "description": "The task for the agent to perform"
                }
            }),
            required: vec!["prompt".into()],
        }
    }

    async fn run(&self, ctx: &ToolContext, call: ToolCall) -> Result<ToolResponse, ToolError> {
        let params: AgentParams = call.parse_input()?;
        if params.prompt.is_empty() {
            return Ok(ToolResponse::error("prompt is required"));
        }

        let depth = self
            .depth_of(&ctx.session_id)
            .await
            .map_err(|e| self.store_failure("failed to inspect session", e))?;
        if depth >= self.max_depth {
            warn!(agent = %self.agent_id, depth, "Delegation depth limit reached");
            return Ok(ToolResponse::error(format!(
                "maximum delegation depth ({}) reached, handle this task directly",
                self.max_depth
            )));
        }

        let title = format!("{} task", self.agent.name());
        let task = self
            .sessions
            .create_task_session(&call.id, &ctx.session_id, &title)
            .await
            .map_err(|e| self.store_failure("failed to create task session", e))?;
        info!(agent = %self.agent_id, parent = %ctx.session_id, session_id = %task.id, "Delegating task");

        let rx = self
            .agent
            .run(&ctx.cancel, &task.id, &params.prompt, Vec::new())
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: e.to_string(),
            })?;
        let Some(mut rx) = rx else {
            return Ok(ToolResponse::error(format!(
                "session {} is already running",
                task.id
            )));
        };
        let event = rx.recv().await;

        let cost = self
            .roll_up_cost(&ctx.session_id, &task.id)
            .await
            .map_err(|e| self.store_failure("failed to update parent session", e))?;
        debug!(agent = %self.agent_id, session_id = %task.id, cost, "Sub-agent finished");
        let metadata = AgentMetadata {
            session_id: task.id,
            cost,
        };

        let Some(event) = event else {
            return Ok(ToolResponse::error("agent finished without a result").with_metadata(&metadata));
        };
        let response = match (event.kind, event.message, event.error) {
            (AgentEventKind::Response, Some(message), _) => {
                ToolResponse::text(message.content().to_string())
            }
            (_, _, Some(e)) if e.is_cancelled() => ToolResponse::error("canceled"),
            (_, _, Some(e)) => ToolResponse::error(e.to_string()),
            _ => ToolResponse::error("agent finished without a result"),
        };
        Ok(response.with_metadata(&metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedProvider, ScriptedTurn, text_turn, tool_call, tool_turn};
    use taskloom_core::ToolRegistry;
    use taskloom_core::session::Session;
    use taskloom_store::InMemoryStore;
    use tokio_util::sync::CancellationToken;

    fn ctx(session_id: &str) -> ToolContext {
        ToolContext {
            session_id: session_id.into(),
            message_id: "m1".into(),
            cancel: CancellationToken::new(),
        }
    }

    fn prompt(id: &str, prompt: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "agent_task".into(),
            input: serde_json::json!({ "prompt": prompt }).to_string(),
        }
    }

    fn task_tool(store: &Arc<InMemoryStore>, turns: Vec<ScriptedTurn>) -> AgentTool {
        let provider = Arc::new(ScriptedProvider::new(turns));
        let agent = AgentLoop::new("task", provider, store.clone(), store.clone()).with_name("Task");
        AgentTool::new("task", agent, store.clone())
    }

    #[test]
    fn schema_names_the_agent() {
        let store = Arc::new(InMemoryStore::new());
        let tool = task_tool(&store, vec![]);
        let info = tool.info();
        assert_eq!(tool.name(), "agent_task");
        assert_eq!(info.name, "agent_task");
        assert!(info.description.starts_with("Launch the task agent."));
        assert_eq!(info.required, vec!["prompt"]);
        assert_eq!(info.to_definition().parameters["properties"]["prompt"]["type"], "string");
    }

    #[tokio::test]
    async fn returns_sub_agent_answer_and_rolls_up_cost() {
        let store = Arc::new(InMemoryStore::new());
        let tool = task_tool(&store, vec![text_turn("42")]);

        let resp = tool.run(&ctx("parent"), prompt("call_1", "compute")).await.unwrap();
        assert!(!resp.is_error, "{}", resp.content);
        assert_eq!(resp.content, "42");
        assert!(resp.metadata.unwrap().contains("\"session_id\":\"call_1\""));

        let child = SessionStore::get(store.as_ref(), "call_1").await.unwrap();
        assert_eq!(child.parent_session_id.as_deref(), Some("parent"));
        assert_eq!(child.title, "Task task");
        assert!(child.cost > 0.0);

        let parent = SessionStore::get(store.as_ref(), "parent").await.unwrap();
        assert_eq!(parent.cost, child.cost);
    }

    #[tokio::test]
    async fn sub_agent_failure_is_an_error_result() {
        let store = Arc::new(InMemoryStore::new());
        // No scripted turns: the provider refuses the request
        let tool = task_tool(&store, vec![]);
        let resp = tool.run(&ctx("parent"), prompt("call_1", "compute")).await.unwrap();
        assert!(resp.is_error);
        assert!(resp.content.contains("no scripted turn"));
    }

    #[tokio::test]
    async fn cancellation_is_reported() {
        let store = Arc::new(InMemoryStore::new());
        let tool = task_tool(&store, vec![ScriptedTurn::new(vec![]).hanging()]);
        let ctx = ctx("parent");
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            cancel.cancel();
        });
        let resp = tool.run(&ctx, prompt("call_1", "wait")).await.unwrap();
        assert!(resp.is_error);
        assert_eq!(resp.content, "canceled");
    }

    #[tokio::test]
    async fn depth_limit_blocks_deep_delegation() {
        let store = Arc::new(InMemoryStore::new());
        // root <- a <- b: "b" is two delegations deep
        store.save(Session::new("root", "root")).await.unwrap();
        store.save(Session::task("a", "root", "a")).await.unwrap();
        store.save(Session::task("b", "a", "b")).await.unwrap();

        let tool = task_tool(&store, vec![text_turn("unused")]).with_max_depth(2);
        assert_eq!(tool.depth_of("root").await.unwrap(), 0);
        assert_eq!(tool.depth_of("b").await.unwrap(), 2);

        let resp = tool.run(&ctx("b"), prompt("call_deep", "go")).await.unwrap();
        assert!(resp.is_error);
        assert!(resp.content.contains("maximum delegation depth (2)"));

        let resp = tool.run(&ctx("a"), prompt("call_ok", "go")).await.unwrap();
        assert_eq!(resp.content, "unused");
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let tool = task_tool(&store, vec![]);
        let resp = tool.run(&ctx("parent"), prompt("call_1", "")).await.unwrap();
        assert!(resp.is_error);
        assert_eq!(resp.content, "prompt is required");
    }

    #[tokio::test]
    async fn parent_agent_delegates_through_the_loop() {
        let store = Arc::new(InMemoryStore::new());
        let sub = task_tool(&store, vec![text_turn("sub answer")]);
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(vec![tool_call(
                "call_sub",
                "agent_task",
                r#"{"prompt":"investigate"}"#,
            )]),
            text_turn("parent answer"),
        ]));
        let parent = AgentLoop::new("coder", provider, store.clone(), store.clone())
            .with_tools(ToolRegistry::new().with(Arc::new(sub)));

        let mut rx = parent
            .run(&CancellationToken::new(), "root", "delegate it", Vec::new())
            .unwrap()
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.message.unwrap().content(), "parent answer");

        let history = taskloom_core::MessageStore::list(store.as_ref(), "root").await.unwrap();
        assert_eq!(history[2].tool_results()[0].content, "sub answer");

        let root = SessionStore::get(store.as_ref(), "root").await.unwrap();
        let child = SessionStore::get(store.as_ref(), "call_sub").await.unwrap();
        assert!(root.cost > child.cost);
    }
}
