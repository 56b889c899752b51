//! The function-calling engine.
//!
//! Each iteration trims older history, calls the model with the tool schemas,
//! and either returns the model's text (no tool calls) or executes the
//! requested calls, appends one tool result per call, and loops. The
//! exchange of the running turn is never trimmed; the memory policy applies
//! to it in full once the turn has an answer.

use std::sync::Arc;

use async_trait::async_trait;
use taskloom_config::{AgentSettings, ToolConcurrency};
use taskloom_core::{
    ChatRequest, ConversationState, LanguageModel, Message, Result, RunContext, Tool, ToolCall,
    ToolRegistry, Usage,
};
use tracing::{debug, info, warn};

use crate::base::AgentBase;
use crate::memory::{MemoryManager, MemoryPolicy};
use crate::options::LoopOptions;
use crate::session::Checkpoint;
use crate::stream::{self, EventSink, EventStream};
use crate::{Agent, AgentResponse, step};

/// The tool-calling loop, detached from any agent so a streaming run can own
/// it on its own task.
#[derive(Clone)]
pub(crate) struct ToolLoop {
    pub(crate) model: Arc<dyn LanguageModel>,
    pub(crate) tools: ToolRegistry,
    pub(crate) memory: MemoryManager,
    pub(crate) options: LoopOptions,
}

impl ToolLoop {
    pub(crate) fn from_base(base: &AgentBase) -> Self {
        Self {
            model: base.model.clone(),
            tools: base.tools.clone(),
            memory: base.memory.clone(),
            options: base.options.clone(),
        }
    }

    /// One full turn: append `input`, loop to an answer, trim the settled
    /// history, roll back on failure.
    pub(crate) async fn turn(
        &self,
        ctx: &RunContext,
        state: &mut ConversationState,
        input: &str,
        sink: &mut EventSink,
    ) -> Result<AgentResponse> {
        info!(
            state_id = %state.id,
            messages = state.messages.len(),
            tools = self.tools.len(),
            "Processing turn"
        );
        state.max_iterations = self.options.max_iterations;
        state.begin_run();
        let checkpoint = Checkpoint::take(state);
        state.push(Message::user(input));

        let outcome = match self.drive(ctx, state, sink).await {
            Ok(response) => self.memory.apply(ctx, state).await.map(|_| response),
            Err(e) => Err(e),
        };
        checkpoint.settle(state, &outcome);
        outcome
    }

    /// Loop until the model answers without tool calls or the iteration bound
    /// is hit. The user message must already be in `state`.
    pub(crate) async fn drive(
        &self,
        ctx: &RunContext,
        state: &mut ConversationState,
        sink: &mut EventSink,
    ) -> Result<AgentResponse> {
        let schemas = self.tools.schemas();
        let mut executed: Vec<ToolCall> = Vec::new();
        let mut usage = Usage::default();
        let mut last_text: Option<String> = None;
        let mut last_output: Option<String> = None;

        loop {
            ctx.check()?;
            if !state.tick() {
                state.iteration = state.max_iterations;
                warn!(
                    state_id = %state.id,
                    max_iterations = state.max_iterations,
                    "Max iterations reached without a final answer"
                );
                let content = last_text.or(last_output).unwrap_or_else(|| {
                    format!(
                        "Stopped after {} iteration(s) without a final answer.",
                        state.max_iterations
                    )
                });
                return Ok(AgentResponse {
                    content,
                    iterations: state.iteration,
                    tool_calls_made: executed.len(),
                    tool_calls: executed,
                    max_iterations_exceeded: true,
                    usage,
                });
            }

            debug!(state_id = %state.id, iteration = state.iteration, "Agent loop iteration");
            self.memory.apply_in_turn(ctx, state).await?;

            let request = ChatRequest::new(step::build_prompt(
                self.options.system_prompt.as_deref(),
                &state.messages,
            ))
            .with_tools(schemas.clone())
            .with_sampling(self.options.temperature, self.options.max_tokens);

            let response = step::call_model(self.model.as_ref(), ctx, request, sink).await?;
            if let Some(reported) = &response.usage {
                state.record_usage(reported);
                usage.accumulate(reported);
            }

            if response.tool_calls.is_empty() {
                state.push(Message::assistant(response.content.clone()));
                info!(
                    state_id = %state.id,
                    iterations = state.iteration,
                    tool_calls = executed.len(),
                    "Turn complete"
                );
                return Ok(AgentResponse {
                    content: response.content,
                    iterations: state.iteration,
                    tool_calls_made: executed.len(),
                    tool_calls: executed,
                    max_iterations_exceeded: false,
                    usage,
                });
            }

            if !response.content.trim().is_empty() {
                last_text = Some(response.content.clone());
            }
            let calls = step::assign_call_ids(response.tool_calls, &state.messages);
            debug!(tool_count = calls.len(), "Executing tool calls");
            state.push(Message::assistant_with_calls(response.content, calls.clone()));

            let settled =
                step::execute_calls(ctx, &self.tools, calls, self.options.tool_concurrency, sink).await?;
            for call in &settled {
                state.push(Message::tool_result(call));
                if !call.failed() {
                    last_output = Some(call.render_outcome());
                }
            }
            executed.extend(settled);
            // Loop back: the model sees the tool results next.
        }
    }
}

/// An agent that lets the model request structured tool calls.
pub struct FunctionAgent {
    base: AgentBase,
}

impl FunctionAgent {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            base: AgentBase::new(model),
        }
    }

    /// Build from validated settings.
    pub fn from_settings(model: Arc<dyn LanguageModel>, settings: &AgentSettings) -> Result<Self> {
        Ok(Self {
            base: AgentBase::from_settings(model, settings)?,
        })
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.base.tools = tools;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base.options.system_prompt = Some(prompt.into());
        self
    }

    /// Set the maximum number of model calls per run.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.base.set_max_iterations(max);
        self
    }

    pub fn with_memory(mut self, policy: MemoryPolicy) -> Self {
        self.base.memory = MemoryManager::new(policy);
        self
    }

    pub fn with_tool_concurrency(mut self, concurrency: ToolConcurrency) -> Self {
        self.base.options.tool_concurrency = concurrency;
        self
    }

    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.base.options.stream_buffer = capacity;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.base.tools
    }

    pub fn options(&self) -> &LoopOptions {
        &self.base.options
    }
}

#[async_trait]
impl Agent for FunctionAgent {
    async fn run(&self, ctx: &RunContext, input: &str) -> Result<AgentResponse> {
        let mut state = self.base.slot.acquire()?;
        ToolLoop::from_base(&self.base)
            .turn(ctx, &mut state, input, &mut EventSink::disabled())
            .await
    }

    fn run_stream(&self, ctx: &RunContext, input: &str) -> Result<EventStream> {
        let mut state = self.base.slot.acquire()?;
        let engine = ToolLoop::from_base(&self.base);
        let (mut sink, events) = stream::channel(ctx, self.base.options.stream_buffer);
        let ctx = ctx.clone();
        let input = input.to_string();
        tokio::spawn(async move {
            let outcome = engine.turn(&ctx, &mut state, &input, &mut sink).await;
            sink.finish(&outcome).await;
        });
        Ok(events)
    }

    fn add_tool(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        self.base.add_tool(tool)
    }

    fn reset(&self) -> Result<()> {
        self.base.slot.reset()
    }

    fn export(&self) -> Result<ConversationState> {
        self.base.slot.export()
    }

    fn import(&self, state: ConversationState) -> Result<()> {
        self.base.slot.import(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamEventKind;
    use crate::test_helpers::*;
    use serde_json::json;
    use taskloom_core::{Error, Role};

    fn agent(model: Arc<ScriptedModel>) -> FunctionAgent {
        let tools = ToolRegistry::new()
            .with(Arc::new(MultiplyTool))
            .unwrap()
            .with(Arc::new(FailingTool))
            .unwrap();
        FunctionAgent::new(model).with_tools(tools)
    }

    #[tokio::test]
    async fn zero_iteration_bound_still_calls_the_model() {
        let model = Arc::new(ScriptedModel::new(vec![text("ok")]));
        let agent = agent(model.clone()).with_max_iterations(0);
        assert_eq!(agent.options().max_iterations, 1);

        let response = agent.run(&RunContext::new(), "Hi").await.unwrap();
        assert_eq!(response.content, "ok");
        assert!(!response.max_iterations_exceeded);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn simple_text_response() {
        init_tracing();
        let model = Arc::new(ScriptedModel::new(vec![text("Hello! How can I help?")]));
        let agent = agent(model.clone());

        let response = agent.run(&RunContext::new(), "Hi").await.unwrap();
        assert_eq!(response.content, "Hello! How can I help?");
        assert_eq!(response.iterations, 1);
        assert_eq!(response.tool_calls_made, 0);
        assert_eq!(response.usage.total_tokens, 15);

        let state = agent.export().unwrap();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].role, Role::User);
        assert_eq!(state.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn system_prompt_is_pinned_not_stored() {
        let model = Arc::new(ScriptedModel::new(vec![text("ok"), text("ok again")]));
        let agent = agent(model.clone()).with_system_prompt("You are terse.");
        agent.run(&RunContext::new(), "one").await.unwrap();
        agent.run(&RunContext::new(), "two").await.unwrap();

        for request in model.requests() {
            assert_eq!(request.messages[0].role, Role::System);
            assert_eq!(request.messages[0].content, "You are terse.");
            assert_eq!(request.tools.len(), 2);
        }
        let state = agent.export().unwrap();
        assert!(state.messages.iter().all(|m| m.role != Role::System));
    }

    #[tokio::test]
    async fn tool_failure_is_fed_back_to_model() {
        let model = Arc::new(ScriptedModel::new(vec![
            tool_calls(vec![call("c1", "failing", json!({}))]),
            text("The backend is down."),
        ]));
        let agent = agent(model.clone());
        let response = agent.run(&RunContext::new(), "try it").await.unwrap();
        assert_eq!(response.content, "The backend is down.");
        assert!(response.tool_calls[0].failed());

        let second = &model.requests()[1];
        let tool_msg = second.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.starts_with("Error: "));
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_not_fatal() {
        let model = Arc::new(ScriptedModel::new(vec![
            tool_calls(vec![call("c1", "teleport", json!({}))]),
            text("I cannot do that."),
        ]));
        let agent = agent(model.clone());
        let response = agent.run(&RunContext::new(), "go").await.unwrap();
        assert_eq!(response.content, "I cannot do that.");
        let state = agent.export().unwrap();
        let result = state.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(result.content.contains("Tool not found: teleport"));
    }

    #[tokio::test]
    async fn parallel_calls_each_get_a_result() {
        let model = Arc::new(ScriptedModel::new(vec![
            tool_calls(vec![
                call("c1", "multiply", json!({"a": 2, "b": 3})),
                call("c2", "multiply", json!({"a": "4", "b": 5})),
            ]),
            text("6 and 20"),
        ]));
        let agent = agent(model);
        let response = agent.run(&RunContext::new(), "both").await.unwrap();
        assert_eq!(response.tool_calls_made, 2);

        let state = agent.export().unwrap();
        assert!(state.orphaned_tool_results().is_empty());
        let results: Vec<_> = state
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| (m.tool_call_id.clone().unwrap(), m.content.clone()))
            .collect();
        assert_eq!(
            results,
            vec![("c1".to_string(), "6".to_string()), ("c2".to_string(), "20".to_string())]
        );
    }

    #[tokio::test]
    async fn iteration_bound_returns_partial_answer() {
        let model = Arc::new(ScriptedModel::new(vec![
            tool_calls(vec![call("c1", "multiply", json!({"a": 6, "b": 7}))]),
            tool_calls(vec![call("c2", "multiply", json!({"a": 1, "b": 1}))]),
        ]));
        let agent = agent(model.clone()).with_max_iterations(1);
        let response = agent.run(&RunContext::new(), "loop").await.unwrap();
        assert!(response.max_iterations_exceeded);
        assert_eq!(response.iterations, 1);
        assert_eq!(response.content, "42");
        assert_eq!(model.call_count(), 1);
        assert_eq!(response.tool_calls_made, 1);
    }

    #[tokio::test]
    async fn model_failure_restores_history() {
        let model = Arc::new(ScriptedModel::from_results(vec![
            Ok(text("first")),
            Err(taskloom_core::ModelError::RateLimited {
                retry_after_secs: 30,
            }),
        ]));
        let agent = agent(model);
        agent.run(&RunContext::new(), "one").await.unwrap();
        let err = agent.run(&RunContext::new(), "two").await.unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert_eq!(agent.export().unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn streaming_emits_tokens_tools_and_complete() {
        let model = Arc::new(
            ScriptedModel::new(vec![
                tool_calls(vec![call("c1", "multiply", json!({"a": 25, "b": 4}))]),
                text("The answer is 100"),
            ])
            .chunked(4),
        );
        let agent = agent(model);
        let events = agent
            .run_stream(&RunContext::new(), "What is 25 * 4?")
            .unwrap()
            .collect_all()
            .await;

        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds[0], StreamEventKind::ToolStart);
        assert_eq!(kinds[1], StreamEventKind::ToolEnd);
        assert_eq!(events[1].content, "100");
        let tokens: String = events
            .iter()
            .filter(|e| e.kind == StreamEventKind::Token)
            .map(|e| e.content.as_str())
            .collect();
        assert_eq!(tokens, "The answer is 100");
        let last = events.last().unwrap();
        assert_eq!(last.kind, StreamEventKind::Complete);
        assert_eq!(last.content, "The answer is 100");
        assert!(events.windows(2).all(|w| w[0].index < w[1].index));
    }

    #[tokio::test]
    async fn overlapping_run_is_rejected() {
        let agent = FunctionAgent::new(Arc::new(PendingModel));
        let ctx = RunContext::new();
        let _events = agent.run_stream(&ctx, "hang").unwrap();
        let err = agent.run(&RunContext::new(), "second").await.unwrap_err();
        assert!(matches!(err, Error::AgentBusy));
        assert!(matches!(agent.reset(), Err(Error::AgentBusy)));
        ctx.cancel();
    }

    #[tokio::test]
    async fn from_settings_rejects_invalid_config() {
        let settings = AgentSettings {
            max_iterations: 0,
            ..Default::default()
        };
        let model = Arc::new(ScriptedModel::new(vec![]));
        let err = FunctionAgent::from_settings(model, &settings).err().unwrap();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn add_tool_rejects_duplicates() {
        let mut agent = FunctionAgent::new(Arc::new(ScriptedModel::new(vec![])));
        agent.add_tool(Arc::new(MultiplyTool)).unwrap();
        let err = agent.add_tool(Arc::new(MultiplyTool)).unwrap_err();
        assert!(matches!(err, Error::Registry(_)));
        assert_eq!(agent.tools().len(), 1);
    }
}
