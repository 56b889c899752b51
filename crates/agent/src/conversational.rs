//! Conversational engine: multi-turn chat over retained memory.
//!
//! Each turn appends the user input, trims memory, and calls the model once.
//! With tools attached the turn runs the same tool-calling loop as
//! [`FunctionAgent`](crate::FunctionAgent). Memory is trimmed again once the
//! reply is in, so the stored state respects the policy between turns.

use std::sync::Arc;

use async_trait::async_trait;
use taskloom_config::{AgentSettings, ToolConcurrency};
use taskloom_core::{
    ChatRequest, ConversationState, LanguageModel, Message, Result, RunContext, Tool, ToolRegistry,
    Usage,
};
use tracing::{debug, info, warn};

use crate::base::AgentBase;
use crate::function::ToolLoop;
use crate::memory::{MemoryManager, MemoryPolicy};
use crate::session::Checkpoint;
use crate::stream::{self, EventSink, EventStream};
use crate::{Agent, AgentResponse, step};

#[derive(Clone)]
struct ChatTurn {
    inner: ToolLoop,
}

impl ChatTurn {
    async fn turn(
        &self,
        ctx: &RunContext,
        state: &mut ConversationState,
        input: &str,
        sink: &mut EventSink,
    ) -> Result<AgentResponse> {
        info!(
            state_id = %state.id,
            messages = state.messages.len(),
            "Processing conversational turn"
        );
        state.max_iterations = self.inner.options.max_iterations;
        state.begin_run();
        let checkpoint = Checkpoint::take(state);
        state.push(Message::user(input));

        let outcome = if self.inner.tools.is_empty() {
            self.reply(ctx, state, sink).await
        } else {
            self.inner.drive(ctx, state, sink).await
        };
        let outcome = match outcome {
            Ok(response) => self.inner.memory.apply(ctx, state).await.map(|_| response),
            Err(e) => Err(e),
        };
        checkpoint.settle(state, &outcome);
        outcome
    }

    /// Single model call, no tools.
    async fn reply(
        &self,
        ctx: &RunContext,
        state: &mut ConversationState,
        sink: &mut EventSink,
    ) -> Result<AgentResponse> {
        ctx.check()?;
        state.tick();
        self.inner.memory.apply_in_turn(ctx, state).await?;

        let options = &self.inner.options;
        let request = ChatRequest::new(step::build_prompt(options.system_prompt.as_deref(), &state.messages))
            .with_sampling(options.temperature, options.max_tokens);
        let response = step::call_model(self.inner.model.as_ref(), ctx, request, sink).await?;

        let mut usage = Usage::default();
        if let Some(reported) = &response.usage {
            state.record_usage(reported);
            usage.accumulate(reported);
        }
        if !response.tool_calls.is_empty() {
            warn!(
                count = response.tool_calls.len(),
                "Model requested tool calls but no tools are attached, ignoring them"
            );
        }
        state.push(Message::assistant(response.content.clone()));
        debug!(state_id = %state.id, messages = state.messages.len(), "Reply appended");

        Ok(AgentResponse {
            content: response.content,
            iterations: state.iteration,
            tool_calls_made: 0,
            tool_calls: vec![],
            max_iterations_exceeded: false,
            usage,
        })
    }
}

/// A multi-turn chat agent with bounded memory.
pub struct ConversationalAgent {
    base: AgentBase,
}

impl ConversationalAgent {
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

    pub fn memory(&self) -> &MemoryManager {
        &self.base.memory
    }

    fn engine(&self) -> ChatTurn {
        ChatTurn {
            inner: ToolLoop::from_base(&self.base),
        }
    }
}

#[async_trait]
impl Agent for ConversationalAgent {
    async fn run(&self, ctx: &RunContext, input: &str) -> Result<AgentResponse> {
        let mut state = self.base.slot.acquire()?;
        self.engine()
            .turn(ctx, &mut state, input, &mut EventSink::disabled())
            .await
    }

    fn run_stream(&self, ctx: &RunContext, input: &str) -> Result<EventStream> {
        let mut state = self.base.slot.acquire()?;
        let engine = self.engine();
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
