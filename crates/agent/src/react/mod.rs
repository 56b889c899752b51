//! ReAct engine: Thought → Action → Observation.
//!
//! The model reasons in free text. Each response is parsed into an action,
//! a final answer, or neither. Actions run through the tool registry and
//! their observations are fed back as a transcript of the run so far.
//! A response with neither counts as a stall; the engine re-prompts with a
//! clarifying note a bounded number of times in a row before giving up with
//! [`Error::ReasoningStalled`].
//!
//! Every model call records one [`ReasoningStep`]. The trace covers the
//! latest run only and stays readable while a run is in progress.

pub mod parser;
mod prompt;
pub mod trace;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use taskloom_config::AgentSettings;
use taskloom_core::{
    ChatRequest, ConversationState, Error, LanguageModel, Message, Result, RunContext, Tool,
    ToolArgs, ToolCall, ToolError, ToolRegistry, Usage,
};
use tracing::{debug, info, warn};

use crate::base::AgentBase;
use crate::memory::{MemoryManager, MemoryPolicy};
use crate::options::LoopOptions;
use crate::session::Checkpoint;
use crate::stream::{self, EventSink, EventStream};
use crate::{Agent, AgentResponse, step};

pub use parser::{ActionArgs, ReactOutput, parse_react_output};
pub use trace::{ReasoningStep, StepAction};

type SharedTrace = Arc<Mutex<Vec<ReasoningStep>>>;

fn lock(trace: &SharedTrace) -> MutexGuard<'_, Vec<ReasoningStep>> {
    trace.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
struct ReactLoop {
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    memory: MemoryManager,
    options: LoopOptions,
    trace: SharedTrace,
}

impl ReactLoop {
    fn new(base: &AgentBase, trace: &SharedTrace) -> Self {
        Self {
            model: base.model.clone(),
            tools: base.tools.clone(),
            memory: base.memory.clone(),
            options: base.options.clone(),
            trace: trace.clone(),
        }
    }

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
            tools = self.tools.len(),
            "Starting ReAct run"
        );
        state.max_iterations = self.options.max_iterations;
        state.begin_run();
        lock(&self.trace).clear();
        let checkpoint = Checkpoint::take(state);
        state.push(Message::user(input));

        let outcome = match self.reason(ctx, state, sink).await {
            Ok(response) => self.memory.apply(ctx, state).await.map(|_| response),
            Err(e) => Err(e),
        };
        checkpoint.settle(state, &outcome);
        outcome
    }

    async fn reason(
        &self,
        ctx: &RunContext,
        state: &mut ConversationState,
        sink: &mut EventSink,
    ) -> Result<AgentResponse> {
        let system = prompt::system_prompt(self.options.system_prompt.as_deref(), &self.tools.schemas());
        let mut steps: Vec<ReasoningStep> = Vec::new();
        let mut executed: Vec<ToolCall> = Vec::new();
        let mut usage = Usage::default();
        let mut stalls: u32 = 0;

        loop {
            ctx.check()?;
            if !state.tick() {
                state.iteration = state.max_iterations;
                warn!(
                    state_id = %state.id,
                    max_iterations = state.max_iterations,
                    steps = steps.len(),
                    "Max iterations reached without a final answer"
                );
                return Ok(AgentResponse {
                    content: partial_answer(&steps, state.max_iterations),
                    iterations: state.iteration,
                    tool_calls_made: executed.len(),
                    tool_calls: executed,
                    max_iterations_exceeded: true,
                    usage,
                });
            }

            self.memory.apply_in_turn(ctx, state).await?;
            let request = ChatRequest::new(prompt::build_messages(
                &system,
                &state.messages,
                &steps,
                stalls > 0,
            ))
            .with_sampling(self.options.temperature, self.options.max_tokens)
            .with_stop(vec![prompt::OBSERVATION_STOP.to_string()]);

            let response = step::call_model(self.model.as_ref(), ctx, request, sink).await?;
            if let Some(reported) = &response.usage {
                state.record_usage(reported);
                usage.accumulate(reported);
            }

            match parse_react_output(&response.content) {
                ReactOutput::FinalAnswer { thought, answer } => {
                    sink.thought(&thought).await;
                    sink.answer(&answer).await;
                    self.record(&mut steps, ReasoningStep::answered(thought, answer.clone()));
                    state.push(Message::assistant(answer.clone()));
                    info!(
                        state_id = %state.id,
                        iterations = state.iteration,
                        steps = steps.len(),
                        "ReAct run complete"
                    );
                    return Ok(AgentResponse {
                        content: answer,
                        iterations: state.iteration,
                        tool_calls_made: executed.len(),
                        tool_calls: executed,
                        max_iterations_exceeded: false,
                        usage,
                    });
                }
                ReactOutput::Action { thought, tool, args } => {
                    stalls = 0;
                    sink.thought(&thought).await;
                    let call = self.act(ctx, &tool, args, sink).await?;
                    debug!(iteration = state.iteration, action = %call.signature(), "ReAct action");
                    self.record(&mut steps, ReasoningStep::acted(thought, &call));
                    executed.push(call);
                }
                ReactOutput::Unparseable { thought } => {
                    sink.thought(&thought).await;
                    self.record(&mut steps, ReasoningStep::stalled(thought.clone()));
                    if stalls >= self.options.max_reprompts {
                        warn!(
                            state_id = %state.id,
                            reprompts = stalls,
                            "Reasoning stalled, giving up"
                        );
                        return Err(Error::ReasoningStalled {
                            reprompts: stalls,
                            last_thought: thought,
                        });
                    }
                    stalls += 1;
                    warn!(reprompt = stalls, "No action or final answer in response, re-prompting");
                }
            }
        }
    }

    /// Bind and run one action. A binding failure settles the call with an
    /// error instead of executing it, so the model sees it as an observation.
    async fn act(
        &self,
        ctx: &RunContext,
        tool: &str,
        args: ActionArgs,
        sink: &mut EventSink,
    ) -> Result<ToolCall> {
        let schema = self.tools.schema(tool);
        let call = match args.bind(schema.as_ref()) {
            Ok(bound) => {
                let call = ToolCall::new(tool, bound);
                sink.tool_start(&call).await;
                ctx.guard(step::execute_call(ctx, &self.tools, call)).await?
            }
            Err(reason) => {
                let mut call = ToolCall::new(tool, ToolArgs::new());
                sink.tool_start(&call).await;
                let error = ToolError::InvalidArguments {
                    tool_name: tool.to_string(),
                    reason,
                };
                warn!(tool, error = %error, "Could not bind action arguments");
                call.settle(Err(error.to_string()));
                call
            }
        };
        sink.tool_end(&call).await;
        Ok(call)
    }

    fn record(&self, steps: &mut Vec<ReasoningStep>, step: ReasoningStep) {
        lock(&self.trace).push(step.clone());
        steps.push(step);
    }
}

/// Best answer available when the iteration bound stops a run: the latest
/// observation, else the latest thought.
fn partial_answer(steps: &[ReasoningStep], max_iterations: u32) -> String {
    steps
        .iter()
        .rev()
        .find_map(|s| s.observation.clone())
        .or_else(|| {
            steps
                .iter()
                .rev()
                .map(|s| s.thought.trim())
                .find(|t| !t.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("Stopped after {max_iterations} iteration(s) without a final answer."))
}

/// An agent that reasons in free text and acts through named tools.
pub struct ReactAgent {
    base: AgentBase,
    trace: SharedTrace,
}

impl ReactAgent {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            base: AgentBase::new(model),
            trace: SharedTrace::default(),
        }
    }

    /// Build from validated settings.
    pub fn from_settings(model: Arc<dyn LanguageModel>, settings: &AgentSettings) -> Result<Self> {
        Ok(Self {
            base: AgentBase::from_settings(model, settings)?,
            trace: SharedTrace::default(),
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

    /// Clarifying re-prompts allowed in a row before the run fails.
    pub fn with_max_reprompts(mut self, max: u32) -> Self {
        self.base.options.max_reprompts = max;
        self
    }

    pub fn with_memory(mut self, policy: MemoryPolicy) -> Self {
        self.base.memory = MemoryManager::new(policy);
        self
    }

    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.base.options.stream_buffer = capacity;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.base.tools
    }

    /// Steps of the latest run, in order.
    pub fn trace(&self) -> Vec<ReasoningStep> {
        lock(&self.trace).clone()
    }
}

#[async_trait]
impl Agent for ReactAgent {
    async fn run(&self, ctx: &RunContext, input: &str) -> Result<AgentResponse> {
        let mut state = self.base.slot.acquire()?;
        ReactLoop::new(&self.base, &self.trace)
            .turn(ctx, &mut state, input, &mut EventSink::disabled())
            .await
    }

    fn run_stream(&self, ctx: &RunContext, input: &str) -> Result<EventStream> {
        let mut state = self.base.slot.acquire()?;
        let engine = ReactLoop::new(&self.base, &self.trace);
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
        self.base.slot.reset()?;
        lock(&self.trace).clear();
        Ok(())
    }

    fn export(&self) -> Result<ConversationState> {
        self.base.slot.export()
    }

    fn import(&self, state: ConversationState) -> Result<()> {
        self.base.slot.import(state)
    }
}
