//! Building blocks shared by the engines: prompt assembly, one model call,
//! and one batch of tool executions.

use std::collections::HashSet;
use std::time::Instant;

use futures::future::join_all;
use taskloom_config::ToolConcurrency;
use taskloom_core::{
    ChatRequest, ChatResponse, DeltaAccumulator, LanguageModel, Message, Result, RunContext, ToolCall,
    ToolRegistry,
};
use tracing::{debug, warn};

use crate::stream::EventSink;

/// Messages sent to the model: the pinned system prompt (if any) followed by
/// the retained history.
pub(crate) fn build_prompt(system_prompt: Option<&str>, history: &[Message]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
        messages.push(Message::system(prompt));
    }
    messages.extend_from_slice(history);
    messages
}

/// Call the model once.
///
/// With a live sink the call streams and each text delta is forwarded as a
/// token event; otherwise it is a plain `chat` call. Both paths honour
/// cancellation and the deadline.
pub(crate) async fn call_model(
    model: &dyn LanguageModel,
    ctx: &RunContext,
    request: ChatRequest,
    sink: &mut EventSink,
) -> Result<ChatResponse> {
    let start = Instant::now();
    let response = if sink.is_live() {
        let mut deltas = ctx.guard(model.chat_stream(ctx, request)).await??;
        let mut acc = DeltaAccumulator::new();
        while let Some(delta) = ctx.guard(deltas.recv()).await? {
            let delta = delta?;
            sink.token(&delta.delta_text).await;
            acc.push(&delta);
        }
        acc.finish(model.name())
    } else {
        ctx.guard(model.chat(ctx, request)).await??
    };
    debug!(
        model = model.name(),
        duration_ms = start.elapsed().as_millis() as u64,
        tool_calls = response.tool_calls.len(),
        "Model call finished"
    );
    Ok(response)
}

/// Give every requested call an id that is non-empty and unique across the
/// history, and clear any outcome the model may have filled in.
pub(crate) fn assign_call_ids(calls: Vec<ToolCall>, history: &[Message]) -> Vec<ToolCall> {
    let mut seen: HashSet<String> = history
        .iter()
        .flat_map(|m| m.tool_calls.iter().map(|c| c.id.clone()))
        .collect();
    calls
        .into_iter()
        .map(|call| {
            let mut call = if call.id.trim().is_empty() || seen.contains(&call.id) {
                ToolCall::new(call.name, call.args)
            } else {
                ToolCall::with_id(call.id, call.name, call.args)
            };
            seen.insert(call.id.clone());
            call.result = None;
            call.error = None;
            call
        })
        .collect()
}

/// Execute and settle one call. Failures become the call's error text.
///
/// The tool runs on a child context: it follows the run's cancellation, but
/// cancelling it from inside the tool stops only that tool's own work.
pub(crate) async fn execute_call(ctx: &RunContext, tools: &ToolRegistry, mut call: ToolCall) -> ToolCall {
    let start = Instant::now();
    let scope = ctx.child();
    let outcome = tools.execute(&scope, &call.name, call.args.clone()).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    match &outcome {
        Ok(_) => debug!(tool = %call.name, duration_ms, "Tool executed"),
        Err(e) => warn!(tool = %call.name, duration_ms, error = %e, "Tool execution failed"),
    }
    call.settle(outcome.map_err(|e| e.to_string()));
    call
}

/// Execute a batch of calls and return them settled, in request order.
///
/// Every call settles even when another in the batch fails. Only
/// cancellation or the deadline abort the batch.
pub(crate) async fn execute_calls(
    ctx: &RunContext,
    tools: &ToolRegistry,
    calls: Vec<ToolCall>,
    concurrency: ToolConcurrency,
    sink: &mut EventSink,
) -> Result<Vec<ToolCall>> {
    match concurrency {
        ToolConcurrency::Parallel => {
            for call in &calls {
                sink.tool_start(call).await;
            }
            let settled = ctx
                .guard(join_all(calls.into_iter().map(|c| execute_call(ctx, tools, c))))
                .await?;
            for call in &settled {
                sink.tool_end(call).await;
            }
            Ok(settled)
        }
        ToolConcurrency::Sequential => {
            let mut settled = Vec::with_capacity(calls.len());
            for call in calls {
                sink.tool_start(&call).await;
                let call = ctx.guard(execute_call(ctx, tools, call)).await?;
                sink.tool_end(&call).await;
                settled.push(call);
            }
            Ok(settled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FailingTool, MultiplyTool, ScriptedModel, SlowTool, args};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use taskloom_core::{Error, Role};

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.add(Arc::new(MultiplyTool)).unwrap();
        tools.add(Arc::new(FailingTool)).unwrap();
        tools.add(Arc::new(SlowTool::new(Duration::from_secs(60)))).unwrap();
        tools
    }

    #[test]
    fn prompt_pins_system_message() {
        let history = vec![Message::user("hi")];
        let prompt = build_prompt(Some("be brief"), &history);
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0].role, Role::System);
        assert_eq!(build_prompt(Some("  "), &history).len(), 1);
        assert_eq!(build_prompt(None, &history).len(), 1);
    }

    #[test]
    fn duplicate_and_empty_ids_are_replaced() {
        let earlier = ToolCall::with_id("c1", "multiply", args(json!({})));
        let history = vec![Message::assistant_with_calls("", vec![earlier])];
        let calls = vec![
            ToolCall::with_id("c1", "multiply", args(json!({}))),
            ToolCall::with_id("", "multiply", args(json!({}))),
            ToolCall::with_id("c2", "multiply", args(json!({}))),
            ToolCall::with_id("c2", "multiply", args(json!({}))),
        ];
        let assigned = assign_call_ids(calls, &history);
        let ids: HashSet<_> = assigned.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 4);
        assert!(!ids.contains("c1"));
        assert!(ids.contains("c2"));
    }

    #[tokio::test]
    async fn failed_call_settles_with_error_text() {
        let call = ToolCall::new("failing", args(json!({})));
        let settled = execute_call(&RunContext::new(), &registry(), call).await;
        assert!(settled.failed());
        assert!(settled.render_outcome().starts_with("Error: "));

        let missing = ToolCall::new("nope", args(json!({})));
        let settled = execute_call(&RunContext::new(), &registry(), missing).await;
        assert!(settled.render_outcome().contains("Tool not found: nope"));
    }

    /// Cancels the context it was handed, then reports whether it saw that.
    struct Quitter;

    #[async_trait::async_trait]
    impl taskloom_core::Tool for Quitter {
        fn name(&self) -> &str {
            "quitter"
        }

        fn schema(&self) -> taskloom_core::ToolSchema {
            taskloom_core::ToolSchema::new("quitter", "Cancels its own context")
        }

        async fn execute(
            &self,
            ctx: &RunContext,
            _args: taskloom_core::ToolArgs,
        ) -> std::result::Result<serde_json::Value, taskloom_core::BoxError> {
            ctx.cancel();
            Ok(json!(ctx.is_cancelled()))
        }
    }

    #[tokio::test]
    async fn tool_cancelling_its_context_leaves_the_run_alive() {
        let tools = ToolRegistry::new().with(Arc::new(Quitter)).unwrap();
        let ctx = RunContext::new();
        let settled = execute_call(&ctx, &tools, ToolCall::new("quitter", args(json!({})))).await;
        assert_eq!(settled.render_outcome(), "true");
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn batch_settles_every_call_in_order() {
        let calls = vec![
            ToolCall::new("multiply", args(json!({"a": 2, "b": 3}))),
            ToolCall::new("failing", args(json!({}))),
            ToolCall::new("multiply", args(json!({"a": 4, "b": 5}))),
        ];
        for concurrency in [ToolConcurrency::Parallel, ToolConcurrency::Sequential] {
            let settled = execute_calls(
                &RunContext::new(),
                &registry(),
                calls.clone(),
                concurrency,
                &mut EventSink::disabled(),
            )
            .await
            .unwrap();
            assert_eq!(settled.len(), 3);
            assert!(settled.iter().all(|c| c.is_settled()));
            assert_eq!(settled[0].result, Some(json!(6)));
            assert!(settled[1].failed());
            assert_eq!(settled[2].result, Some(json!(20)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batch_stops_at_deadline() {
        let ctx = RunContext::new().with_timeout(Duration::from_secs(1));
        let calls = vec![ToolCall::new("slow", args(json!({})))];
        let err = execute_calls(
            &ctx,
            &registry(),
            calls,
            ToolConcurrency::Parallel,
            &mut EventSink::disabled(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
    }

    #[tokio::test]
    async fn model_call_surfaces_model_errors() {
        let model = ScriptedModel::failing();
        let err = call_model(
            &model,
            &RunContext::new(),
            ChatRequest::new(vec![Message::user("hi")]),
            &mut EventSink::disabled(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Model(_)));
    }
}
