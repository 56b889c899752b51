//! The reasoning trace: one [`ReasoningStep`] per model call of a ReAct run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskloom_core::{ToolArgs, ToolCall};

/// The tool a step chose to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAction {
    pub tool: String,
    #[serde(default)]
    pub args: ToolArgs,
}

/// One Thought / Action / Observation record.
///
/// A step with neither an action nor an answer is a stall: the model
/// produced nothing the engine could act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub thought: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<StepAction>,

    /// Tool output, or `Error: ...` when the tool was missing or failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl ReasoningStep {
    fn with_thought(thought: String) -> Self {
        Self {
            thought,
            action: None,
            observation: None,
            answer: None,
            timestamp: Utc::now(),
        }
    }

    /// A thought that led nowhere.
    pub fn stalled(thought: impl Into<String>) -> Self {
        Self::with_thought(thought.into())
    }

    /// A thought followed by a settled tool call.
    pub fn acted(thought: impl Into<String>, call: &ToolCall) -> Self {
        Self {
            action: Some(StepAction {
                tool: call.name.clone(),
                args: call.args.clone(),
            }),
            observation: Some(call.render_outcome()),
            ..Self::with_thought(thought.into())
        }
    }

    pub fn answered(thought: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            answer: Some(answer.into()),
            ..Self::with_thought(thought.into())
        }
    }

    pub fn is_stall(&self) -> bool {
        self.action.is_none() && self.answer.is_none()
    }

    /// Text form, in the same format the model is asked to write.
    pub fn render(&self) -> String {
        let mut out = format!("Thought: {}", self.thought);
        if let Some(action) = &self.action {
            out.push_str(&format!(
                "\nAction: {}({})",
                action.tool,
                serde_json::Value::Object(action.args.clone())
            ));
        }
        if let Some(observation) = &self.observation {
            out.push_str(&format!("\nObservation: {observation}"));
        }
        if let Some(answer) = &self.answer {
            out.push_str(&format!("\nFinal Answer: {answer}"));
        }
        out
    }
}
