//! Prompt assembly for the ReAct engine.

use taskloom_core::{Message, ToolSchema};

use super::trace::ReasoningStep;

const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant that solves problems step by step.";

const FORMAT: &str = "Respond in exactly one of these two formats.

To use a tool:
Thought: <your reasoning>
Action: <tool_name>(<arguments>)

When you know the answer:
Thought: <your reasoning>
Final Answer: <the answer>

Arguments may be positional, as in tool(1, \"two\"), named, as in tool(a=1, b=\"two\"), \
or a JSON object. Never write an Observation yourself; it is provided after the action runs.";

/// Sent after a response that had neither an action nor a final answer.
pub(crate) const STALL_NOTE: &str = "Your last reply did not follow the required format. \
Reply with a Thought followed by either an `Action: tool_name(arguments)` line or a \
`Final Answer:` line.";

/// Stop sequence that keeps the model from inventing tool output.
pub(crate) const OBSERVATION_STOP: &str = "\nObservation:";

/// System prompt: instructions, the tool list and the output format.
pub(crate) fn system_prompt(instructions: Option<&str>, tools: &[ToolSchema]) -> String {
    let mut prompt = instructions
        .filter(|i| !i.trim().is_empty())
        .unwrap_or(DEFAULT_INSTRUCTIONS)
        .to_string();
    prompt.push_str("\n\n");
    if tools.is_empty() {
        prompt.push_str("No tools are available; answer directly.\n\n");
    } else {
        prompt.push_str("You can use the following tools:\n");
        for tool in tools {
            prompt.push_str(&format!("- {}\n", tool.describe()));
        }
        prompt.push('\n');
    }
    prompt.push_str(FORMAT);
    prompt
}

/// Messages for the next model call: system prompt, retained history, then
/// the steps of the current run as one transcript.
pub(crate) fn build_messages(
    system: &str,
    history: &[Message],
    steps: &[ReasoningStep],
    stalled: bool,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.push(Message::system(system));
    messages.extend_from_slice(history);
    if !steps.is_empty() {
        let transcript: Vec<String> = steps.iter().map(ReasoningStep::render).collect();
        messages.push(Message::user(format!(
            "Progress so far:\n\n{}\n\nContinue with your next Thought.",
            transcript.join("\n\n")
        )));
    }
    if stalled {
        messages.push(Message::system(STALL_NOTE));
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskloom_core::{ParamType, Parameter, Role};

    #[test]
    fn system_prompt_lists_tools() {
        let schema = ToolSchema::new("multiply", "Multiply two integers")
            .param(Parameter::required("a", ParamType::Integer, ""))
            .param(Parameter::required("b", ParamType::Integer, ""));
        let prompt = system_prompt(Some("Be precise."), &[schema]);
        assert!(prompt.starts_with("Be precise."));
        assert!(prompt.contains("- multiply(a: integer, b: integer) - Multiply two integers"));
        assert!(prompt.contains("Final Answer:"));
    }

    #[test]
    fn empty_instructions_fall_back_to_default() {
        let prompt = system_prompt(Some("  "), &[]);
        assert!(prompt.starts_with(DEFAULT_INSTRUCTIONS));
        assert!(prompt.contains("No tools are available"));
    }

    #[test]
    fn transcript_and_stall_note_follow_history() {
        let history = vec![Message::user("What is 6 * 7?")];
        let steps = vec![ReasoningStep::stalled("thinking")];
        let messages = build_messages("sys", &history, &steps, true);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "What is 6 * 7?");
        assert!(messages[2].content.contains("Thought: thinking"));
        assert_eq!(messages[3].role, Role::System);
        assert_eq!(messages[3].content, STALL_NOTE);

        assert_eq!(build_messages("sys", &history, &[], false).len(), 2);
    }
}
