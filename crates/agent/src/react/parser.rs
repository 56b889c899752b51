//! Tolerant parser for free-text ReAct output.
//!
//! Recognized labels (case-insensitive, optional markdown emphasis):
//! `Thought:`, `Action:`, `Action Input:`, `Final Answer:`. Anything after
//! an `Observation:` line is the model inventing tool output and is ignored.
//!
//! Actions may be written as `tool(args)` or as `Action: tool` followed by
//! `Action Input: args`, where args are a JSON object, `key=value` pairs,
//! or positional values.

use serde_json::Value;
use taskloom_core::{ToolArgs, ToolSchema};

/// What one model response asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum ReactOutput {
    /// Run a tool. Wins over a final answer in the same response.
    Action {
        thought: String,
        tool: String,
        args: ActionArgs,
    },
    FinalAnswer { thought: String, answer: String },
    /// Neither a usable action nor a final answer.
    Unparseable { thought: String },
}

/// Arguments as written by the model, before binding to a schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionArgs {
    pub positional: Vec<Value>,
    pub named: ToolArgs,
}

impl ActionArgs {
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    /// Resolve into named arguments. Positional values are bound in the
    /// declared parameter order of `schema`.
    pub fn bind(self, schema: Option<&ToolSchema>) -> Result<ToolArgs, String> {
        if self.positional.is_empty() {
            return Ok(self.named);
        }
        let Some(schema) = schema else {
            // Unknown tool: keep the values visible; the registry reports it.
            let mut named = self.named;
            for (i, value) in self.positional.into_iter().enumerate() {
                named.entry(format!("arg{i}")).or_insert(value);
            }
            return Ok(named);
        };
        let mut bound = schema.bind_positional(self.positional)?;
        for (key, value) in self.named {
            if bound.contains_key(&key) {
                return Err(format!("argument '{key}' given both by position and by name"));
            }
            bound.insert(key, value);
        }
        Ok(bound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Thought,
    Action,
    ActionInput,
    FinalAnswer,
    Observation,
}

// Longest prefixes first so "action input:" is not read as "action:".
const LABELS: [(&str, Label); 5] = [
    ("final answer:", Label::FinalAnswer),
    ("action input:", Label::ActionInput),
    ("observation:", Label::Observation),
    ("thought:", Label::Thought),
    ("action:", Label::Action),
];

fn split_label(line: &str) -> Option<(Label, &str)> {
    let cleaned = line
        .trim_start()
        .trim_start_matches(['*', '#', '>', '-', '_'])
        .trim_start();
    let lower = cleaned.to_ascii_lowercase();
    LABELS.iter().find_map(|(prefix, label)| {
        lower.starts_with(prefix).then(|| {
            let rest = cleaned[prefix.len()..].trim_start_matches(['*', '_']).trim();
            (*label, rest)
        })
    })
}

/// Parse one model response.
pub fn parse_react_output(text: &str) -> ReactOutput {
    let mut preamble = String::new();
    let mut sections: Vec<(Label, String)> = Vec::new();

    for line in text.lines() {
        match split_label(line) {
            Some((Label::Observation, _)) => break,
            Some((label, rest)) => sections.push((label, rest.to_string())),
            None => match sections.last_mut() {
                Some((_, body)) => {
                    body.push('\n');
                    body.push_str(line);
                }
                None => {
                    preamble.push_str(line);
                    preamble.push('\n');
                }
            },
        }
    }

    let section = |wanted: Label| {
        sections
            .iter()
            .find(|(label, _)| *label == wanted)
            .map(|(_, body)| body.trim().to_string())
    };

    let thought = section(Label::Thought).unwrap_or_else(|| preamble.trim().to_string());

    if let Some(action) = section(Label::Action)
        && let Some((tool, args)) = parse_action(&action, section(Label::ActionInput).as_deref())
    {
        return ReactOutput::Action { thought, tool, args };
    }

    if let Some(answer) = section(Label::FinalAnswer).filter(|a| !a.is_empty()) {
        return ReactOutput::FinalAnswer { thought, answer };
    }

    let thought = if thought.is_empty() {
        text.trim().to_string()
    } else {
        thought
    };
    ReactOutput::Unparseable { thought }
}

fn parse_action(text: &str, input: Option<&str>) -> Option<(String, ActionArgs)> {
    let text = text.trim().trim_matches('`').trim();
    let (name, inline) = match text.find('(') {
        Some(open) => {
            let close = text.rfind(')').filter(|c| *c > open).unwrap_or(text.len());
            (&text[..open], Some(&text[open + 1..close]))
        }
        None => (text.lines().next().unwrap_or_default(), None),
    };
    let name = name.trim().trim_matches(['`', '"', '\'']).trim();
    if !is_tool_name(name) || name.eq_ignore_ascii_case("none") {
        return None;
    }
    let args = parse_args(inline.or(input).unwrap_or_default());
    Some((name.to_string(), args))
}

fn is_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Parse an argument list: a JSON object, or comma-separated values where
/// `key=value` (or `"key": value`) entries are named.
pub fn parse_args(text: &str) -> ActionArgs {
    let text = text.trim();
    let mut args = ActionArgs::default();
    if text.is_empty() {
        return args;
    }
    if text.starts_with('{')
        && let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text)
    {
        args.named = map;
        return args;
    }
    for piece in split_top_level(text) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        match split_named(piece) {
            Some((key, value)) => {
                args.named.insert(key, parse_value(value));
            }
            None => args.positional.push(parse_value(piece)),
        }
    }
    args
}

/// Split on commas that are outside quotes and brackets.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                pieces.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&text[start..]);
    pieces
}

/// `key=value`, `key: value` or `"key": value`.
fn split_named(piece: &str) -> Option<(String, &str)> {
    let sep = piece.find(['=', ':'])?;
    let raw_key = piece[..sep].trim();
    let value = piece[sep + 1..].trim();
    let quoted = raw_key.len() >= 2
        && ((raw_key.starts_with('"') && raw_key.ends_with('"'))
            || (raw_key.starts_with('\'') && raw_key.ends_with('\'')));
    let key = if quoted {
        &raw_key[1..raw_key.len() - 1]
    } else {
        raw_key
    };
    let identifier = !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !identifier {
        return None;
    }
    // "http://..." is a positional value, not a key named http.
    if &piece[sep..=sep] == ":" && !quoted && value.starts_with('/') {
        return None;
    }
    Some((key.to_string(), value))
}

fn parse_value(text: &str) -> Value {
    let text = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return value;
    }
    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        return Value::String(text[1..text.len() - 1].to_string());
    }
    Value::String(text.to_string())
}
