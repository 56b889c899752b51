//! Tool trait — the abstraction over agent capabilities — and the
//! per-agent registry that resolves and executes tools by name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::context::RunContext;
use crate::error::{BoxError, RegistryError, ToolError};
use crate::message::ToolArgs;

/// Primitive type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    /// Convert text-encoded scalars (as produced by free-text parsing)
    /// into the declared type. Returns `None` when no conversion applies.
    fn coerce(self, value: &Value) -> Option<Value> {
        let text = value.as_str()?.trim();
        match self {
            Self::Integer => text.parse::<i64>().ok().map(Value::from),
            Self::Number => text.parse::<f64>().ok().map(Value::from),
            Self::Boolean => text.parse::<bool>().ok().map(Value::from),
            Self::Array | Self::Object => serde_json::from_str::<Value>(text)
                .ok()
                .filter(|v| self.accepts(v)),
            Self::String => None,
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative description of one tool argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Parameter {
    /// A required parameter.
    pub fn required(name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
            enum_values: Vec::new(),
            default: None,
        }
    }

    /// An optional parameter.
    pub fn optional(name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = values;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Static description of a tool's accepted arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// JSON Schema form sent to models that support structured tool calls.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        for p in &self.parameters {
            let mut prop = serde_json::Map::new();
            prop.insert("type".into(), Value::from(p.kind.as_str()));
            if !p.description.is_empty() {
                prop.insert("description".into(), Value::from(p.description.clone()));
            }
            if !p.enum_values.is_empty() {
                prop.insert("enum".into(), Value::Array(p.enum_values.clone()));
            }
            if let Some(default) = &p.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(p.name.clone(), Value::Object(prop));
        }
        let required: Vec<Value> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| Value::from(p.name.clone()))
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// One-line text form used in free-text prompts, e.g.
    /// `multiply(a: integer, b: integer) - Multiply two numbers`.
    pub fn describe(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|p| {
                let marker = if p.required { "" } else { "?" };
                format!("{}{}: {}", p.name, marker, p.kind)
            })
            .collect();
        format!("{}({}) - {}", self.name, params.join(", "), self.description)
    }

    /// Map positional values onto parameter names in declaration order.
    pub fn bind_positional(&self, values: Vec<Value>) -> Result<ToolArgs, String> {
        if values.len() > self.parameters.len() {
            return Err(format!(
                "{} takes {} argument(s) but {} were given",
                self.name,
                self.parameters.len(),
                values.len()
            ));
        }
        Ok(self
            .parameters
            .iter()
            .zip(values)
            .map(|(p, v)| (p.name.clone(), v))
            .collect())
    }

    /// Check arguments against the schema, filling defaults and coercing
    /// text-encoded scalars. Unknown arguments pass through untouched.
    pub fn validate(&self, mut args: ToolArgs) -> Result<ToolArgs, String> {
        for p in &self.parameters {
            let Some(value) = args.get(&p.name) else {
                if let Some(default) = &p.default {
                    args.insert(p.name.clone(), default.clone());
                    continue;
                }
                if p.required {
                    return Err(format!("missing required argument '{}'", p.name));
                }
                continue;
            };
            if !p.kind.accepts(value) {
                let coerced = p.kind.coerce(value).ok_or_else(|| {
                    format!("argument '{}' must be of type {}, got {}", p.name, p.kind, value)
                })?;
                args.insert(p.name.clone(), coerced);
            }
            if !p.enum_values.is_empty() && !p.enum_values.contains(&args[&p.name]) {
                return Err(format!(
                    "argument '{}' must be one of {}",
                    p.name,
                    Value::Array(p.enum_values.clone())
                ));
            }
        }
        Ok(args)
    }
}

/// The core Tool trait.
///
/// Tools are registered in a [`ToolRegistry`] and executed by the engines.
/// Implementations must be safe for concurrent read-only use.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// The declared input schema.
    fn schema(&self) -> ToolSchema;

    /// Execute the tool. Any error returned is wrapped by the registry as
    /// [`ToolError::ExecutionFailed`] with this error as its source.
    async fn execute(&self, ctx: &RunContext, args: ToolArgs) -> Result<Value, BoxError>;
}

/// A per-agent registry of tools keyed by name.
///
/// Cloning is cheap (tools are shared behind `Arc`), which lets a streaming
/// run take a snapshot of the registry onto its own task.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique; re-registering is an error.
    pub fn add(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::InvalidTool("tool has no name".into()));
        }
        let schema_name = tool.schema().name;
        if schema_name != name {
            return Err(RegistryError::InvalidTool(format!(
                "tool '{name}' declares a schema named '{schema_name}'"
            )));
        }
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        debug!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Builder-style [`add`](Self::add).
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Result<Self, RegistryError> {
        self.add(tool)?;
        Ok(self)
    }

    /// Look up a tool by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Schema of a registered tool.
    pub fn schema(&self, name: &str) -> Option<ToolSchema> {
        self.tools.get(name).map(|t| t.schema())
    }

    /// All tool schemas, ordered by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    /// Execute a tool by name.
    ///
    /// A missing tool is [`ToolError::NotFound`]; arguments failing the schema
    /// are [`ToolError::InvalidArguments`]; anything the tool itself raises is
    /// wrapped as [`ToolError::ExecutionFailed`] with the original cause.
    pub async fn execute(&self, ctx: &RunContext, name: &str, args: ToolArgs) -> Result<Value, ToolError> {
        let tool = self.resolve(name)?;
        let args = tool
            .schema()
            .validate(args)
            .map_err(|reason| ToolError::InvalidArguments {
                tool_name: name.to_string(),
                reason,
            })?;
        tool.execute(ctx, args)
            .await
            .map_err(|source| ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                source,
            })
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
