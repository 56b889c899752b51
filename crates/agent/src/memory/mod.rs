//! Conversation memory: retention policies applied to a
//! [`ConversationState`] before each model call.
//!
//! A leading system message is pinned and never trimmed. Every policy keeps
//! the most recent user message and never leaves a tool result without the
//! assistant message that requested it.

pub mod importance;
mod policy;
pub mod summarizer;
pub mod token;

use std::fmt;
use std::sync::Arc;

use serde_json::json;
use taskloom_config::MemoryConfig;
use taskloom_core::{ConversationState, LanguageModel, Message, Result, RunContext};
use tracing::{debug, warn};

pub use summarizer::{ModelSummarizer, Summarizer};

/// Scores a message for the selective policy. Higher is more important.
pub type ImportanceFn = Arc<dyn Fn(&Message) -> f32 + Send + Sync>;

/// Window size used when no policy is configured.
pub const DEFAULT_WINDOW: usize = 50;

/// How much history survives between model calls.
#[derive(Clone)]
pub enum MemoryPolicy {
    /// Keep everything.
    All,
    /// Keep the most recent `max_messages` (plus the pinned system message).
    Window { max_messages: usize },
    /// Once history exceeds `trigger` messages, collapse all but the
    /// `keep_recent` newest into one summary message.
    Summarize {
        trigger: usize,
        keep_recent: usize,
        summarizer: Arc<dyn Summarizer>,
    },
    /// Keep the `top_k` highest-scoring older messages followed by the
    /// `keep_recent` newest.
    Selective {
        top_k: usize,
        keep_recent: usize,
        importance: ImportanceFn,
    },
    /// Keep the newest messages that fit an estimated token budget.
    TokenBudget { max_tokens: usize },
}

impl MemoryPolicy {
    pub fn window(max_messages: usize) -> Self {
        Self::Window { max_messages }
    }

    /// Summarize past `trigger` messages, keeping the newest half verbatim.
    pub fn summarize(trigger: usize, summarizer: Arc<dyn Summarizer>) -> Self {
        Self::Summarize {
            trigger,
            keep_recent: trigger / 2,
            summarizer,
        }
    }

    pub fn selective<F>(top_k: usize, keep_recent: usize, importance: F) -> Self
    where
        F: Fn(&Message) -> f32 + Send + Sync + 'static,
    {
        Self::Selective {
            top_k,
            keep_recent,
            importance: Arc::new(importance),
        }
    }

    /// Build a policy from configuration. `model` backs the summarizer.
    pub fn from_config(config: &MemoryConfig, model: Arc<dyn LanguageModel>) -> Self {
        match config {
            MemoryConfig::All => Self::All,
            MemoryConfig::Window { max_messages } => Self::window(*max_messages),
            MemoryConfig::Summarize {
                trigger,
                keep_recent,
            } => Self::Summarize {
                trigger: *trigger,
                keep_recent: keep_recent.unwrap_or(trigger / 2),
                summarizer: Arc::new(ModelSummarizer::new(model)),
            },
            MemoryConfig::Selective {
                top_k,
                keep_recent,
                importance,
            } => Self::Selective {
                top_k: *top_k,
                keep_recent: *keep_recent,
                importance: importance::scorer(*importance),
            },
            MemoryConfig::TokenBudget { max_tokens } => Self::TokenBudget {
                max_tokens: *max_tokens,
            },
        }
    }

    /// Short name for logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Window { .. } => "window",
            Self::Summarize { .. } => "summarize",
            Self::Selective { .. } => "selective",
            Self::TokenBudget { .. } => "token_budget",
        }
    }
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self::window(DEFAULT_WINDOW)
    }
}

impl fmt::Debug for MemoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Window { max_messages } => f
                .debug_struct("Window")
                .field("max_messages", max_messages)
                .finish(),
            Self::Summarize {
                trigger,
                keep_recent,
                ..
            } => f
                .debug_struct("Summarize")
                .field("trigger", trigger)
                .field("keep_recent", keep_recent)
                .finish_non_exhaustive(),
            Self::Selective {
                top_k, keep_recent, ..
            } => f
                .debug_struct("Selective")
                .field("top_k", top_k)
                .field("keep_recent", keep_recent)
                .finish_non_exhaustive(),
            Self::TokenBudget { max_tokens } => f
                .debug_struct("TokenBudget")
                .field("max_tokens", max_tokens)
                .finish(),
        }
    }
}

/// What one application of a policy did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimReport {
    pub policy: &'static str,
    pub before: usize,
    pub after: usize,
    /// Whether a summary message replaced older history
    pub summarized: bool,
}

impl TrimReport {
    pub fn trimmed(&self) -> bool {
        self.after < self.before || self.summarized
    }
}

/// Applies a [`MemoryPolicy`] to conversation state.
#[derive(Debug, Clone, Default)]
pub struct MemoryManager {
    policy: MemoryPolicy,
}

impl MemoryManager {
    pub fn new(policy: MemoryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MemoryPolicy {
        &self.policy
    }

    /// Trim `state` in place once a turn has settled.
    ///
    /// Only cancellation fails this call. A failing summarizer is logged and
    /// the history is left untouched.
    pub async fn apply(&self, ctx: &RunContext, state: &mut ConversationState) -> Result<TrimReport> {
        self.trim(ctx, state, false).await
    }

    /// Trim `state` before a model call of an unfinished turn. Everything
    /// from the latest user message on is kept, so the model always sees the
    /// tool results of the exchange in progress.
    pub async fn apply_in_turn(
        &self,
        ctx: &RunContext,
        state: &mut ConversationState,
    ) -> Result<TrimReport> {
        self.trim(ctx, state, true).await
    }

    async fn trim(
        &self,
        ctx: &RunContext,
        state: &mut ConversationState,
        in_turn: bool,
    ) -> Result<TrimReport> {
        let before = state.messages.len();
        let (pinned, rest) = policy::split_pinned(&state.messages);
        let mut summarized = false;

        let kept = match &self.policy {
            MemoryPolicy::All => None,
            MemoryPolicy::Window { max_messages } if in_turn => {
                Some(policy::window_live(rest, *max_messages))
            }
            MemoryPolicy::Window { max_messages } => Some(policy::window(rest, *max_messages)),
            MemoryPolicy::Selective {
                top_k,
                keep_recent,
                importance,
            } => Some(policy::selective(rest, *top_k, *keep_recent, importance.as_ref())),
            MemoryPolicy::TokenBudget { max_tokens } if in_turn => {
                Some(policy::token_budget_live(rest, *max_tokens))
            }
            MemoryPolicy::TokenBudget { max_tokens } => Some(policy::token_budget(rest, *max_tokens)),
            MemoryPolicy::Summarize {
                trigger,
                keep_recent,
                summarizer,
            } => {
                let collapsed =
                    summarize(ctx, rest, *trigger, *keep_recent, summarizer.as_ref()).await?;
                summarized = collapsed.is_some();
                collapsed
            }
        };

        if let Some(kept) = kept
            && (summarized || kept.len() != rest.len())
        {
            let messages: Vec<Message> = pinned.cloned().into_iter().chain(kept).collect();
            state.replace_messages(messages);
        }

        let report = TrimReport {
            policy: self.policy.name(),
            before,
            after: state.messages.len(),
            summarized,
        };
        if report.trimmed() {
            debug!(
                policy = report.policy,
                before = report.before,
                after = report.after,
                summarized = report.summarized,
                "Trimmed conversation memory"
            );
        }
        Ok(report)
    }
}

async fn summarize(
    ctx: &RunContext,
    rest: &[Message],
    trigger: usize,
    keep_recent: usize,
    summarizer: &dyn Summarizer,
) -> Result<Option<Vec<Message>>> {
    if rest.len() <= trigger {
        return Ok(None);
    }
    let split = policy::summary_split(rest, keep_recent);
    let only_summary = split == 1 && is_summary(&rest[0]);
    if split == 0 || only_summary {
        return Ok(None);
    }

    match ctx.guard(summarizer.summarize(ctx, &rest[..split])).await? {
        Ok(summary) => {
            let message = Message::assistant(format!("Summary of the earlier conversation: {summary}"))
                .with_metadata("summary", json!(true))
                .with_metadata("summarized_messages", json!(split));
            let kept = std::iter::once(message)
                .chain(rest[split..].iter().cloned())
                .collect();
            Ok(Some(policy::drop_orphans(kept)))
        }
        Err(e) => {
            warn!(error = %e, messages = split, "Summarization failed, keeping full history");
            Ok(None)
        }
    }
}

/// Whether `message` is a summary produced by the summarize policy.
pub fn is_summary(message: &Message) -> bool {
    message.metadata.get("summary").and_then(|v| v.as_bool()) == Some(true)
}
