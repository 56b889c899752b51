//! Pure trimming functions behind each memory policy.
//!
//! Every function takes the history *without* the pinned leading system
//! message and returns the messages to keep. Two rules hold for all of them:
//! the most recent user message survives, and no tool result is kept
//! without the assistant message that requested it.
//!
//! The `*_live` variants run between model calls of an unfinished turn. They
//! keep everything from the latest user message on, so the exchange in
//! progress reaches the model whole, and fill what room is left with history.

use std::collections::HashSet;

use taskloom_core::{Message, Role};

use super::token::{estimate_message_tokens, estimate_messages_tokens};

/// Split off a leading system message, which is never trimmed.
pub(crate) fn split_pinned(messages: &[Message]) -> (Option<&Message>, &[Message]) {
    match messages.split_first() {
        Some((first, rest)) if first.role == Role::System => (Some(first), rest),
        _ => (None, messages),
    }
}

fn last_user(messages: &[Message]) -> Option<usize> {
    messages.iter().rposition(|m| m.role == Role::User)
}

/// Move a cut point back so the kept block never opens with tool results.
fn align_to_turn(messages: &[Message], mut idx: usize) -> usize {
    while idx > 0 && idx < messages.len() && messages[idx].role == Role::Tool {
        idx -= 1;
    }
    idx
}

/// Remove tool results whose requesting assistant message is not kept
/// earlier in `messages`.
pub(crate) fn drop_orphans(messages: Vec<Message>) -> Vec<Message> {
    let mut requested: HashSet<String> = HashSet::new();
    messages
        .into_iter()
        .filter(|m| {
            requested.extend(m.tool_calls.iter().map(|c| c.id.clone()));
            match (m.role, &m.tool_call_id) {
                (Role::Tool, Some(id)) => requested.contains(id),
                (Role::Tool, None) => false,
                _ => true,
            }
        })
        .collect()
}

/// Keep the last `max` messages. When the latest user message falls outside
/// that window it takes the first slot.
pub(crate) fn window(messages: &[Message], max: usize) -> Vec<Message> {
    let max = max.max(1);
    if messages.len() <= max {
        return messages.to_vec();
    }
    let start = messages.len() - max;
    let kept = match last_user(messages) {
        Some(user) if user < start => {
            let tail = messages.len() - (max - 1);
            std::iter::once(messages[user].clone())
                .chain(messages[tail..].iter().cloned())
                .collect()
        }
        _ => messages[start..].to_vec(),
    };
    drop_orphans(kept)
}

/// [`window`] for a turn in progress. The exchange since the latest user
/// message counts against `max` but is never cut.
pub(crate) fn window_live(messages: &[Message], max: usize) -> Vec<Message> {
    let Some(user) = last_user(messages) else {
        return window(messages, max);
    };
    let (history, live) = messages.split_at(user);
    let room = max.max(1).saturating_sub(live.len());
    if history.len() <= room {
        return messages.to_vec();
    }
    let kept = history[history.len() - room..].iter().chain(live).cloned().collect();
    drop_orphans(kept)
}

/// Keep the `top_k` highest-scoring older messages (best first) followed by
/// the `keep_recent` newest in their original order.
///
/// Tool results and tool-requesting assistant messages are never scored on
/// their own, so a kept exchange is always complete.
pub(crate) fn selective(
    messages: &[Message],
    top_k: usize,
    keep_recent: usize,
    score: &dyn Fn(&Message) -> f32,
) -> Vec<Message> {
    if messages.len() <= top_k + keep_recent {
        return messages.to_vec();
    }
    let mut recent_start = messages.len() - keep_recent;
    if let Some(user) = last_user(messages) {
        recent_start = recent_start.min(user);
    }
    let recent_start = align_to_turn(messages, recent_start);

    let mut pool: Vec<(usize, f32)> = messages[..recent_start]
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role != Role::Tool && !m.has_tool_calls())
        .map(|(i, m)| (i, score(m)))
        .collect();
    // Stable sort: equal scores stay in chronological order.
    pool.sort_by(|a, b| b.1.total_cmp(&a.1));
    pool.truncate(top_k);

    let mut kept: Vec<Message> = pool.into_iter().map(|(i, _)| messages[i].clone()).collect();
    kept.extend_from_slice(&messages[recent_start..]);
    drop_orphans(kept)
}

/// Keep the newest messages whose estimated size fits `max_tokens`.
///
/// The latest user message is kept even when it alone exceeds the budget.
pub(crate) fn token_budget(messages: &[Message], max_tokens: usize) -> Vec<Message> {
    if estimate_messages_tokens(messages) <= max_tokens {
        return messages.to_vec();
    }
    let mut used = 0;
    let mut start = messages.len();
    while start > 0 {
        let cost = estimate_message_tokens(&messages[start - 1]);
        if used + cost > max_tokens {
            break;
        }
        used += cost;
        start -= 1;
    }
    let kept = match last_user(messages) {
        Some(user) if user < start => {
            used += estimate_message_tokens(&messages[user]);
            while start < messages.len() && used > max_tokens {
                used -= estimate_message_tokens(&messages[start]);
                start += 1;
            }
            std::iter::once(messages[user].clone())
                .chain(messages[start..].iter().cloned())
                .collect()
        }
        _ => messages[start..].to_vec(),
    };
    drop_orphans(kept)
}

/// [`token_budget`] for a turn in progress. The live exchange is kept even
/// when it alone exceeds the budget.
pub(crate) fn token_budget_live(messages: &[Message], max_tokens: usize) -> Vec<Message> {
    let Some(user) = last_user(messages) else {
        return token_budget(messages, max_tokens);
    };
    if estimate_messages_tokens(messages) <= max_tokens {
        return messages.to_vec();
    }
    let (history, live) = messages.split_at(user);
    let mut room = max_tokens.saturating_sub(estimate_messages_tokens(live));
    let mut start = history.len();
    while start > 0 {
        let cost = estimate_message_tokens(&history[start - 1]);
        if cost > room {
            break;
        }
        room -= cost;
        start -= 1;
    }
    drop_orphans(history[start..].iter().chain(live).cloned().collect())
}

/// Where to cut for summarization: everything before the returned index is
/// collapsed. Never cuts past the latest user message or through a tool
/// exchange.
pub(crate) fn summary_split(messages: &[Message], keep_recent: usize) -> usize {
    let mut split = messages.len().saturating_sub(keep_recent);
    if let Some(user) = last_user(messages) {
        split = split.min(user);
    }
    align_to_turn(messages, split)
}
