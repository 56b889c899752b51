//! Built-in importance scorers for the selective policy.

use std::sync::Arc;

use taskloom_config::ImportanceKind;
use taskloom_core::{Message, Role};

use super::{ImportanceFn, is_summary};

/// User turns outrank assistant turns, which outrank tool output.
/// Earlier summaries score highest since they stand in for many messages.
pub fn role_weighted(message: &Message) -> f32 {
    if is_summary(message) {
        return 4.0;
    }
    match message.role {
        Role::System => 3.0,
        Role::User => 2.0,
        Role::Assistant => 1.0,
        Role::Tool => 0.5,
    }
}

/// Longer messages score higher.
pub fn by_length(message: &Message) -> f32 {
    message.content.chars().count() as f32
}

/// The scorer selected by configuration.
pub fn scorer(kind: ImportanceKind) -> ImportanceFn {
    match kind {
        ImportanceKind::RoleWeighted => Arc::new(role_weighted),
        ImportanceKind::Length => Arc::new(by_length),
    }
}
