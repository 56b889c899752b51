//! Ownership of an agent's conversation state.
//!
//! Each agent owns exactly one [`ConversationState`] behind an async mutex.
//! A run holds the lock for its whole duration, so a second run, reset,
//! export or import attempted meanwhile fails with [`Error::AgentBusy`]
//! instead of interleaving with it.

use std::sync::Arc;

use taskloom_core::{ConversationState, Error, Message, Result};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Clone)]
pub(crate) struct StateSlot {
    inner: Arc<Mutex<ConversationState>>,
}

impl StateSlot {
    pub(crate) fn new(state: ConversationState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Take exclusive ownership of the state for a run.
    pub(crate) fn acquire(&self) -> Result<OwnedMutexGuard<ConversationState>> {
        self.inner.clone().try_lock_owned().map_err(|_| Error::AgentBusy)
    }

    pub(crate) fn export(&self) -> Result<ConversationState> {
        Ok(self.acquire()?.clone())
    }

    pub(crate) fn import(&self, state: ConversationState) -> Result<()> {
        *self.acquire()? = state;
        Ok(())
    }

    pub(crate) fn reset(&self) -> Result<()> {
        self.acquire()?.clear();
        Ok(())
    }
}

/// History as it was before a run. A failed run restores it, so the state
/// never keeps a half-finished exchange.
pub(crate) struct Checkpoint {
    messages: Vec<Message>,
}

impl Checkpoint {
    pub(crate) fn take(state: &ConversationState) -> Self {
        Self {
            messages: state.messages.clone(),
        }
    }

    pub(crate) fn settle<T>(self, state: &mut ConversationState, outcome: &Result<T>) {
        if let Err(e) = outcome {
            debug!(state_id = %state.id, error = %e, "Run failed, restoring history");
            state.replace_messages(self.messages);
        }
    }
}
