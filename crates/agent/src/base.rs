//! Parts every agent is built from.

use std::sync::Arc;

use taskloom_config::AgentSettings;
use taskloom_core::{ConversationState, Error, LanguageModel, Result, Tool, ToolRegistry};

use crate::memory::{MemoryManager, MemoryPolicy};
use crate::options::LoopOptions;
use crate::session::StateSlot;

pub(crate) struct AgentBase {
    pub(crate) model: Arc<dyn LanguageModel>,
    pub(crate) tools: ToolRegistry,
    pub(crate) memory: MemoryManager,
    pub(crate) options: LoopOptions,
    pub(crate) slot: StateSlot,
}

impl AgentBase {
    pub(crate) fn new(model: Arc<dyn LanguageModel>) -> Self {
        let options = LoopOptions::default();
        Self {
            model,
            tools: ToolRegistry::new(),
            memory: MemoryManager::default(),
            slot: StateSlot::new(ConversationState::new(options.max_iterations)),
            options,
        }
    }

    pub(crate) fn from_settings(model: Arc<dyn LanguageModel>, settings: &AgentSettings) -> Result<Self> {
        settings.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        let options = LoopOptions::from(settings);
        Ok(Self {
            memory: MemoryManager::new(MemoryPolicy::from_config(&settings.memory, model.clone())),
            model,
            tools: ToolRegistry::new(),
            slot: StateSlot::new(ConversationState::new(options.max_iterations)),
            options,
        })
    }

    /// Change the iteration bound (at least 1). Starts from a fresh state,
    /// so this is meant for construction time.
    pub(crate) fn set_max_iterations(&mut self, max_iterations: u32) {
        let max_iterations = max_iterations.max(1);
        self.options.max_iterations = max_iterations;
        self.slot = StateSlot::new(ConversationState::new(max_iterations));
    }

    pub(crate) fn add_tool(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        self.tools.add(tool)?;
        Ok(())
    }
}
