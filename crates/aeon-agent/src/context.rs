//! Context builder — assembles the system prompt for each turn.

use std::sync::Arc;

use aeon_memory::MemoryStore;

/// Builds the per-turn system prompt: base prompt, current provider, and
/// the memory context for the user's text.
pub struct ContextBuilder {
    base_prompt: String,
    memory: Arc<MemoryStore>,
}

impl ContextBuilder {
    pub fn new(base_prompt: impl Into<String>, memory: Arc<MemoryStore>) -> Self {
        Self {
            base_prompt: base_prompt.into(),
            memory,
        }
    }

    /// Build the full system prompt for one turn.
    pub fn build_system_prompt(&self, provider_name: &str, user_text: &str) -> String {
        let mut parts = vec![
            self.base_prompt.clone(),
            format!("Currently running on: {provider_name}"),
        ];

        let memories = self.memory.build_context(user_text);
        if !memories.is_empty() {
            parts.push(memories);
        }

        parts.join("\n\n")
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }
}
