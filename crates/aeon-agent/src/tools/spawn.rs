//! Spawn tool — lets the LLM delegate work to background subagents.
//!
//! The agent loop calls `set_context` before each turn so completion
//! messages route back to the conversation that asked for the task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{require_string, Tool, ToolResult};
use crate::subagent::SubagentManager;

/// Tool that spawns background subagent tasks.
pub struct SpawnTool {
    manager: Arc<SubagentManager>,
    /// Current origin (channel, chat_id), set per turn by the agent loop.
    context: Mutex<(String, String)>,
}

impl SpawnTool {
    pub fn new(manager: Arc<SubagentManager>) -> Self {
        Self {
            manager,
            context: Mutex::new(("cli".into(), "direct".into())),
        }
    }

    /// Point completion messages at the active conversation.
    pub fn set_context(&self, channel: &str, chat_id: &str) {
        *self.context.lock().unwrap() = (channel.to_string(), chat_id.to_string());
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a subagent to handle a task in the background. Use this for \
         long-running or independent work; the result is posted to the chat \
         when the subagent finishes."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task for the subagent to complete"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolResult> {
        let task = require_string(&params, "task")?;
        let (channel, chat_id) = self.context.lock().unwrap().clone();

        match self.manager.spawn(task, channel, chat_id) {
            Ok(confirmation) => Ok(ToolResult::ok(confirmation)),
            Err(e) => Ok(ToolResult::error(format!("Error executing spawn: {e}"))),
        }
    }
}
