//! The tool contract: the `Tool` trait, `ToolResult`, and param helpers.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use aeon_core::types::ToolDefinition;

// ─────────────────────────────────────────────
// ToolResult
// ─────────────────────────────────────────────

/// Result of executing a tool.
#[derive(Clone, Debug, Default)]
pub struct ToolResult {
    /// Set by the executor to match the originating tool call.
    pub tool_call_id: String,
    /// Text the LLM sees.
    pub for_llm: String,
    /// Optional text emitted to the user channel.
    pub for_user: Option<String>,
    /// Suppress `for_user` even when set.
    pub silent: bool,
    /// The tool did not run; execution is gated on an approval handshake.
    pub needs_approval: bool,
    /// Human-readable description of what approval would allow.
    pub approval_description: Option<String>,
}

impl ToolResult {
    /// Success: content for the LLM only.
    pub fn ok(for_llm: impl Into<String>) -> Self {
        Self {
            for_llm: for_llm.into(),
            ..Default::default()
        }
    }

    /// Success that is also shown to the user.
    pub fn user(for_llm: impl Into<String>, for_user: impl Into<String>) -> Self {
        Self {
            for_llm: for_llm.into(),
            for_user: Some(for_user.into()),
            ..Default::default()
        }
    }

    /// Error surfaced to the LLM so it can retry or report.
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            for_llm: msg.into(),
            ..Default::default()
        }
    }

    /// A security denial: the LLM sees `BLOCKED: <reason>`.
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            for_llm: format!("BLOCKED: {}", reason.into()),
            ..Default::default()
        }
    }

    /// Execution paused pending an approval handshake.
    pub fn needs_approval(description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            for_llm: format!("REQUIRES APPROVAL: {description}"),
            needs_approval: true,
            approval_description: Some(description),
            ..Default::default()
        }
    }

    pub fn with_call_id(mut self, id: impl Into<String>) -> Self {
        self.tool_call_id = id.into();
        self
    }
}

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// Every agent tool implements this trait.
///
/// The agent loop discovers tools via `name()`, sends their schemas to the
/// LLM via `to_definition()`, and dispatches calls through the registry.
/// Tools must honour cancellation at their await points and must not
/// perform irreversible external writes without saying so in `for_user`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used by the LLM to call this tool (e.g. `"read_file"`).
    fn name(&self) -> &str;

    /// Human-readable description shown to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema describing the parameters.
    ///
    /// Must be `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> Value;

    /// Pre-flight check: return a description when this invocation must be
    /// gated on the approval handshake. The registry then returns a
    /// needs-approval result without running the tool.
    fn requires_approval(&self, _params: &HashMap<String, Value>) -> Option<String> {
        None
    }

    /// Execute the tool with validated arguments.
    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<ToolResult>;

    /// Build the `ToolDefinition` sent to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Extract a required `String` param, returning a user-friendly error.
pub fn require_string(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}

/// Extract an optional `String` param.
pub fn optional_string(params: &HashMap<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Extract an optional integer param.
pub fn optional_i64(params: &HashMap<String, Value>, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}
