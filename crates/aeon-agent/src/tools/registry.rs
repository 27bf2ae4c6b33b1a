//! Tool registry — schema-validated, timeout-bounded dispatch.
//!
//! The registry owns the capability table. Dispatch order per call:
//! lookup, parameter validation, approval pre-flight, then execution
//! under a hard deadline. Validation failures go back to the LLM as text
//! so it can correct itself; a timed-out tool produces a synthetic result
//! and the caller never blocks on the runaway execution.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use aeon_core::types::ToolDefinition;

use super::base::{Tool, ToolResult};

/// Default per-call deadline.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 60;

/// Thread-safe named tool table. Reads dominate; writes happen on
/// register/unregister.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    timeout: Duration,
}

impl ToolRegistry {
    /// Create an empty registry with the default tool timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS))
    }

    /// Create an empty registry with a custom per-call deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Register a tool. Overwrites any previous tool with the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        info!(tool = tool.name(), "registered tool");
        self.tools
            .write()
            .unwrap()
            .insert(tool.name().to_string(), tool);
    }

    /// Unregister a tool by name.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let removed = self.tools.write().unwrap().remove(name);
        if removed.is_some() {
            info!(tool = name, "unregistered tool");
        }
        removed
    }

    /// Check if a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.read().unwrap().contains_key(name)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.read().unwrap().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.read().unwrap().is_empty()
    }

    /// Names of all registered tools, sorted for determinism.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// LLM-facing definitions, alphabetically sorted by tool name.
    /// Stable ordering keeps provider prompt caches warm.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .unwrap()
            .values()
            .map(|t| t.to_definition())
            .collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Execute a tool with the full pipeline (including approval pre-flight).
    pub async fn execute(&self, name: &str, params_json: &str) -> ToolResult {
        self.dispatch(name, params_json, false).await
    }

    /// Execute a tool after its approval handshake resolved positively.
    pub async fn execute_approved(&self, name: &str, params_json: &str) -> ToolResult {
        self.dispatch(name, params_json, true).await
    }

    async fn dispatch(&self, name: &str, params_json: &str, skip_approval: bool) -> ToolResult {
        let Some(tool) = self.tools.read().unwrap().get(name).cloned() else {
            warn!(tool = name, "tool not found");
            return ToolResult::error(format!("Error: Tool '{name}' not found"));
        };

        let params: HashMap<String, Value> = if params_json.trim().is_empty() {
            HashMap::new()
        } else {
            match serde_json::from_str(params_json) {
                Ok(p) => p,
                Err(e) => {
                    return ToolResult::error(format!(
                        "Parameter validation error: arguments are not a JSON object: {e}"
                    ));
                }
            }
        };

        if let Err(e) = validate_params(&tool.parameters(), &params) {
            warn!(tool = name, error = %e, "parameter validation failed");
            return ToolResult::error(format!("Parameter validation error: {e}"));
        }

        if !skip_approval {
            if let Some(description) = tool.requires_approval(&params) {
                info!(tool = name, "tool call requires approval");
                return ToolResult::needs_approval(description);
            }
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, tool.execute(params)).await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(tool = name, error = %e, "tool execution failed");
                ToolResult::error(format!("Error executing {name}: {e}"))
            }
            Err(_) => {
                warn!(tool = name, timeout_secs = self.timeout.as_secs(), "tool timed out");
                ToolResult::error(format!(
                    "Tool '{}' timed out after {}s; it may still be running.",
                    name,
                    self.timeout.as_secs()
                ))
            }
        };

        debug!(
            tool = name,
            duration_ms = elapsed.as_millis() as u64,
            param_bytes = params_json.len(),
            result_bytes = result.for_llm.len(),
            "tool executed"
        );
        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// Schema validation
// ─────────────────────────────────────────────

/// Minimal JSON-schema validation: required-field presence (null counts
/// as missing), primitive type matching, and enum membership for strings.
fn validate_params(schema: &Value, params: &HashMap<String, Value>) -> Result<(), String> {
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required {
            let Some(field) = field.as_str() else { continue };
            match params.get(field) {
                None | Some(Value::Null) => {
                    return Err(format!("missing required parameter '{field}'"));
                }
                Some(_) => {}
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Ok(());
    };

    for (key, value) in params {
        let Some(prop) = properties.get(key) else {
            continue; // unknown params are passed through, the tool decides
        };

        if let Some(expected) = prop.get("type").and_then(|t| t.as_str()) {
            let matches = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "object" => value.is_object(),
                "array" => value.is_array(),
                _ => true,
            };
            if !matches && !value.is_null() {
                return Err(format!(
                    "parameter '{key}' should be of type {expected}"
                ));
            }
        }

        if let (Some(allowed), Some(s)) = (
            prop.get("enum").and_then(|e| e.as_array()),
            value.as_str(),
        ) {
            let ok = allowed.iter().any(|a| a.as_str() == Some(s));
            if !ok {
                let values: Vec<String> = allowed
                    .iter()
                    .filter_map(|a| a.as_str().map(String::from))
                    .collect();
                return Err(format!(
                    "parameter '{key}' must be one of [{}], got '{s}'",
                    values.join(", ")
                ));
            }
        }
    }

    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
